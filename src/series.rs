//! Per-track chart series.
//!
//! Sample arrays (elevation, heart rate, temperature) arrive index-aligned
//! with the geometry when the backend has them for every point, and at a
//! coarser resolution otherwise. Samples are placed along the cumulative
//! distance of the geometry: by index when the counts agree, proportionally
//! when they differ. Null and non-finite samples are dropped.

use serde::Serialize;

use crate::geo_utils::cumulative_distances_km;
use crate::{TrackFeature, TrackProperties};

/// Which property a series was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SeriesKind {
    Elevation,
    HeartRate,
    Temperature,
}

impl SeriesKind {
    pub const ALL: [SeriesKind; 3] = [
        SeriesKind::Elevation,
        SeriesKind::HeartRate,
        SeriesKind::Temperature,
    ];

    fn samples(self, properties: &TrackProperties) -> &[Option<f64>] {
        match self {
            SeriesKind::Elevation => &properties.elevation_profile,
            SeriesKind::HeartRate => &properties.heart_rate,
            SeriesKind::Temperature => &properties.temperature,
        }
    }
}

/// A chartable series: `(distance_km, value)` pairs with summary stats.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSeries {
    pub kind: SeriesKind,
    pub points: Vec<(f64, f64)>,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

impl ChartSeries {
    /// Build the `kind` series of `feature`.
    ///
    /// Returns None when the feature has no usable sample for that kind.
    pub fn from_feature(feature: &TrackFeature, kind: SeriesKind) -> Option<Self> {
        let samples = kind.samples(&feature.properties);
        if samples.is_empty() {
            return None;
        }

        let distances = sample_distances(feature, samples.len());
        let points: Vec<(f64, f64)> = samples
            .iter()
            .zip(distances)
            .filter_map(|(sample, d)| match sample {
                Some(v) if v.is_finite() => Some((d, *v)),
                _ => None,
            })
            .collect();

        if points.is_empty() {
            return None;
        }

        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for &(_, v) in &points {
            min = min.min(v);
            max = max.max(v);
            sum += v;
        }
        let avg = sum / points.len() as f64;

        Some(Self {
            kind,
            points,
            min,
            max,
            avg,
        })
    }

    /// All series the feature has data for, in [`SeriesKind::ALL`] order.
    pub fn all_for(feature: &TrackFeature) -> Vec<Self> {
        SeriesKind::ALL
            .iter()
            .filter_map(|&kind| Self::from_feature(feature, kind))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Distance along the track for each of `count` samples.
///
/// Without geometry the samples are spread evenly over `length_km`.
fn sample_distances(feature: &TrackFeature, count: usize) -> Vec<f64> {
    let cumulative = cumulative_distances_km(&feature.geometry);

    if cumulative.len() == count {
        return cumulative;
    }

    let total = cumulative
        .last()
        .copied()
        .filter(|d| *d > 0.0)
        .unwrap_or(feature.properties.length_km.max(0.0));

    if count == 1 {
        return vec![0.0];
    }

    if cumulative.len() < 2 {
        return (0..count)
            .map(|i| total * i as f64 / (count - 1) as f64)
            .collect();
    }

    // Proportional index mapping onto the geometry
    let last = (cumulative.len() - 1) as f64;
    (0..count)
        .map(|i| {
            let pos = i as f64 / (count - 1) as f64 * last;
            let lo = pos.floor() as usize;
            let hi = (lo + 1).min(cumulative.len() - 1);
            let t = pos - lo as f64;
            cumulative[lo] + (cumulative[hi] - cumulative[lo]) * t
        })
        .collect()
}

/// Total climb and descent of an elevation profile, in metres.
///
/// Gaps (null or non-finite samples) are bridged: the delta is taken between
/// consecutive valid samples.
pub fn elevation_totals(samples: &[Option<f64>]) -> (f64, f64) {
    let mut up = 0.0;
    let mut down = 0.0;
    let mut prev: Option<f64> = None;

    for value in samples.iter().flatten().filter(|v| v.is_finite()) {
        if let Some(p) = prev {
            let delta = value - p;
            if delta > 0.0 {
                up += delta;
            } else {
                down -= delta;
            }
        }
        prev = Some(*value);
    }

    (up, down)
}

/// Fill `elevation_up` from the elevation profile when the backend omitted it.
///
/// Returns true if a value was written.
pub fn backfill_elevation_up(properties: &mut TrackProperties) -> bool {
    if properties.elevation_up.is_some() {
        return false;
    }
    if !properties
        .elevation_profile
        .iter()
        .flatten()
        .any(|v| v.is_finite())
    {
        return false;
    }
    let (up, _) = elevation_totals(&properties.elevation_profile);
    properties.elevation_up = Some(up);
    true
}
