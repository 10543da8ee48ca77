//! Grid-based marker clustering.
//!
//! Each track is represented by its anchor point (first valid coordinate).
//! Anchors are projected to Web Mercator pixel space at the requested zoom
//! (256 px tiles) and bucketed into square cells of `radius_px`. Every
//! non-empty cell becomes one [`Cluster`].

use std::collections::HashMap;
use std::f64::consts::PI;

use serde::Serialize;

use crate::{Bounds, GpsPoint, TrackFeature};

const TILE_SIZE: f64 = 256.0;

// Web Mercator is undefined at the poles
const MAX_MERCATOR_LAT: f64 = 85.051_128_78;

/// A group of nearby track markers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    /// Mean position of the member anchors
    pub center: GpsPoint,
    /// Member track ids, sorted
    pub track_ids: Vec<String>,
    /// Box around the member anchors (zoom target when clicked)
    pub bounds: Bounds,
}

impl Cluster {
    pub fn len(&self) -> usize {
        self.track_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.track_ids.is_empty()
    }

    /// Single-track clusters render as a plain marker.
    pub fn is_single(&self) -> bool {
        self.track_ids.len() == 1
    }
}

/// Project a point to global pixel coordinates at `zoom`.
pub fn project(point: &GpsPoint, zoom: f64) -> (f64, f64) {
    let scale = TILE_SIZE * 2f64.powf(zoom);
    let lat = point.latitude.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT).to_radians();
    let x = (point.longitude + 180.0) / 360.0 * scale;
    let y = (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / PI) / 2.0 * scale;
    (x, y)
}

/// Cluster `features` for display at `zoom`.
///
/// Tracks without a valid coordinate are skipped. Clusters are ordered by
/// their first member id so the output is stable across calls.
pub fn cluster_features<'a, I>(features: I, zoom: f64, radius_px: f64) -> Vec<Cluster>
where
    I: IntoIterator<Item = &'a TrackFeature>,
{
    let cell = if radius_px.is_finite() && radius_px > 0.0 {
        radius_px
    } else {
        1.0
    };

    let mut cells: HashMap<(i64, i64), Vec<(&'a str, GpsPoint)>> = HashMap::new();
    for feature in features {
        let Some(anchor) = feature.anchor() else {
            continue;
        };
        let (x, y) = project(&anchor, zoom);
        let key = ((x / cell).floor() as i64, (y / cell).floor() as i64);
        cells.entry(key).or_default().push((feature.id.as_str(), anchor));
    }

    let mut clusters: Vec<Cluster> = cells
        .into_values()
        .filter_map(|members| {
            let anchors: Vec<GpsPoint> = members.iter().map(|(_, p)| *p).collect();
            let bounds = Bounds::from_points(&anchors)?;
            let n = anchors.len() as f64;
            let center = GpsPoint::new(
                anchors.iter().map(|p| p.latitude).sum::<f64>() / n,
                anchors.iter().map(|p| p.longitude).sum::<f64>() / n,
            );
            let mut track_ids: Vec<String> =
                members.iter().map(|(id, _)| id.to_string()).collect();
            track_ids.sort();
            Some(Cluster {
                center,
                track_ids,
                bounds,
            })
        })
        .collect();

    clusters.sort_by(|a, b| a.track_ids[0].cmp(&b.track_ids[0]));
    clusters
}
