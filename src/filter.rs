//! Per-feature filter predicate evaluated by the map layer.
//!
//! The predicate decides whether a single track feature is rendered, given
//! the emitted [`FilterState`], the selected track (detail view) and whether a
//! layer transition is in progress. It is evaluated per feature on every
//! render pass, so it is pure and allocation-free.
//!
//! ## Rules
//!
//! Stable layer:
//! 1. A selected track wins: only that id passes.
//! 2. An empty category selection shows nothing.
//! 3. Otherwise a feature needs a shared category and its length and
//!    resolved elevation gain inside the ranges, widened by
//!    [`LENGTH_EPSILON_KM`] and [`ELEVATION_GAIN_EPSILON_M`].
//!
//! Transitioning layer: an empty category selection shows everything, and
//! the selection override is ignored while the old and new layer coexist.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::{TrackFeature, TrackProperties, ValueRange};

/// Tolerance on length range edges, in kilometers.
pub const LENGTH_EPSILON_KM: f64 = 0.5;

/// Tolerance on elevation gain range edges, in meters.
pub const ELEVATION_GAIN_EPSILON_M: f64 = 10.0;

/// Filter values as emitted to the map layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterState {
    pub categories: BTreeSet<String>,
    pub length_range: ValueRange,
    pub elevation_gain_range: ValueRange,
}

impl FilterState {
    /// Filter that accepts every track with at least one of `categories`.
    pub fn with_categories<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            categories: categories.into_iter().map(Into::into).collect(),
            length_range: ValueRange::UNBOUNDED,
            elevation_gain_range: ValueRange::UNBOUNDED,
        }
    }

    /// Category, length and elevation checks (rules 2 and 3).
    pub fn matches(&self, properties: &TrackProperties) -> bool {
        if self.categories.is_empty() {
            return false;
        }

        if !properties
            .categories
            .iter()
            .any(|c| self.categories.contains(c))
        {
            return false;
        }

        if !self
            .length_range
            .contains_with_tolerance(properties.length_km, LENGTH_EPSILON_KM)
        {
            return false;
        }

        match resolve_elevation_gain(properties) {
            Some(gain) => self
                .elevation_gain_range
                .contains_with_tolerance(gain, ELEVATION_GAIN_EPSILON_M),
            // No elevation data never excludes a track
            None => true,
        }
    }
}

/// Elevation gain used for filtering.
///
/// Prefers `elevation_gain` when it is finite and non-negative, then falls
/// back to a finite `elevation_up`. `None` means the track has no usable
/// elevation data.
pub fn resolve_elevation_gain(properties: &TrackProperties) -> Option<f64> {
    properties
        .elevation_gain
        .filter(|g| g.is_finite() && *g >= 0.0)
        .or_else(|| properties.elevation_up.filter(|u| u.is_finite()))
}

/// Snapshot of everything the layer needs to decide visibility.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackPredicate {
    pub filter: FilterState,
    pub selected_track_id: Option<String>,
    pub transitioning: bool,
}

impl TrackPredicate {
    pub fn new(filter: FilterState) -> Self {
        Self {
            filter,
            selected_track_id: None,
            transitioning: false,
        }
    }

    /// Decide whether `feature` is rendered.
    pub fn matches(&self, feature: &TrackFeature) -> bool {
        if self.transitioning {
            if self.filter.categories.is_empty() {
                return true;
            }
            return self.filter.matches(&feature.properties);
        }

        if let Some(selected) = &self.selected_track_id {
            return feature.id == *selected;
        }

        self.filter.matches(&feature.properties)
    }

    /// Ids of the features that pass, in input order.
    pub fn matching_ids<'a, I>(&self, features: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a TrackFeature>,
    {
        features
            .into_iter()
            .filter(|f| self.matches(f))
            .map(|f| f.id.clone())
            .collect()
    }

    /// Parallel variant of [`TrackPredicate::matching_ids`] for large slices.
    #[cfg(feature = "parallel")]
    pub fn matching_ids_parallel(&self, features: &[TrackFeature]) -> Vec<String> {
        features
            .par_iter()
            .filter(|f| self.matches(f))
            .map(|f| f.id.clone())
            .collect()
    }
}

/// Categories and value ranges present among a set of tracks.
///
/// Computed per viewport to bound the filter panel, and accumulated over the
/// session for reset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterBounds {
    pub categories: BTreeSet<String>,
    /// `None` when there are no tracks
    pub length: Option<ValueRange>,
    /// `None` when no track carries usable elevation data
    pub elevation_gain: Option<ValueRange>,
}

impl FilterBounds {
    /// Collect bounds over `features`. Non-finite lengths are ignored.
    pub fn from_features<'a, I>(features: I) -> Self
    where
        I: IntoIterator<Item = &'a TrackFeature>,
    {
        let mut bounds = FilterBounds::default();
        for feature in features {
            bounds.include(&feature.properties);
        }
        bounds
    }

    /// Widen the bounds to cover one track.
    pub fn include(&mut self, properties: &TrackProperties) {
        self.categories
            .extend(properties.categories.iter().cloned());

        if properties.length_km.is_finite() {
            let length = properties.length_km;
            match &mut self.length {
                Some(range) => range.include(length),
                None => self.length = Some(ValueRange::new(length, length)),
            }
        }

        if let Some(gain) = resolve_elevation_gain(properties) {
            match &mut self.elevation_gain {
                Some(range) => range.include(gain),
                None => self.elevation_gain = Some(ValueRange::new(gain, gain)),
            }
        }
    }

    /// Widen these bounds to cover `other` as well.
    pub fn merge(&mut self, other: &FilterBounds) {
        self.categories.extend(other.categories.iter().cloned());
        self.length = merge_range(self.length, other.length);
        self.elevation_gain = merge_range(self.elevation_gain, other.elevation_gain);
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty() && self.length.is_none() && self.elevation_gain.is_none()
    }
}

fn merge_range(a: Option<ValueRange>, b: Option<ValueRange>) -> Option<ValueRange> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.union(&b)),
        (a, None) => a,
        (None, b) => b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GpsPoint;

    fn feature(id: &str, categories: &[&str], length_km: f64) -> TrackFeature {
        TrackFeature::new(
            id,
            vec![GpsPoint::new(46.0, 7.0)],
            categories.iter().copied(),
            length_km,
        )
    }

    fn filter(categories: &[&str], length: (f64, f64), gain: (f64, f64)) -> FilterState {
        FilterState {
            categories: categories.iter().map(|c| c.to_string()).collect(),
            length_range: ValueRange::new(length.0, length.1),
            elevation_gain_range: ValueRange::new(gain.0, gain.1),
        }
    }

    #[test]
    fn test_selected_track_wins() {
        let mut predicate = TrackPredicate::new(filter(&[], (0.0, 1.0), (0.0, 1.0)));
        predicate.selected_track_id = Some("b".to_string());

        // Neither categories nor ranges matter in detail view
        assert!(predicate.matches(&feature("b", &["cycling"], 500.0)));
        assert!(!predicate.matches(&feature("a", &[], 0.5)));
    }

    #[test]
    fn test_empty_categories_show_nothing() {
        let predicate = TrackPredicate::new(filter(&[], (0.0, 100.0), (0.0, 5000.0)));
        assert!(!predicate.matches(&feature("a", &["hiking"], 10.0)));
    }

    #[test]
    fn test_category_overlap_required() {
        let predicate = TrackPredicate::new(filter(&["running"], (0.0, 100.0), (0.0, 5000.0)));
        assert!(predicate.matches(&feature("a", &["hiking", "running"], 10.0)));
        assert!(!predicate.matches(&feature("b", &["hiking"], 10.0)));
        assert!(!predicate.matches(&feature("c", &[], 10.0)));
    }

    #[test]
    fn test_length_tolerance_boundaries() {
        let predicate = TrackPredicate::new(filter(&["hiking"], (5.0, 10.0), (0.0, 5000.0)));
        assert!(predicate.matches(&feature("a", &["hiking"], 4.5)));
        assert!(!predicate.matches(&feature("b", &["hiking"], 4.49)));
        assert!(predicate.matches(&feature("c", &["hiking"], 10.5)));
        assert!(!predicate.matches(&feature("d", &["hiking"], 10.51)));
    }

    #[test]
    fn test_elevation_gain_tolerance() {
        let predicate = TrackPredicate::new(filter(&["hiking"], (0.0, 100.0), (200.0, 400.0)));
        let at = |gain: f64| feature("a", &["hiking"], 5.0).with_elevation_gain(Some(gain));
        assert!(predicate.matches(&at(190.0)));
        assert!(!predicate.matches(&at(189.0)));
        assert!(predicate.matches(&at(410.0)));
        assert!(!predicate.matches(&at(411.0)));
    }

    #[test]
    fn test_elevation_fallback() {
        let props = |gain: Option<f64>, up: Option<f64>| TrackProperties {
            elevation_gain: gain,
            elevation_up: up,
            ..TrackProperties::default()
        };
        assert_eq!(resolve_elevation_gain(&props(Some(120.0), Some(80.0))), Some(120.0));
        assert_eq!(resolve_elevation_gain(&props(None, Some(80.0))), Some(80.0));
        assert_eq!(resolve_elevation_gain(&props(Some(-3.0), Some(80.0))), Some(80.0));
        assert_eq!(resolve_elevation_gain(&props(Some(f64::NAN), None)), None);
        assert_eq!(resolve_elevation_gain(&props(None, Some(f64::INFINITY))), None);

        let predicate = TrackPredicate::new(filter(&["hiking"], (0.0, 100.0), (200.0, 400.0)));
        let fallback = feature("a", &["hiking"], 5.0).with_elevation_up(Some(1000.0));
        assert!(!predicate.matches(&fallback));
        let no_data = feature("b", &["hiking"], 5.0);
        assert!(predicate.matches(&no_data));
    }

    #[test]
    fn test_transitioning_empty_categories_show_all() {
        let mut predicate = TrackPredicate::new(filter(&[], (5.0, 6.0), (0.0, 1.0)));
        predicate.transitioning = true;
        predicate.selected_track_id = Some("x".to_string());

        assert!(predicate.matches(&feature("a", &[], 1000.0)));
        assert!(predicate.matches(&feature("b", &["hiking"], 0.0).with_elevation_gain(Some(9000.0))));
    }

    #[test]
    fn test_transitioning_ignores_selection() {
        let mut predicate = TrackPredicate::new(filter(&["hiking"], (0.0, 20.0), (0.0, 5000.0)));
        predicate.transitioning = true;
        predicate.selected_track_id = Some("a".to_string());

        assert!(predicate.matches(&feature("a", &["hiking"], 5.0)));
        assert!(predicate.matches(&feature("b", &["hiking"], 5.0)));
        assert!(!predicate.matches(&feature("a", &["running"], 5.0)));
    }

    #[test]
    fn test_matching_ids_keeps_order() {
        let predicate = TrackPredicate::new(FilterState::with_categories(["hiking"]));
        let features = vec![
            feature("c", &["hiking"], 1.0),
            feature("a", &["running"], 1.0),
            feature("b", &["hiking"], 1.0),
        ];
        assert_eq!(predicate.matching_ids(&features), vec!["c", "b"]);
    }

    #[test]
    fn test_filter_bounds() {
        let features = vec![
            feature("a", &["hiking"], 3.0).with_elevation_gain(Some(150.0)),
            feature("b", &["running"], 12.0).with_elevation_up(Some(40.0)),
            feature("c", &["running"], f64::NAN),
        ];
        let bounds = FilterBounds::from_features(&features);
        assert_eq!(bounds.categories.len(), 2);
        assert_eq!(bounds.length, Some(ValueRange::new(3.0, 12.0)));
        assert_eq!(bounds.elevation_gain, Some(ValueRange::new(40.0, 150.0)));

        let mut merged = FilterBounds::default();
        assert!(merged.is_empty());
        merged.merge(&bounds);
        assert_eq!(merged, bounds);
    }
}
