//! # Map Session
//!
//! One map view's worth of state, passed around explicitly instead of living
//! in globals.
//!
//! ## Architecture
//!
//! ```text
//! backend features ──▶ TrackEngine ──viewport bounds──▶ FilterPanel
//!                           │                              │ emitted()
//!                           │                              ▼
//!                           │                         Debouncer
//!                           │                              │ poll/flush
//!                           ▼                              ▼
//!                   visible ids / clusters ◀── predicate ── LayerView
//! ```
//!
//! Filter mutations reach the layer only through the debouncer; selection
//! changes go through the layer's transition state machine.

use std::time::Instant;

use log::{debug, info};

use crate::cluster::{cluster_features, Cluster};
use crate::config::SessionConfig;
use crate::debounce::Debouncer;
use crate::engine::TrackEngine;
use crate::error::{OptionExt, Result};
use crate::events::TrackEvent;
use crate::filter::FilterState;
use crate::panel::FilterPanel;
use crate::series::{backfill_elevation_up, ChartSeries};
use crate::storage::{load_map_position, save_map_position, KeyValueStore, MapPosition};
use crate::transition::{LayerView, TransitionId};
use crate::{Bounds, GpsPoint, TrackFeature, ValueRange};

pub struct MapSession<S: KeyValueStore> {
    config: SessionConfig,
    engine: TrackEngine,
    panel: FilterPanel<S>,
    debouncer: Debouncer<FilterState>,
    layer: LayerView,
    viewport: Bounds,
}

impl<S: KeyValueStore> MapSession<S> {
    /// Open a session on the first viewport and the tracks loaded for it.
    ///
    /// The persisted filter selection (if any) is restored from `store` and
    /// applied to the layer right away, without waiting for the debounce.
    pub fn open(store: S, config: SessionConfig, viewport: Bounds, features: Vec<TrackFeature>) -> Self {
        let mut engine = TrackEngine::with_cache_capacity(config.viewport_cache_capacity);
        engine.add_features(prepare(features));

        let available = engine.viewport_bounds(&viewport);
        let panel = FilterPanel::mount(store, &config.filter_storage_key, available);
        let initial = panel.emitted();

        let mut debouncer = Debouncer::new(config.filter_debounce());
        // Seed duplicate suppression with what the layer already shows
        debouncer.push_at(initial.clone(), Instant::now());
        debouncer.flush();

        info!(
            "[MapSession] Opened with {} tracks, {} categories selected",
            engine.feature_count(),
            initial.categories.len()
        );

        Self {
            layer: LayerView::new(initial),
            config,
            engine,
            panel,
            debouncer,
            viewport,
        }
    }

    // ========================================================================
    // Viewport
    // ========================================================================

    /// Move to `viewport`, merging the tracks the backend returned for it.
    pub fn load_viewport(&mut self, viewport: Bounds, features: Vec<TrackFeature>) {
        self.engine.add_features(prepare(features));
        self.set_viewport(viewport);
    }

    /// Move to `viewport` using the tracks already loaded.
    pub fn set_viewport(&mut self, viewport: Bounds) {
        self.viewport = viewport;
        let available = self.engine.viewport_bounds(&self.viewport);
        self.panel.update_available(available);
        self.queue_filter();
    }

    pub fn viewport(&self) -> &Bounds {
        &self.viewport
    }

    // ========================================================================
    // Filter mutations
    // ========================================================================

    pub fn toggle_category(&mut self, category: &str) -> bool {
        let selected = self.panel.toggle_category(category);
        self.queue_filter();
        selected
    }

    pub fn set_categories<I, T>(&mut self, categories: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.panel.set_categories(categories);
        self.queue_filter();
    }

    pub fn select_all_categories(&mut self) {
        self.panel.select_all_categories();
        self.queue_filter();
    }

    pub fn clear_categories(&mut self) {
        self.panel.clear_categories();
        self.queue_filter();
    }

    pub fn set_length_range(&mut self, range: ValueRange) -> Result<()> {
        self.panel.set_length_range(range)?;
        self.queue_filter();
        Ok(())
    }

    pub fn set_elevation_gain_range(&mut self, range: ValueRange) -> Result<()> {
        self.panel.set_elevation_gain_range(range)?;
        self.queue_filter();
        Ok(())
    }

    /// Reset the panel to the session bounds.
    pub fn reset_filters(&mut self) -> FilterState {
        let emitted = self.panel.reset();
        self.debouncer.push(emitted.clone());
        emitted
    }

    fn queue_filter(&mut self) {
        self.debouncer.push(self.panel.emitted());
    }

    /// Apply the pending filter if its delay has elapsed by `now`.
    ///
    /// Returns true when the layer's filter changed.
    pub fn poll_filter_at(&mut self, now: Instant) -> bool {
        match self.debouncer.poll_at(now) {
            Some(filter) => {
                self.apply(filter);
                true
            }
            None => false,
        }
    }

    pub fn poll_filter(&mut self) -> bool {
        self.poll_filter_at(Instant::now())
    }

    /// Apply the pending filter immediately.
    pub fn flush_filter(&mut self) -> bool {
        match self.debouncer.flush() {
            Some(filter) => {
                self.apply(filter);
                true
            }
            None => false,
        }
    }

    /// When the pending filter becomes due.
    pub fn filter_deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    fn apply(&mut self, filter: FilterState) {
        debug!(
            "[MapSession] Applying filter: {} categories, length {:?}, gain {:?}",
            filter.categories.len(),
            filter.length_range,
            filter.elevation_gain_range
        );
        self.layer.apply_filter(filter);
    }

    /// Filter the layer is currently rendering with.
    pub fn filter(&self) -> &FilterState {
        self.layer.filter()
    }

    pub fn panel(&self) -> &FilterPanel<S> {
        &self.panel
    }

    // ========================================================================
    // Selection
    // ========================================================================

    /// Start showing only `id`. The layer swap finishes on [`commit_transition`].
    ///
    /// [`commit_transition`]: MapSession::commit_transition
    pub fn select_track(&mut self, id: &str) -> Result<TransitionId> {
        self.engine.get(id).ok_or_not_found(id)?;
        Ok(self.layer.begin_transition(Some(id.to_string())))
    }

    /// Start returning to the full filtered view.
    pub fn deselect_track(&mut self) -> TransitionId {
        self.layer.begin_transition(None)
    }

    pub fn commit_transition(&mut self, id: TransitionId) -> bool {
        let committed = self.layer.commit(id);
        if !committed {
            debug!("[MapSession] Stale transition {:?} ignored", id);
        }
        committed
    }

    pub fn selected_track_id(&self) -> Option<&str> {
        self.layer.selected_track_id()
    }

    pub fn is_transitioning(&self) -> bool {
        self.layer.is_transitioning()
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    /// Ids of tracks the layer renders in the current viewport, sorted.
    pub fn visible_track_ids(&mut self) -> Vec<String> {
        let predicate = self.layer.predicate();
        self.engine.visible_ids(&self.viewport, &predicate)
    }

    pub fn visible_tracks(&mut self) -> Vec<&TrackFeature> {
        let predicate = self.layer.predicate();
        self.engine.visible_features(&self.viewport, &predicate)
    }

    /// Marker clusters of the visible tracks at `zoom`.
    pub fn clusters(&mut self, zoom: f64) -> Vec<Cluster> {
        let radius = self.config.cluster_radius_px;
        let predicate = self.layer.predicate();
        let visible = self.engine.visible_features(&self.viewport, &predicate);
        cluster_features(visible, zoom, radius)
    }

    /// Chart series of one track.
    pub fn chart_series(&self, id: &str) -> Result<Vec<ChartSeries>> {
        let feature = self.engine.get(id).ok_or_not_found(id)?;
        Ok(ChartSeries::all_for(feature))
    }

    pub fn engine(&self) -> &TrackEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut TrackEngine {
        &mut self.engine
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Bring local state in line with a backend change.
    pub fn handle_event(&mut self, event: &TrackEvent) {
        match event {
            TrackEvent::Deleted { id } => {
                if self.engine.remove_feature(id).is_none() {
                    return;
                }
                if self.layer.selected_track_id() == Some(id.as_str())
                    || self.layer.target_selection() == Some(id.as_str())
                {
                    self.layer.set_selection_immediate(None);
                }
                info!("[MapSession] Track {} deleted", id);
                self.set_viewport(self.viewport);
            }
            TrackEvent::Renamed { id, name } => {
                self.engine.set_track_name(id, name);
            }
            TrackEvent::Uploaded { id } => {
                // Uploaded tracks arrive with the next viewport load
                debug!("[MapSession] Track {} uploaded", id);
            }
        }
    }

    // ========================================================================
    // Map position
    // ========================================================================

    pub fn save_map_position(&mut self, center: GpsPoint, zoom: f64) -> bool {
        let position = MapPosition::now(center, zoom);
        let key = self.config.map_position_storage_key.clone();
        save_map_position(self.panel.store_mut(), &key, &position)
    }

    pub fn restore_map_position(&mut self) -> Option<MapPosition> {
        let key = self.config.map_position_storage_key.clone();
        let max_age = self.config.map_position_max_age();
        load_map_position(self.panel.store_mut(), &key, max_age)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

fn prepare(mut features: Vec<TrackFeature>) -> Vec<TrackFeature> {
    for feature in &mut features {
        backfill_elevation_up(&mut feature.properties);
    }
    features
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn feature(id: &str, lat: f64, category: &str, length_km: f64, gain: f64) -> TrackFeature {
        TrackFeature::new(
            id,
            vec![GpsPoint::new(lat, 7.0), GpsPoint::new(lat + 0.01, 7.01)],
            [category],
            length_km,
        )
        .with_elevation_gain(Some(gain))
    }

    fn viewport() -> Bounds {
        Bounds {
            min_lat: 46.0,
            max_lat: 47.0,
            min_lng: 6.5,
            max_lng: 7.5,
        }
    }

    fn open() -> MapSession<MemoryStore> {
        MapSession::open(
            MemoryStore::new(),
            SessionConfig::default(),
            viewport(),
            vec![
                feature("a", 46.1, "hiking", 5.0, 300.0),
                feature("b", 46.2, "running", 10.0, 100.0),
                feature("c", 46.3, "hiking", 20.0, 900.0),
                feature("far", 50.0, "hiking", 5.0, 300.0),
            ],
        )
    }

    fn after_delay(session: &MapSession<MemoryStore>) -> Instant {
        Instant::now() + session.config().filter_debounce() + Duration::from_millis(1)
    }

    #[test]
    fn test_open_shows_everything_in_view() {
        let mut session = open();
        assert_eq!(session.visible_track_ids(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_filter_applies_after_debounce() {
        let mut session = open();
        session.toggle_category("running");

        // Not applied yet
        assert_eq!(session.visible_track_ids().len(), 3);
        assert!(!session.poll_filter_at(Instant::now()));

        assert!(session.poll_filter_at(after_delay(&session)));
        assert_eq!(session.visible_track_ids(), vec!["a", "c"]);
    }

    #[test]
    fn test_rapid_changes_coalesce() {
        let mut session = open();
        session.set_length_range(ValueRange::new(4.0, 6.0)).unwrap();
        session.set_length_range(ValueRange::new(9.0, 11.0)).unwrap();
        assert!(session.flush_filter());
        assert_eq!(session.visible_track_ids(), vec!["b"]);
        // Nothing left to apply
        assert!(!session.flush_filter());
    }

    #[test]
    fn test_select_and_deselect() {
        let mut session = open();
        let id = session.select_track("b").unwrap();
        assert_eq!(session.visible_track_ids().len(), 3);
        assert!(session.commit_transition(id));
        assert_eq!(session.visible_track_ids(), vec!["b"]);

        let id = session.deselect_track();
        assert!(session.commit_transition(id));
        assert_eq!(session.visible_track_ids().len(), 3);

        assert!(session.select_track("missing").is_err());
    }

    #[test]
    fn test_deleted_track_clears_selection() {
        let mut session = open();
        let id = session.select_track("b").unwrap();
        session.commit_transition(id);

        session.handle_event(&TrackEvent::Deleted { id: "b".into() });
        assert_eq!(session.selected_track_id(), None);
        assert!(!session.engine().has_feature("b"));
        assert_eq!(session.visible_track_ids(), vec!["a", "c"]);
    }

    #[test]
    fn test_rename_event() {
        let mut session = open();
        session.handle_event(&TrackEvent::Renamed {
            id: "a".into(),
            name: "Morning loop".into(),
        });
        let name = session.engine().get("a").unwrap().properties.name.clone();
        assert_eq!(name.as_deref(), Some("Morning loop"));
    }

    #[test]
    fn test_load_viewport_keeps_selection() {
        let mut session = open();
        session.set_categories(["hiking"]);
        session.flush_filter();

        let north = Bounds {
            min_lat: 49.5,
            max_lat: 50.5,
            min_lng: 6.5,
            max_lng: 7.5,
        };
        session.load_viewport(north, vec![feature("n", 50.2, "cycling", 30.0, 50.0)]);
        session.flush_filter();

        let expected: BTreeSet<String> = ["hiking".to_string()].into_iter().collect();
        assert_eq!(session.panel().selection().categories, Some(expected));
        assert_eq!(session.visible_track_ids(), vec!["far"]);
    }

    #[test]
    fn test_clusters_use_visible_tracks() {
        let mut session = open();
        let clusters = session.clusters(3.0);
        let total: usize = clusters.iter().map(Cluster::len).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn test_map_position_round_trip() {
        let mut session = open();
        assert!(session.restore_map_position().is_none());
        assert!(session.save_map_position(GpsPoint::new(46.5, 7.0), 11.0));
        let restored = session.restore_map_position().unwrap();
        assert_eq!(restored.zoom, 11.0);
        assert_eq!(restored.center, GpsPoint::new(46.5, 7.0));
    }

    #[test]
    fn test_elevation_up_backfilled_on_load() {
        let mut track = TrackFeature::new("p", vec![GpsPoint::new(46.4, 7.0)], ["hiking"], 5.0);
        track.properties.elevation_profile = vec![Some(100.0), Some(160.0)];
        let session = MapSession::open(MemoryStore::new(), SessionConfig::default(), viewport(), vec![track]);
        assert_eq!(session.engine().get("p").unwrap().properties.elevation_up, Some(60.0));
        assert_eq!(session.chart_series("p").unwrap().len(), 1);
    }
}
