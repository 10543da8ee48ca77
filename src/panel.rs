//! Filter panel state: the user's selection reconciled against viewport bounds.
//!
//! The set of categories and the length/elevation extremes visible on the map
//! change as the user pans and zooms. The panel keeps the user's exact choices
//! across those changes and only clamps what it *emits*:
//!
//! - Restored selections are used verbatim. An explicitly empty category set
//!   stays empty; categories are never added or dropped because the viewport
//!   changed.
//! - Internal ranges keep the chosen numbers, so panning back to a wider area
//!   restores the original selection.
//! - Reset uses the bounds seen over the whole session, not just the current
//!   viewport.
//!
//! Every user mutation is written to storage; write failures are swallowed.

use std::collections::BTreeSet;

use log::{debug, info};

use crate::error::{Result, TrackError};
use crate::filter::{FilterBounds, FilterState};
use crate::storage::{load_filters, save_filters, FilterLoad, KeyValueStore, PersistedFilters};
use crate::ValueRange;

pub struct FilterPanel<S: KeyValueStore> {
    store: S,
    storage_key: String,

    /// Bounds of the tracks in the current viewport
    available: FilterBounds,
    /// Union of every viewport's bounds this session
    session: FilterBounds,

    // User selection, unclamped
    categories: BTreeSet<String>,
    length_range: Option<ValueRange>,
    elevation_gain_range: Option<ValueRange>,

    /// No categories chosen and nothing visible yet: categories default to
    /// the first non-empty viewport. Persisted records omit categories while
    /// this is set.
    categories_pending: bool,
    /// A record has been written (or restored); defaults filled later are
    /// written back so storage matches memory.
    has_record: bool,
}

impl<S: KeyValueStore> FilterPanel<S> {
    /// Create the panel, restoring any selection persisted under `storage_key`.
    ///
    /// Without a (valid) stored record the selection defaults to everything
    /// in `available`.
    pub fn mount(mut store: S, storage_key: &str, available: FilterBounds) -> Self {
        let session = available.clone();

        let mut loaded = None;
        let (categories, length_range, elevation_gain_range) =
            match load_filters(&mut store, storage_key) {
                FilterLoad::Restored(saved) => {
                    loaded = Some(saved.clone());
                    (
                        saved.categories,
                        saved.length_range.or(session.length),
                        saved.elevation_gain_range.or(session.elevation_gain),
                    )
                }
                FilterLoad::Missing | FilterLoad::Discarded => {
                    (None, session.length, session.elevation_gain)
                }
            };
        let restored = loaded.is_some();

        // Categories never chosen default to what is visible now, or to the
        // first non-empty viewport if nothing is
        let categories_pending = categories.is_none() && available.categories.is_empty();
        let categories = categories.unwrap_or_else(|| session.categories.clone());

        info!(
            "[FilterPanel] Mounted ({}): {} of {} categories selected",
            if restored { "restored" } else { "defaults" },
            categories.len(),
            available.categories.len()
        );

        let mut panel = Self {
            store,
            storage_key: storage_key.to_string(),
            has_record: restored,
            categories_pending,
            available,
            session,
            categories,
            length_range,
            elevation_gain_range,
        };
        if loaded.is_some_and(|saved| saved != panel.selection()) {
            debug!("[FilterPanel] Writing back defaults filled on mount");
            panel.persist();
        }
        panel
    }

    // ========================================================================
    // Viewport bounds
    // ========================================================================

    /// Replace the viewport bounds. The selection is left untouched except
    /// for filling defaults that had nothing to default to yet.
    pub fn update_available(&mut self, available: FilterBounds) {
        self.session.merge(&available);
        self.available = available;

        let mut filled = false;
        if self.length_range.is_none() && self.session.length.is_some() {
            self.length_range = self.session.length;
            filled = true;
        }
        if self.elevation_gain_range.is_none() && self.session.elevation_gain.is_some() {
            self.elevation_gain_range = self.session.elevation_gain;
            filled = true;
        }
        if self.categories_pending && !self.session.categories.is_empty() {
            self.categories = self.session.categories.clone();
            self.categories_pending = false;
            filled = true;
        }
        if filled && self.has_record {
            debug!("[FilterPanel] Writing back defaults filled from viewport");
            self.persist();
        }

        debug!(
            "[FilterPanel] Viewport bounds: {} categories, length {:?}, gain {:?}",
            self.available.categories.len(),
            self.available.length,
            self.available.elevation_gain
        );
    }

    pub fn available(&self) -> &FilterBounds {
        &self.available
    }

    pub fn session_bounds(&self) -> &FilterBounds {
        &self.session
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Replace the selected categories.
    pub fn set_categories<I, T>(&mut self, categories: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.categories = categories.into_iter().map(Into::into).collect();
        self.categories_pending = false;
        self.persist();
    }

    /// Toggle one category. Returns whether it is now selected.
    pub fn toggle_category(&mut self, category: &str) -> bool {
        let selected = if self.categories.remove(category) {
            false
        } else {
            self.categories.insert(category.to_string());
            true
        };
        self.categories_pending = false;
        self.persist();
        selected
    }

    /// Select every category seen this session.
    pub fn select_all_categories(&mut self) {
        self.set_categories(self.session.categories.clone());
    }

    pub fn clear_categories(&mut self) {
        self.set_categories(Vec::<String>::new());
    }

    pub fn set_length_range(&mut self, range: ValueRange) -> Result<()> {
        check_range(&range)?;
        self.length_range = Some(range);
        self.persist();
        Ok(())
    }

    pub fn set_elevation_gain_range(&mut self, range: ValueRange) -> Result<()> {
        check_range(&range)?;
        self.elevation_gain_range = Some(range);
        self.persist();
        Ok(())
    }

    /// Select everything seen this session and return the clamped emission.
    pub fn reset(&mut self) -> FilterState {
        self.categories = self.session.categories.clone();
        self.length_range = self.session.length;
        self.elevation_gain_range = self.session.elevation_gain;
        // Nothing seen yet: keep waiting for the first tracks
        self.categories_pending = self.session.categories.is_empty();
        self.persist();
        info!("[FilterPanel] Reset to session bounds");
        self.emitted()
    }

    // ========================================================================
    // Outputs
    // ========================================================================

    /// Filter to hand to the map layer: the selection with ranges clamped to
    /// the current viewport.
    pub fn emitted(&self) -> FilterState {
        FilterState {
            categories: self.categories.clone(),
            length_range: clamp_selection(self.length_range, self.available.length),
            elevation_gain_range: clamp_selection(
                self.elevation_gain_range,
                self.available.elevation_gain,
            ),
        }
    }

    /// The user's selection as stored, without clamping. Categories are
    /// `None` while they still wait for the first visible tracks.
    pub fn selection(&self) -> PersistedFilters {
        PersistedFilters {
            categories: (!self.categories_pending).then(|| self.categories.clone()),
            length_range: self.length_range,
            elevation_gain_range: self.elevation_gain_range,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    fn persist(&mut self) {
        let selection = self.selection();
        save_filters(&mut self.store, &self.storage_key, &selection);
        self.has_record = true;
    }
}

fn check_range(range: &ValueRange) -> Result<()> {
    if range.is_valid() {
        Ok(())
    } else {
        Err(TrackError::InvalidRange {
            min: range.min,
            max: range.max,
        })
    }
}

fn clamp_selection(selected: Option<ValueRange>, available: Option<ValueRange>) -> ValueRange {
    match (selected, available) {
        (Some(s), Some(a)) => s.clamp_to(&a),
        (Some(s), None) => s,
        (None, Some(a)) => a,
        (None, None) => ValueRange::UNBOUNDED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    const KEY: &str = "trackFilters";

    fn bounds(categories: &[&str], length: (f64, f64), gain: (f64, f64)) -> FilterBounds {
        FilterBounds {
            categories: categories.iter().map(|c| c.to_string()).collect(),
            length: Some(ValueRange::new(length.0, length.1)),
            elevation_gain: Some(ValueRange::new(gain.0, gain.1)),
        }
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_defaults_without_persisted_state() {
        let panel = FilterPanel::mount(
            MemoryStore::new(),
            KEY,
            bounds(&["hiking", "running"], (1.0, 20.0), (0.0, 900.0)),
        );
        let emitted = panel.emitted();
        assert_eq!(emitted.categories, set(&["hiking", "running"]));
        assert_eq!(emitted.length_range, ValueRange::new(1.0, 20.0));
        assert_eq!(emitted.elevation_gain_range, ValueRange::new(0.0, 900.0));
        // Nothing written until the user changes something
        assert!(panel.store().is_empty());
    }

    #[test]
    fn test_restores_verbatim() {
        let mut store = MemoryStore::new();
        store
            .set(KEY, r#"{"categories":["running"],"lengthRange":[2,8]}"#)
            .unwrap();

        let panel = FilterPanel::mount(
            store,
            KEY,
            bounds(&["cycling", "hiking"], (0.0, 50.0), (0.0, 2000.0)),
        );
        let selection = panel.selection();
        assert_eq!(selection.categories, Some(set(&["running"])));
        assert_eq!(selection.length_range, Some(ValueRange::new(2.0, 8.0)));
        // Missing range falls back to the session bounds
        assert_eq!(
            selection.elevation_gain_range,
            Some(ValueRange::new(0.0, 2000.0))
        );
    }

    #[test]
    fn test_explicit_empty_selection_stays_empty() {
        let mut store = MemoryStore::new();
        store.set(KEY, r#"{"categories":[]}"#).unwrap();

        let mut panel = FilterPanel::mount(store, KEY, bounds(&["hiking"], (0.0, 5.0), (0.0, 10.0)));
        assert!(panel.emitted().categories.is_empty());

        panel.update_available(bounds(&["hiking", "running"], (0.0, 9.0), (0.0, 10.0)));
        assert!(panel.emitted().categories.is_empty());
    }

    #[test]
    fn test_malformed_record_replaced_by_defaults() {
        let mut store = MemoryStore::new();
        store
            .set(KEY, r#"{"categories":["running"],"lengthRange":[9,1]}"#)
            .unwrap();

        let panel = FilterPanel::mount(store, KEY, bounds(&["hiking"], (0.0, 5.0), (0.0, 10.0)));
        assert_eq!(panel.emitted().categories, set(&["hiking"]));
        assert!(panel.store().get(KEY).unwrap().is_none());
    }

    #[test]
    fn test_clamps_emission_but_keeps_selection() {
        let mut panel = FilterPanel::mount(
            MemoryStore::new(),
            KEY,
            bounds(&["hiking"], (0.0, 40.0), (0.0, 1500.0)),
        );
        panel.set_length_range(ValueRange::new(5.0, 30.0)).unwrap();

        panel.update_available(bounds(&["hiking"], (8.0, 12.0), (100.0, 300.0)));
        assert_eq!(panel.emitted().length_range, ValueRange::new(8.0, 12.0));
        assert_eq!(panel.selection().length_range, Some(ValueRange::new(5.0, 30.0)));

        panel.update_available(bounds(&["hiking"], (0.0, 40.0), (0.0, 1500.0)));
        assert_eq!(panel.emitted().length_range, ValueRange::new(5.0, 30.0));
    }

    #[test]
    fn test_viewport_churn_keeps_categories() {
        let mut panel = FilterPanel::mount(
            MemoryStore::new(),
            KEY,
            bounds(&["hiking", "running"], (0.0, 10.0), (0.0, 100.0)),
        );
        panel.set_categories(["running"]);

        panel.update_available(FilterBounds::default());
        assert_eq!(panel.emitted().categories, set(&["running"]));

        panel.update_available(bounds(&["hiking", "running"], (0.0, 10.0), (0.0, 100.0)));
        assert_eq!(panel.emitted().categories, set(&["running"]));
    }

    #[test]
    fn test_reset_uses_session_bounds() {
        let mut panel = FilterPanel::mount(
            MemoryStore::new(),
            KEY,
            bounds(&["hiking"], (2.0, 10.0), (50.0, 400.0)),
        );
        panel.update_available(bounds(&["running"], (5.0, 30.0), (0.0, 100.0)));
        panel.clear_categories();

        let first = panel.reset();
        assert_eq!(first.categories, set(&["hiking", "running"]));
        // Re-clamped to the current viewport
        assert_eq!(first.length_range, ValueRange::new(5.0, 30.0));
        assert_eq!(panel.selection().length_range, Some(ValueRange::new(2.0, 30.0)));

        let second = panel.reset();
        assert_eq!(first, second);
    }

    #[test]
    fn test_toggle_and_persist() {
        let mut panel = FilterPanel::mount(
            MemoryStore::new(),
            KEY,
            bounds(&["hiking", "running"], (0.0, 10.0), (0.0, 100.0)),
        );
        assert!(!panel.toggle_category("hiking"));
        assert!(panel.toggle_category("cycling"));

        let raw = panel.store().get(KEY).unwrap().unwrap();
        let saved: PersistedFilters = serde_json::from_str(&raw).unwrap();
        assert_eq!(saved.categories, Some(set(&["cycling", "running"])));
    }

    #[test]
    fn test_rejects_invalid_range() {
        let mut panel = FilterPanel::mount(MemoryStore::new(), KEY, FilterBounds::default());
        let err = panel
            .set_elevation_gain_range(ValueRange::new(10.0, 5.0))
            .unwrap_err();
        assert!(matches!(err, TrackError::InvalidRange { .. }));
        assert!(panel.store().is_empty());
    }

    #[test]
    fn test_defaults_wait_for_first_tracks() {
        let mut panel = FilterPanel::mount(MemoryStore::new(), KEY, FilterBounds::default());
        assert_eq!(panel.emitted().length_range, ValueRange::UNBOUNDED);

        panel.update_available(bounds(&["hiking"], (1.0, 3.0), (0.0, 50.0)));
        assert_eq!(panel.emitted().categories, set(&["hiking"]));
        assert_eq!(panel.selection().length_range, Some(ValueRange::new(1.0, 3.0)));

        panel.update_available(bounds(&["hiking", "running"], (1.0, 9.0), (0.0, 50.0)));
        assert_eq!(panel.emitted().categories, set(&["hiking"]));
    }

    #[test]
    fn test_range_before_first_tracks_keeps_categories_open() {
        let mut panel = FilterPanel::mount(MemoryStore::new(), KEY, FilterBounds::default());
        panel.set_length_range(ValueRange::new(1.0, 10.0)).unwrap();

        // No categories were chosen, so none are written
        let raw = panel.store().get(KEY).unwrap().unwrap();
        assert_eq!(raw, r#"{"lengthRange":[1.0,10.0]}"#);

        panel.update_available(bounds(&["hiking"], (2.0, 6.0), (0.0, 50.0)));
        assert_eq!(panel.emitted().categories, set(&["hiking"]));

        let raw = panel.store().get(KEY).unwrap().unwrap();
        let saved: PersistedFilters = serde_json::from_str(&raw).unwrap();
        assert_eq!(saved, panel.selection());
        assert_eq!(saved.categories, Some(set(&["hiking"])));
        assert_eq!(saved.length_range, Some(ValueRange::new(1.0, 10.0)));
    }

    #[test]
    fn test_record_without_categories_defaults_on_mount() {
        let mut store = MemoryStore::new();
        store.set(KEY, r#"{"lengthRange":[1,10]}"#).unwrap();

        let panel = FilterPanel::mount(store, KEY, bounds(&["hiking", "running"], (0.0, 9.0), (0.0, 10.0)));
        assert_eq!(panel.emitted().categories, set(&["hiking", "running"]));
        assert_eq!(panel.selection().length_range, Some(ValueRange::new(1.0, 10.0)));

        // The filled defaults are stored, so a later mount over other tracks
        // keeps them
        let raw = panel.store().get(KEY).unwrap().unwrap();
        let saved: PersistedFilters = serde_json::from_str(&raw).unwrap();
        assert_eq!(saved, panel.selection());
    }

    #[test]
    fn test_reset_before_first_tracks() {
        let mut panel = FilterPanel::mount(MemoryStore::new(), KEY, FilterBounds::default());
        let emitted = panel.reset();
        assert!(emitted.categories.is_empty());
        assert_eq!(panel.selection().categories, None);

        let raw = panel.store().get(KEY).unwrap().unwrap();
        assert_eq!(raw, "{}");

        panel.update_available(bounds(&["running"], (1.0, 2.0), (0.0, 5.0)));
        assert_eq!(panel.selection().categories, Some(set(&["running"])));
    }

    #[test]
    fn test_quota_failure_does_not_break_panel() {
        let mut panel = FilterPanel::mount(
            MemoryStore::with_quota(8),
            KEY,
            bounds(&["hiking"], (0.0, 10.0), (0.0, 100.0)),
        );
        panel.set_categories(["hiking", "running"]);
        assert_eq!(panel.emitted().categories, set(&["hiking", "running"]));
        assert!(panel.store().is_empty());
    }
}
