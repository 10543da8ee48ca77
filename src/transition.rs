//! Layer transition state machine.
//!
//! Changing the selected track swaps the map layer for a fresh one, and the
//! swap is not atomic: for a moment the old and new layers coexist and both
//! evaluate the same predicate. During that window the predicate runs in
//! transitioning mode (see [`crate::filter`]) so neither layer renders zero
//! features.
//!
//! ```text
//! Stable ──begin_transition──▶ Transitioning { pending, id }
//!   ▲                               │
//!   └──────── commit(id) ───────────┘   (only the latest id commits)
//! ```
//!
//! Overlapping transitions are not queued: the last one begun wins.

use log::debug;

use crate::filter::{FilterState, TrackPredicate};

/// Identifies one transition; only the most recent can commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransitionId(u64);

#[derive(Debug, Clone, PartialEq)]
enum Phase {
    Stable,
    Transitioning {
        id: TransitionId,
        pending_selection: Option<String>,
    },
}

/// What the map layer currently shows and how it filters.
#[derive(Debug, Clone)]
pub struct LayerView {
    filter: FilterState,
    selected_track_id: Option<String>,
    phase: Phase,
    next_id: u64,
}

impl LayerView {
    pub fn new(filter: FilterState) -> Self {
        Self {
            filter,
            selected_track_id: None,
            phase: Phase::Stable,
            next_id: 0,
        }
    }

    /// Predicate for the current phase.
    pub fn predicate(&self) -> TrackPredicate {
        TrackPredicate {
            filter: self.filter.clone(),
            selected_track_id: self.selected_track_id.clone(),
            transitioning: self.is_transitioning(),
        }
    }

    /// Replace the filter. Takes effect immediately in every phase.
    pub fn apply_filter(&mut self, filter: FilterState) {
        self.filter = filter;
    }

    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    /// Selection currently committed to the layer.
    pub fn selected_track_id(&self) -> Option<&str> {
        self.selected_track_id.as_deref()
    }

    /// Selection the layer will show after the running transition commits,
    /// or the committed one when stable.
    pub fn target_selection(&self) -> Option<&str> {
        match &self.phase {
            Phase::Stable => self.selected_track_id.as_deref(),
            Phase::Transitioning {
                pending_selection, ..
            } => pending_selection.as_deref(),
        }
    }

    pub fn is_transitioning(&self) -> bool {
        matches!(self.phase, Phase::Transitioning { .. })
    }

    /// Start swapping the layer to show `selection` (None = leave detail view).
    pub fn begin_transition(&mut self, selection: Option<String>) -> TransitionId {
        self.next_id += 1;
        let id = TransitionId(self.next_id);
        if self.is_transitioning() {
            debug!("[LayerView] Transition {:?} supersedes a running one", id);
        }
        self.phase = Phase::Transitioning {
            id,
            pending_selection: selection,
        };
        id
    }

    /// Finish transition `id`. Returns false if a later transition replaced it
    /// or nothing is running.
    pub fn commit(&mut self, id: TransitionId) -> bool {
        match std::mem::replace(&mut self.phase, Phase::Stable) {
            Phase::Transitioning {
                id: current,
                pending_selection,
            } if current == id => {
                self.selected_track_id = pending_selection;
                true
            }
            other => {
                self.phase = other;
                false
            }
        }
    }

    /// Set the selection without a layer swap.
    pub fn set_selection_immediate(&mut self, selection: Option<String>) {
        self.selected_track_id = selection;
        self.phase = Phase::Stable;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GpsPoint, TrackFeature};

    fn feature(id: &str) -> TrackFeature {
        TrackFeature::new(id, vec![GpsPoint::new(46.0, 7.0)], ["hiking"], 5.0)
    }

    #[test]
    fn test_select_then_commit() {
        let mut view = LayerView::new(FilterState::with_categories(["hiking"]));
        let id = view.begin_transition(Some("a".to_string()));

        // Both layers must still see every matching track
        let during = view.predicate();
        assert!(during.transitioning);
        assert!(during.matches(&feature("b")));

        assert!(view.commit(id));
        let after = view.predicate();
        assert!(!after.transitioning);
        assert!(after.matches(&feature("a")));
        assert!(!after.matches(&feature("b")));
    }

    #[test]
    fn test_last_transition_wins() {
        let mut view = LayerView::new(FilterState::with_categories(["hiking"]));
        let first = view.begin_transition(Some("a".to_string()));
        let second = view.begin_transition(None);

        assert!(!view.commit(first));
        assert!(view.is_transitioning());
        assert_eq!(view.target_selection(), None);

        assert!(view.commit(second));
        assert!(!view.is_transitioning());
        assert_eq!(view.selected_track_id(), None);
    }

    #[test]
    fn test_deselect_with_empty_categories_keeps_tracks_visible() {
        let mut view = LayerView::new(FilterState::with_categories(Vec::<String>::new()));
        view.set_selection_immediate(Some("a".to_string()));
        assert!(!view.predicate().matches(&feature("b")));

        let id = view.begin_transition(None);
        assert!(view.predicate().matches(&feature("b")));

        view.commit(id);
        assert!(!view.predicate().matches(&feature("b")));
        assert!(!view.commit(id));
    }
}
