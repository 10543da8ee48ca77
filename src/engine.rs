//! # Track Engine
//!
//! In-memory track store for the map view.
//!
//! ## Architecture
//!
//! The engine manages:
//! - Track features keyed by id
//! - An R-tree over track bounding boxes for viewport queries
//! - Memoized filter bounds per viewport
//!
//! The filter-bounds cache is keyed explicitly by the quantized viewport and
//! a data generation counter. Any mutation bumps the generation, so stale
//! entries can never be hit.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use log::{debug, info};
use lru::LruCache;
use rstar::{RTree, RTreeObject, AABB};

use crate::filter::{FilterBounds, TrackPredicate};
use crate::{Bounds, TrackFeature};

const DEFAULT_CACHE_CAPACITY: usize = 32;

// ============================================================================
// Core Types
// ============================================================================

/// Bounds wrapper for R-tree spatial indexing
#[derive(Debug, Clone)]
struct TrackBounds {
    track_id: String,
    bounds: Bounds,
}

impl RTreeObject for TrackBounds {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.bounds.min_lng, self.bounds.min_lat],
            [self.bounds.max_lng, self.bounds.max_lat],
        )
    }
}

/// Cache key for viewport-derived values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ViewportKey {
    generation: u64,
    min_lat: i64,
    max_lat: i64,
    min_lng: i64,
    max_lng: i64,
}

impl ViewportKey {
    // Quantized to 1e-6 degrees (~0.1 m)
    fn new(viewport: &Bounds, generation: u64) -> Self {
        let q = |v: f64| (v * 1e6).round() as i64;
        Self {
            generation,
            min_lat: q(viewport.min_lat),
            max_lat: q(viewport.max_lat),
            min_lng: q(viewport.min_lng),
            max_lng: q(viewport.max_lng),
        }
    }
}

// ============================================================================
// Track Engine
// ============================================================================

pub struct TrackEngine {
    features: HashMap<String, TrackFeature>,

    // Spatial index for viewport queries
    spatial_index: RTree<TrackBounds>,
    spatial_dirty: bool,

    // Bumped on every mutation; part of every cache key
    generation: u64,
    bounds_cache: LruCache<ViewportKey, FilterBounds>,
    cache_hits: u64,
    cache_misses: u64,
}

impl TrackEngine {
    pub fn new() -> Self {
        Self::with_cache_capacity(DEFAULT_CACHE_CAPACITY)
    }

    /// Create an engine memoizing bounds for up to `capacity` viewports.
    pub fn with_cache_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            features: HashMap::new(),
            spatial_index: RTree::new(),
            spatial_dirty: false,
            generation: 0,
            bounds_cache: LruCache::new(capacity),
            cache_hits: 0,
            cache_misses: 0,
        }
    }

    // ========================================================================
    // Track Management
    // ========================================================================

    /// Add a track, replacing any track with the same id.
    pub fn add_feature(&mut self, feature: TrackFeature) {
        self.features.insert(feature.id.clone(), feature);
        self.invalidate();
    }

    /// Add multiple tracks.
    pub fn add_features<I>(&mut self, features: I)
    where
        I: IntoIterator<Item = TrackFeature>,
    {
        let before = self.features.len();
        for feature in features {
            self.features.insert(feature.id.clone(), feature);
        }
        debug!(
            "[TrackEngine] Added tracks: {} -> {}",
            before,
            self.features.len()
        );
        self.invalidate();
    }

    /// Replace the whole track set (a fresh viewport fetch).
    pub fn replace_features<I>(&mut self, features: I)
    where
        I: IntoIterator<Item = TrackFeature>,
    {
        self.features.clear();
        self.add_features(features);
    }

    /// Remove a track.
    pub fn remove_feature(&mut self, id: &str) -> Option<TrackFeature> {
        let removed = self.features.remove(id);
        if removed.is_some() {
            self.invalidate();
        }
        removed
    }

    /// Clear all tracks and reset state.
    pub fn clear(&mut self) {
        self.features.clear();
        self.spatial_index = RTree::new();
        self.spatial_dirty = false;
        self.bounds_cache.clear();
        self.generation += 1;
    }

    pub fn get(&self, id: &str) -> Option<&TrackFeature> {
        self.features.get(id)
    }

    /// Update the display name of a stored track.
    pub fn set_track_name(&mut self, id: &str, name: &str) -> bool {
        match self.features.get_mut(id) {
            Some(feature) => {
                feature.properties.name = Some(name.to_string());
                true
            }
            None => false,
        }
    }

    pub fn has_feature(&self, id: &str) -> bool {
        self.features.contains_key(id)
    }

    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    /// All track ids, sorted.
    pub fn feature_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.features.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn invalidate(&mut self) {
        self.spatial_dirty = true;
        self.generation += 1;
        self.bounds_cache.clear();
    }

    // ========================================================================
    // Spatial Queries
    // ========================================================================

    /// Ensure spatial index is built.
    fn ensure_spatial_index(&mut self) {
        if !self.spatial_dirty {
            return;
        }

        let entries: Vec<TrackBounds> = self
            .features
            .values()
            .filter_map(|f| {
                f.bounds().map(|bounds| TrackBounds {
                    track_id: f.id.clone(),
                    bounds,
                })
            })
            .collect();

        self.spatial_index = RTree::bulk_load(entries);
        self.spatial_dirty = false;
    }

    /// Tracks whose bounding box intersects the viewport, sorted by id.
    pub fn features_in_viewport(&mut self, viewport: &Bounds) -> Vec<&TrackFeature> {
        self.ensure_spatial_index();

        let search_bounds = AABB::from_corners(
            [viewport.min_lng, viewport.min_lat],
            [viewport.max_lng, viewport.max_lat],
        );

        let mut found: Vec<&TrackFeature> = self
            .spatial_index
            .locate_in_envelope_intersecting(&search_bounds)
            .filter_map(|entry| self.features.get(&entry.track_id))
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    /// Ids of the tracks intersecting the viewport, sorted.
    pub fn query_viewport(&mut self, viewport: &Bounds) -> Vec<String> {
        self.features_in_viewport(viewport)
            .into_iter()
            .map(|f| f.id.clone())
            .collect()
    }

    /// Categories and value ranges of the tracks in the viewport (memoized).
    pub fn viewport_bounds(&mut self, viewport: &Bounds) -> FilterBounds {
        let key = ViewportKey::new(viewport, self.generation);
        if let Some(cached) = self.bounds_cache.get(&key) {
            self.cache_hits += 1;
            return cached.clone();
        }

        self.cache_misses += 1;
        let bounds = FilterBounds::from_features(self.features_in_viewport(viewport));
        self.bounds_cache.put(key, bounds.clone());
        bounds
    }

    /// Bounds over every stored track.
    pub fn all_bounds(&self) -> FilterBounds {
        FilterBounds::from_features(self.features.values())
    }

    /// Ids of tracks in the viewport that pass `predicate`, sorted.
    pub fn visible_ids(&mut self, viewport: &Bounds, predicate: &TrackPredicate) -> Vec<String> {
        let in_view = self.features_in_viewport(viewport);

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            in_view
                .par_iter()
                .filter(|f| predicate.matches(f))
                .map(|f| f.id.clone())
                .collect()
        }

        #[cfg(not(feature = "parallel"))]
        {
            predicate.matching_ids(in_view)
        }
    }

    /// Tracks in the viewport that pass `predicate`, sorted by id.
    pub fn visible_features(
        &mut self,
        viewport: &Bounds,
        predicate: &TrackPredicate,
    ) -> Vec<&TrackFeature> {
        self.features_in_viewport(viewport)
            .into_iter()
            .filter(|f| predicate.matches(f))
            .collect()
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    pub fn stats(&mut self) -> EngineStats {
        self.ensure_spatial_index();
        let stats = EngineStats {
            feature_count: self.features.len() as u32,
            indexed_count: self.spatial_index.size() as u32,
            cached_viewports: self.bounds_cache.len() as u32,
            cache_hits: self.cache_hits,
            cache_misses: self.cache_misses,
        };
        info!("[TrackEngine] {:?}", stats);
        stats
    }
}

impl Default for TrackEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Engine statistics for monitoring.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStats {
    pub feature_count: u32,
    /// Tracks with usable geometry
    pub indexed_count: u32,
    pub cached_viewports: u32,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

// ============================================================================
// Tests
// ============================================================================
