//! # Trackview
//!
//! Filtering and viewport state for GPS track map viewers.
//!
//! This library provides:
//! - The per-feature predicate a map layer evaluates to decide what to render
//! - Filter-state reconciliation against changing viewport bounds, persisted
//!   to a key/value store
//! - Debounced filter emission and a transition state machine for layer swaps
//! - A spatial track store, marker clustering and chart series extraction
//!
//! ## Features
//!
//! - **`parallel`** - Evaluate the predicate over large feature sets with rayon
//! - **`runtime`** - Channel-driven debouncer on a tokio task
//! - **`http`** - HTTP client for the track backend
//! - **`persistence`** - SQLite-backed key/value storage
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use trackview::{Bounds, GpsPoint, MapSession, MemoryStore, SessionConfig, TrackFeature};
//!
//! let feature = TrackFeature::new(
//!     "1",
//!     vec![GpsPoint::new(46.50, 7.10), GpsPoint::new(46.51, 7.12)],
//!     ["hiking"],
//!     5.0,
//! );
//! let viewport = Bounds { min_lat: 46.0, max_lat: 47.0, min_lng: 7.0, max_lng: 8.0 };
//!
//! let mut session = MapSession::open(MemoryStore::new(), SessionConfig::default(), viewport, vec![feature]);
//! assert_eq!(session.visible_track_ids(), vec!["1".to_string()]);
//! ```

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, TrackError};

// Session and HTTP configuration
pub mod config;
pub use config::{HttpConfig, SessionConfig};

// Geographic utilities (distance, bounds, simplification)
pub mod geo_utils;

// Per-feature filter predicate
pub mod filter;
pub use filter::{
    resolve_elevation_gain, FilterBounds, FilterState, TrackPredicate, ELEVATION_GAIN_EPSILON_M,
    LENGTH_EPSILON_KM,
};

// Key/value storage and persisted records
pub mod storage;
#[cfg(feature = "persistence")]
pub use storage::SqliteStore;
pub use storage::{KeyValueStore, MapPosition, MemoryStore, PersistedFilters};

// Filter panel state reconciliation
pub mod panel;
pub use panel::FilterPanel;

// Trailing-edge debouncer for filter emission
pub mod debounce;
pub use debounce::Debouncer;

// Layer transition state machine
pub mod transition;
pub use transition::{LayerView, TransitionId};

// Spatial track store
pub mod engine;
pub use engine::{EngineStats, TrackEngine};

// Marker clustering
pub mod cluster;
pub use cluster::{cluster_features, Cluster};

// Chart series extraction
pub mod series;
pub use series::{ChartSeries, SeriesKind};

// Track event bus
pub mod events;
pub use events::{EventBus, TrackEvent};

// Geolocation error taxonomy
pub mod geolocation;
pub use geolocation::{GeolocationError, GeolocationOutcome};

// Map session context
pub mod session;
pub use session::MapSession;

// HTTP client for the track backend
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub use http::{ExportedFile, TrackApiClient, TrackSummary, UploadResult};

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use trackview::GpsPoint;
/// let point = GpsPoint::new(46.5197, 6.6323); // Lausanne
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from GPS points. Invalid points are ignored.
    pub fn from_points(points: &[GpsPoint]) -> Option<Self> {
        let mut valid = points.iter().filter(|p| p.is_valid());
        let first = valid.next()?;
        let mut bounds = Self {
            min_lat: first.latitude,
            max_lat: first.latitude,
            min_lng: first.longitude,
            max_lng: first.longitude,
        };

        for p in valid {
            bounds.min_lat = bounds.min_lat.min(p.latitude);
            bounds.max_lat = bounds.max_lat.max(p.latitude);
            bounds.min_lng = bounds.min_lng.min(p.longitude);
            bounds.max_lng = bounds.max_lng.max(p.longitude);
        }

        Some(bounds)
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> GpsPoint {
        GpsPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }

    /// Check whether a point lies inside (edges included).
    pub fn contains(&self, point: &GpsPoint) -> bool {
        point.latitude >= self.min_lat
            && point.latitude <= self.max_lat
            && point.longitude >= self.min_lng
            && point.longitude <= self.max_lng
    }

    /// Check whether two boxes overlap (touching edges count).
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min_lat <= other.max_lat
            && self.max_lat >= other.min_lat
            && self.min_lng <= other.max_lng
            && self.max_lng >= other.min_lng
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            min_lat: self.min_lat.min(other.min_lat),
            max_lat: self.max_lat.max(other.max_lat),
            min_lng: self.min_lng.min(other.min_lng),
            max_lng: self.max_lng.max(other.max_lng),
        }
    }
}

/// A closed numeric interval `[min, max]`.
///
/// Serialized as a two-element array, which is how persisted filter records
/// store ranges (`"lengthRange": [2, 8]`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    /// Interval accepting every finite value.
    pub const UNBOUNDED: ValueRange = ValueRange {
        min: f64::NEG_INFINITY,
        max: f64::INFINITY,
    };

    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Finite endpoints with `min <= max`.
    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }

    /// Inclusive containment with symmetric tolerance.
    pub fn contains_with_tolerance(&self, value: f64, epsilon: f64) -> bool {
        value >= self.min - epsilon && value <= self.max + epsilon
    }

    /// Clamp both endpoints into `bounds`.
    ///
    /// Clamping is monotone, so a valid range stays valid; a range lying
    /// entirely outside `bounds` collapses onto the nearest edge.
    pub fn clamp_to(&self, bounds: &ValueRange) -> ValueRange {
        if !(bounds.min <= bounds.max) {
            return *self;
        }
        ValueRange {
            min: self.min.clamp(bounds.min, bounds.max),
            max: self.max.clamp(bounds.min, bounds.max),
        }
    }

    /// Smallest interval containing both.
    pub fn union(&self, other: &ValueRange) -> ValueRange {
        ValueRange {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Extend the interval to include `value`.
    pub fn include(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }
}

impl From<[f64; 2]> for ValueRange {
    fn from(pair: [f64; 2]) -> Self {
        ValueRange::new(pair[0], pair[1])
    }
}

impl From<ValueRange> for [f64; 2] {
    fn from(range: ValueRange) -> Self {
        [range.min, range.max]
    }
}

/// Properties of a track feature, as served by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackProperties {
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Category tags (e.g. "hiking", "running")
    #[serde(default)]
    pub categories: BTreeSet<String>,
    /// Track length in kilometers
    #[serde(default)]
    pub length_km: f64,
    /// Total elevation gain in meters
    #[serde(default)]
    pub elevation_gain: Option<f64>,
    /// Cumulative ascent in meters, used when `elevation_gain` is unusable
    #[serde(default)]
    pub elevation_up: Option<f64>,
    /// Elevation samples in meters, one per coordinate where available
    #[serde(default)]
    pub elevation_profile: Vec<Option<f64>>,
    /// Heart rate samples in bpm
    #[serde(default)]
    pub heart_rate: Vec<Option<f64>>,
    /// Temperature samples in °C
    #[serde(default)]
    pub temperature: Vec<Option<f64>>,
}

/// A track as rendered on the map: id, geometry and properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackFeature {
    /// Backend identifier (numeric ids are stored as strings)
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    /// Ordered track coordinates
    #[serde(default)]
    pub geometry: Vec<GpsPoint>,
    #[serde(default)]
    pub properties: TrackProperties,
}

impl TrackFeature {
    /// Create a feature with the fields the filter looks at.
    pub fn new<I, S>(id: &str, geometry: Vec<GpsPoint>, categories: I, length_km: f64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.to_string(),
            geometry,
            properties: TrackProperties {
                categories: categories.into_iter().map(Into::into).collect(),
                length_km,
                ..TrackProperties::default()
            },
        }
    }

    /// Builder-style setter for the elevation gain.
    pub fn with_elevation_gain(mut self, gain: Option<f64>) -> Self {
        self.properties.elevation_gain = gain;
        self
    }

    /// Builder-style setter for the fallback ascent value.
    pub fn with_elevation_up(mut self, up: Option<f64>) -> Self {
        self.properties.elevation_up = up;
        self
    }

    /// Bounding box of the geometry.
    pub fn bounds(&self) -> Option<Bounds> {
        Bounds::from_points(&self.geometry)
    }

    /// Point used to place the track's marker: its first valid coordinate.
    pub fn anchor(&self) -> Option<GpsPoint> {
        self.geometry.iter().copied().find(GpsPoint::is_valid)
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Int(n) => n.to_string(),
        Id::Float(f) => f.to_string(),
    })
}

// ============================================================================
// Tests
// ============================================================================
