//! Session and backend configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackError};

/// Configuration for a [`MapSession`](crate::MapSession).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Storage key of the persisted filter selection.
    /// Default: "trackFilters"
    pub filter_storage_key: String,

    /// Storage key of the last map position.
    /// Default: "mapPosition"
    pub map_position_storage_key: String,

    /// Delay used to coalesce filter emissions, in milliseconds.
    /// Default: 50
    pub filter_debounce_ms: u64,

    /// Saved map positions older than this are ignored (None = never expire).
    /// Default: None
    pub map_position_max_age_secs: Option<u64>,

    /// Marker cluster cell size in screen pixels.
    /// Default: 80
    pub cluster_radius_px: f64,

    /// Number of viewports whose filter bounds are memoized.
    /// Default: 32
    pub viewport_cache_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            filter_storage_key: "trackFilters".to_string(),
            map_position_storage_key: "mapPosition".to_string(),
            filter_debounce_ms: 50,
            map_position_max_age_secs: None,
            cluster_radius_px: 80.0,
            viewport_cache_capacity: 32,
        }
    }
}

impl SessionConfig {
    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.filter_storage_key.is_empty() || self.map_position_storage_key.is_empty() {
            return Err(TrackError::Config {
                message: "storage keys must not be empty".to_string(),
            });
        }
        if self.filter_storage_key == self.map_position_storage_key {
            return Err(TrackError::Config {
                message: "filter and map position keys must differ".to_string(),
            });
        }
        if !(self.cluster_radius_px.is_finite() && self.cluster_radius_px > 0.0) {
            return Err(TrackError::Config {
                message: format!("invalid cluster radius {}", self.cluster_radius_px),
            });
        }
        if self.viewport_cache_capacity == 0 {
            return Err(TrackError::Config {
                message: "viewport cache capacity must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn filter_debounce(&self) -> Duration {
        Duration::from_millis(self.filter_debounce_ms)
    }

    pub fn map_position_max_age(&self) -> Option<Duration> {
        self.map_position_max_age_secs.map(Duration::from_secs)
    }
}

/// Configuration for the track backend client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Base URL of the backend API, without trailing slash.
    /// Default: "http://localhost:8000/api"
    pub base_url: String,

    /// Request timeout in seconds.
    /// Default: 30
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            timeout_secs: 30,
        }
    }
}

impl HttpConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
