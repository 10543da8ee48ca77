//! Unified error handling for the trackview library.
//!
//! Storage and network layers report failures through [`TrackError`]. Callers
//! at the persistence boundary log and swallow storage errors instead of
//! surfacing them, so most of these only reach the HTTP caller.

use thiserror::Error;

/// Unified error type for trackview operations.
#[derive(Debug, Error)]
pub enum TrackError {
    /// Track id is not known to the engine or backend
    #[error("Track '{id}' not found")]
    NotFound { id: String },

    /// Range with non-finite endpoints or min > max
    #[error("Invalid range [{min}, {max}]")]
    InvalidRange { min: f64, max: f64 },

    /// A persisted record exists but does not describe a valid state
    #[error("Invalid persisted state under '{key}': {message}")]
    InvalidPersistedState { key: String, message: String },

    /// Storage backend refused the write because it is full
    #[error("Storage quota exceeded writing '{key}' ({bytes} bytes)")]
    QuotaExceeded { key: String, bytes: usize },

    /// Generic storage read/write error
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// HTTP/API error
    #[error("HTTP error{}: {message}", .status_code.map(|c| format!(" ({})", c)).unwrap_or_default())]
    Http {
        message: String,
        status_code: Option<u16>,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(feature = "persistence")]
impl From<rusqlite::Error> for TrackError {
    fn from(e: rusqlite::Error) -> Self {
        TrackError::Storage {
            message: e.to_string(),
        }
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for TrackError {
    fn from(e: reqwest::Error) -> Self {
        TrackError::Http {
            status_code: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

/// Result type alias for trackview operations.
pub type Result<T> = std::result::Result<T, TrackError>;

/// Extension trait for converting Option to TrackError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a not-found error for the given track.
    fn ok_or_not_found(self, id: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, id: &str) -> Result<T> {
        self.ok_or_else(|| TrackError::NotFound { id: id.to_string() })
    }
}
