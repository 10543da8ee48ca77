//! Geolocation results.
//!
//! Locating the user never fails loudly: the platform error is mapped onto a
//! small fixed taxonomy and handed back as a [`GeolocationOutcome`] the UI
//! can render directly.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::GpsPoint;

/// Why the user's position could not be determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GeolocationError {
    #[error("Location permission denied")]
    PermissionDenied,
    #[error("Position unavailable")]
    PositionUnavailable,
    #[error("Location request timed out")]
    Timeout,
    #[error("Geolocation is not supported")]
    Unsupported,
    #[error("Unknown geolocation error")]
    Unknown,
}

impl GeolocationError {
    /// Map a platform error code (1 denied, 2 unavailable, 3 timeout).
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => GeolocationError::PermissionDenied,
            2 => GeolocationError::PositionUnavailable,
            3 => GeolocationError::Timeout,
            _ => GeolocationError::Unknown,
        }
    }

    /// Whether asking again could succeed without user action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GeolocationError::PositionUnavailable | GeolocationError::Timeout
        )
    }
}

/// Structured result of a position request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum GeolocationOutcome {
    Located {
        position: GpsPoint,
        /// Accuracy radius in meters, when reported
        #[serde(default, skip_serializing_if = "Option::is_none")]
        accuracy_m: Option<f64>,
    },
    Failed {
        error: GeolocationError,
        message: String,
    },
}

impl GeolocationOutcome {
    pub fn located(position: GpsPoint, accuracy_m: Option<f64>) -> Self {
        if !position.is_valid() {
            return Self::failed(GeolocationError::PositionUnavailable);
        }
        GeolocationOutcome::Located {
            position,
            accuracy_m,
        }
    }

    pub fn failed(error: GeolocationError) -> Self {
        GeolocationOutcome::Failed {
            message: error.to_string(),
            error,
        }
    }

    pub fn from_code(code: u16) -> Self {
        Self::failed(GeolocationError::from_code(code))
    }

    pub fn position(&self) -> Option<GpsPoint> {
        match self {
            GeolocationOutcome::Located { position, .. } => Some(*position),
            GeolocationOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<GeolocationError> {
        match self {
            GeolocationOutcome::Located { .. } => None,
            GeolocationOutcome::Failed { error, .. } => Some(*error),
        }
    }
}

impl From<std::result::Result<GpsPoint, GeolocationError>> for GeolocationOutcome {
    fn from(result: std::result::Result<GpsPoint, GeolocationError>) -> Self {
        match result {
            Ok(p) => Self::located(p, None),
            Err(e) => Self::failed(e),
        }
    }
}
