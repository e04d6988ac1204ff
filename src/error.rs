//! Unified error handling for the proximity engine.
//!
//! Nothing in this crate is fatal to the host: errors are returned to the
//! caller or handed to the sampler's error callback, and the worst outcome is
//! that the proximity/reminder feature stays off for the session.

use thiserror::Error;

/// Unified error type for proximity engine operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProximityError {
    /// The user refused (or revoked) location access. Ends the sampler session.
    #[error("Location permission denied")]
    PermissionDenied,

    /// No position fix this tick (timeout, no signal). The loop keeps running.
    #[error("Position unavailable: {message}")]
    PositionUnavailable { message: String },

    /// The key-value store could not be read or written.
    #[error("Storage unavailable: {message}")]
    StorageUnavailable { message: String },

    /// The notification backend refused to arm a reminder.
    #[error("Scheduling conflict for reminder '{reminder_id}': {message}")]
    SchedulingConflict { reminder_id: String, message: String },

    /// A reminder time string that is not `HH:MM`.
    #[error("Invalid reminder time '{value}', expected HH:MM")]
    InvalidReminderTime { value: String },

    /// Latitude/longitude outside the valid range.
    #[error("Invalid coordinate ({latitude}, {longitude})")]
    InvalidCoordinate { latitude: f64, longitude: f64 },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// The global engine has not been initialized.
    #[error("Engine not initialized")]
    NotInitialized,
}

impl ProximityError {
    /// Errors after which the caller may simply carry on.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProximityError::PositionUnavailable { .. }
                | ProximityError::StorageUnavailable { .. }
                | ProximityError::SchedulingConflict { .. }
        )
    }

    /// Errors that terminate the current sampler session.
    pub fn ends_session(&self) -> bool {
        matches!(self, ProximityError::PermissionDenied)
    }

    pub(crate) fn storage(err: impl std::fmt::Display) -> Self {
        ProximityError::StorageUnavailable {
            message: err.to_string(),
        }
    }
}

/// Result type alias for proximity engine operations.
pub type Result<T> = std::result::Result<T, ProximityError>;
