//! # Gym Proximity
//!
//! Proximity-triggered reminder engine for a gym membership QR app.
//!
//! This library provides:
//! - Haversine distance and near/far verdicts for a proximity target
//! - A cancellable location sampling loop
//! - Visit pattern learning (visits per weekday and per hour)
//! - Reminder scheduling with all-or-nothing replacement of armed reminders
//! - Arrival notifications debounced per dwell session
//!
//! ## Features
//!
//! - **`persistence`** - SQLite-backed key-value store
//! - **`ffi`** - Enable FFI bindings for mobile platforms (iOS/Android)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use gym_proximity::{Coordinate, ProximityTarget, geo_utils};
//!
//! let gym = ProximityTarget::new(Coordinate::new(51.5074, -0.1278), 100.0);
//! let here = Coordinate::new(51.5078, -0.1278);
//!
//! let distance = geo_utils::distance_meters(&here, &gym.coordinates);
//! assert!(distance < 100.0);
//! assert!(geo_utils::is_near(&here, &gym));
//! ```

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{ProximityError, Result};

// Engine configuration
pub mod config;
pub use config::EngineConfig;

// Geographic utilities (distance, proximity, formatting)
pub mod geo_utils;

// Spatial index over stored gym targets
pub mod targets;
pub use targets::TargetIndex;

// Key-value persistence boundary
pub mod store;
pub use store::{KeyValueStore, MemoryStore};

// SQLite-backed key-value store
#[cfg(feature = "persistence")]
pub mod persistence;
#[cfg(feature = "persistence")]
pub use persistence::SqliteStore;

// Visit pattern learning
pub mod patterns;
pub use patterns::{LastVisit, VisitEvent, VisitPatternStore, WorkoutPatterns};

// Notification dispatch boundary
pub mod notifications;
pub use notifications::{
    ArmedReminder, GatewayCommand, NotificationChannel, NotificationGateway,
    NotificationPayload, NotificationSetup, QueuedGateway, RepeatInterval,
};

// Reminder planning and arming
pub mod scheduler;
pub use scheduler::{compute_plan, ApplyReport, ReminderScheduler, ReminderSettings, ReminderTime};

// Arrival debounce per dwell session
pub mod arrival;
pub use arrival::{ArrivalTracker, Transition};

// Location sampling loop
pub mod sampler;
pub use sampler::{
    ErrorCallback, LocationSampler, PositionProvider, SampleCallback, SamplerState,
    DEFAULT_SAMPLE_INTERVAL,
};

// Stateful reminder engine (singleton with all reminder state)
pub mod engine;
pub use engine::{
    global_sample_callback, install_engine, local_now, with_engine, ReminderEngine, SampleOutcome,
    ENGINE,
};

// FFI bindings for mobile platforms (iOS/Android)
#[cfg(feature = "ffi")]
pub mod ffi;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
pub(crate) fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("GymProximityRust"),
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
pub(crate) fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude in degrees.
///
/// # Example
/// ```
/// use gym_proximity::Coordinate;
/// let point = Coordinate::new(51.5074, -0.1278); // London
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    /// Create a new coordinate.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the coordinate is finite and within latitude/longitude range.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }

    /// Validate the coordinate, returning it unchanged on success.
    pub fn validated(self) -> Result<Self> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(ProximityError::InvalidCoordinate {
                latitude: self.latitude,
                longitude: self.longitude,
            })
        }
    }
}

impl From<Coordinate> for geo::Point<f64> {
    fn from(c: Coordinate) -> Self {
        geo::Point::new(c.longitude, c.latitude)
    }
}

impl From<geo::Point<f64>> for Coordinate {
    fn from(p: geo::Point<f64>) -> Self {
        Coordinate::new(p.y(), p.x())
    }
}

/// A coordinate plus the radius (meters) within which the device counts as near.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[serde(rename_all = "camelCase")]
pub struct ProximityTarget {
    pub coordinates: Coordinate,
    pub radius_meters: f64,
}

impl ProximityTarget {
    /// Default detection radius used by new gym profiles.
    pub const DEFAULT_RADIUS_METERS: f64 = 100.0;

    pub fn new(coordinates: Coordinate, radius_meters: f64) -> Self {
        Self {
            coordinates,
            radius_meters,
        }
    }

    /// Check that the coordinate is valid and the radius is a non-negative finite number.
    pub fn validated(self) -> Result<Self> {
        self.coordinates.validated()?;
        if !self.radius_meters.is_finite() || self.radius_meters < 0.0 {
            return Err(ProximityError::ConfigError {
                message: format!("invalid proximity radius {}", self.radius_meters),
            });
        }
        Ok(self)
    }
}

/// One location reading evaluated against a target.
///
/// Transient: handed to the sample callback and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProximitySample {
    pub location: Coordinate,
    pub distance_meters: f64,
    pub is_near: bool,
    /// Device-local wall-clock time of the reading
    pub sampled_at: NaiveDateTime,
}

impl ProximitySample {
    /// Evaluate a location against a target.
    pub fn evaluate(location: Coordinate, target: &ProximityTarget, sampled_at: NaiveDateTime) -> Self {
        let distance_meters = geo_utils::distance_meters(&location, &target.coordinates);
        Self {
            location,
            distance_meters,
            is_near: distance_meters <= target.radius_meters,
            sampled_at,
        }
    }
}

/// A stored gym the user can be reminded about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct GymProfile {
    pub id: String,
    pub name: String,
    pub target: ProximityTarget,
}

impl GymProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>, target: ProximityTarget) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            target,
        }
    }
}
