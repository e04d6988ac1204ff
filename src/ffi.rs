//! FFI bindings for mobile platforms (iOS/Android).
//!
//! The host owns location and the OS notification APIs. It feeds positions
//! in, and drains the queued notification commands after each call.
//! Timestamps cross the boundary as epoch milliseconds and are converted to
//! device-local wall-clock time here.

use std::sync::Arc;

use chrono::{NaiveDateTime, TimeZone};
use log::{error, info, warn};
use once_cell::sync::Lazy;

use crate::engine::{install_engine, local_now, with_engine, ReminderEngine};
use crate::notifications::QueuedGateway;
use crate::persistence::SqliteStore;
use crate::scheduler::ReminderSettings;
use crate::{Coordinate, EngineConfig, GymProfile};

/// Command queue shared by every engine instance in this process.
static QUEUE: Lazy<Arc<QueuedGateway>> = Lazy::new(|| Arc::new(QueuedGateway::new()));

/// Summary of one position update, for the host.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSampleSummary {
    /// Gyms the user just arrived at
    pub arrived_gym_ids: Vec<String>,
    pub notifications_delivered: u32,
    pub rescheduled: bool,
    pub warnings: Vec<String>,
}

fn local_time(timestamp_ms: i64) -> NaiveDateTime {
    chrono::Local
        .timestamp_millis_opt(timestamp_ms)
        .earliest()
        .map(|t| t.naive_local())
        .unwrap_or_else(|| {
            warn!("[FFI] Bad timestamp {}, using now", timestamp_ms);
            local_now()
        })
}

fn log_failure<T>(what: &str, result: crate::Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            error!("[FFI] {} failed: {}", what, e);
            None
        }
    }
}

/// Create the engine over a SQLite database (call once at app startup).
///
/// `config_json` may be empty to use defaults.
#[uniffi::export]
pub fn gym_engine_init(db_path: String, config_json: String) -> bool {
    crate::init_logging();

    let config: EngineConfig = if config_json.trim().is_empty() {
        EngineConfig::default()
    } else {
        match serde_json::from_str(&config_json) {
            Ok(c) => c,
            Err(e) => {
                error!("[FFI] Invalid engine config: {}", e);
                return false;
            }
        }
    };

    let store = match SqliteStore::new(&db_path) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("[FFI] Failed to open {}: {}", db_path, e);
            return false;
        }
    };

    let engine = match ReminderEngine::new(store, QUEUE.clone(), config) {
        Ok(e) => e,
        Err(e) => {
            error!("[FFI] Engine setup failed: {}", e);
            return false;
        }
    };
    if let Err(e) = engine.initialize() {
        warn!("[FFI] Channel setup failed, will retry: {}", e);
    }
    install_engine(engine);
    info!("[FFI] Engine initialized");
    true
}

/// Register notification channels (idempotent).
#[uniffi::export]
pub fn gym_engine_initialize_channels() -> bool {
    log_failure("initialize", with_engine(|e| e.initialize()).and_then(|r| r)).is_some()
}

/// Replace the stored gyms.
#[uniffi::export]
pub fn gym_engine_set_gyms(gyms: Vec<GymProfile>) {
    info!("[FFI] Setting {} gyms", gyms.len());
    log_failure("set_gyms", with_engine(|e| e.set_gyms(gyms)));
}

/// Feed one position fix.
#[uniffi::export]
pub fn gym_engine_observe_position(
    latitude: f64,
    longitude: f64,
    timestamp_ms: i64,
) -> FfiSampleSummary {
    let at = local_time(timestamp_ms);
    let location = match Coordinate::new(latitude, longitude).validated() {
        Ok(c) => c,
        Err(e) => {
            return FfiSampleSummary {
                arrived_gym_ids: Vec::new(),
                notifications_delivered: 0,
                rescheduled: false,
                warnings: vec![e.to_string()],
            }
        }
    };

    let outcomes = log_failure(
        "observe_position",
        with_engine(|e| e.observe_position(location, at)),
    )
    .unwrap_or_default();

    FfiSampleSummary {
        arrived_gym_ids: outcomes
            .iter()
            .filter(|o| o.visit_recorded)
            .map(|o| o.gym_id.clone())
            .collect(),
        notifications_delivered: outcomes.iter().filter(|o| o.notification_delivered).count()
            as u32,
        rescheduled: outcomes.iter().any(|o| o.rescheduled),
        warnings: outcomes
            .iter()
            .flat_map(|o| o.warnings.iter().map(|w| w.to_string()))
            .collect(),
    }
}

/// The stored gym containing this position, if any.
#[uniffi::export]
pub fn gym_engine_gym_at(latitude: f64, longitude: f64) -> Option<GymProfile> {
    let location = Coordinate::new(latitude, longitude);
    with_engine(|e| e.gym_at(&location).cloned()).ok().flatten()
}

/// Save settings (app blob format) and re-plan reminders.
#[uniffi::export]
pub fn gym_engine_update_settings_json(settings_json: String, timestamp_ms: i64) -> bool {
    let settings: ReminderSettings = match serde_json::from_str(&settings_json) {
        Ok(s) => s,
        Err(e) => {
            error!("[FFI] Invalid settings JSON: {}", e);
            return false;
        }
    };
    let at = local_time(timestamp_ms);
    log_failure(
        "update_settings",
        with_engine(|e| e.update_settings(settings, at)).and_then(|r| r),
    )
    .is_some()
}

#[uniffi::export]
pub fn gym_engine_settings_json() -> String {
    with_engine(|e| serde_json::to_string(e.settings()).unwrap_or_else(|_| "{}".to_string()))
        .unwrap_or_else(|_| "{}".to_string())
}

/// App came to the foreground.
#[uniffi::export]
pub fn gym_engine_on_foreground(timestamp_ms: i64) -> bool {
    let at = local_time(timestamp_ms);
    log_failure("on_foreground", with_engine(|e| e.on_foreground(at)).and_then(|r| r)).is_some()
}

#[uniffi::export]
pub fn gym_engine_reschedule(timestamp_ms: i64) -> bool {
    let at = local_time(timestamp_ms);
    log_failure("reschedule", with_engine(|e| e.reschedule(at)).and_then(|r| r)).is_some()
}

#[uniffi::export]
pub fn gym_engine_show_quick_access(gym_name: String) -> bool {
    log_failure(
        "show_quick_access",
        with_engine(|e| e.show_quick_access(&gym_name)).and_then(|r| r),
    )
    .unwrap_or(false)
}

#[uniffi::export]
pub fn gym_engine_show_motivational(timestamp_ms: i64) -> bool {
    let at = local_time(timestamp_ms);
    log_failure(
        "show_motivational",
        with_engine(|e| e.show_motivational(at)).and_then(|r| r),
    )
    .unwrap_or(false)
}

/// Learned visit patterns as JSON (app blob format).
#[uniffi::export]
pub fn gym_engine_patterns_json() -> String {
    with_engine(|e| serde_json::to_string(&e.patterns()).unwrap_or_else(|_| "{}".to_string()))
        .unwrap_or_else(|_| "{}".to_string())
}

/// Most recent visit as JSON, or `null`.
#[uniffi::export]
pub fn gym_engine_last_visit_json() -> String {
    with_engine(|e| serde_json::to_string(&e.last_visit()).unwrap_or_else(|_| "null".to_string()))
        .unwrap_or_else(|_| "null".to_string())
}

#[uniffi::export]
pub fn gym_engine_reset_patterns() -> bool {
    log_failure("reset_patterns", with_engine(|e| e.reset_patterns()).and_then(|r| r)).is_some()
}

/// Take queued notification commands as a JSON array, oldest first.
#[uniffi::export]
pub fn gym_engine_drain_commands_json() -> String {
    QUEUE.drain_json()
}
