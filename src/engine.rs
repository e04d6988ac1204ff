//! # Reminder Engine
//!
//! Stateful engine that owns all reminder state: settings, visit patterns,
//! the armed reminder set, per-gym arrival state, and the stored gyms.
//!
//! The engine is driven from outside:
//! - the location sampler feeds it samples ([`ReminderEngine::observe_sample`])
//! - the host calls it on settings edits and app foreground
//!
//! All time inputs are device-local wall-clock times passed in by the caller.

use std::sync::{Arc, Mutex};

use chrono::{Datelike, Local, NaiveDateTime};
use log::{debug, error, info, warn};
use once_cell::sync::Lazy;

use crate::arrival::{ArrivalTracker, Transition};
use crate::config::EngineConfig;
use crate::error::{ProximityError, Result};
use crate::geo_utils;
use crate::notifications::{NotificationGateway, NotificationPayload, NotificationSetup};
use crate::patterns::{LastVisit, VisitPatternStore, WorkoutPatterns};
use crate::sampler::SampleCallback;
use crate::scheduler::{compute_plan, ApplyReport, ReminderScheduler, ReminderSettings};
use crate::store::{self, KeyValueStore, NOTIFICATION_SETTINGS_KEY};
use crate::targets::TargetIndex;
use crate::{Coordinate, GymProfile, ProximitySample};

const MOTIVATIONAL_MESSAGES: [&str; 5] = [
    "Every workout counts! 💪",
    "You're stronger than yesterday! 🔥",
    "Consistency is key to success! ⭐",
    "Your future self will thank you! 🙌",
    "One rep closer to your goals! 🎯",
];

/// What the engine did with one sample.
#[derive(Debug, Clone)]
pub struct SampleOutcome {
    pub gym_id: String,
    pub transition: Transition,
    pub visit_recorded: bool,
    pub notification_delivered: bool,
    pub rescheduled: bool,
    /// Non-fatal failures (storage writes, delivery, arming)
    pub warnings: Vec<ProximityError>,
}

impl SampleOutcome {
    fn new(gym_id: &str, transition: Transition) -> Self {
        Self {
            gym_id: gym_id.to_string(),
            transition,
            visit_recorded: false,
            notification_delivered: false,
            rescheduled: false,
            warnings: Vec::new(),
        }
    }
}

// ============================================================================
// Reminder Engine
// ============================================================================

pub struct ReminderEngine {
    store: Arc<dyn KeyValueStore>,
    gateway: Arc<dyn NotificationGateway>,
    config: EngineConfig,
    settings: ReminderSettings,
    patterns: VisitPatternStore,
    scheduler: ReminderScheduler,
    arrivals: ArrivalTracker,
    gyms: TargetIndex,
    setup: NotificationSetup,
}

impl ReminderEngine {
    /// Build an engine, loading settings and patterns from `store`.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        gateway: Arc<dyn NotificationGateway>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let settings: ReminderSettings =
            store::load_json(store.as_ref(), NOTIFICATION_SETTINGS_KEY);
        let patterns = VisitPatternStore::open(Arc::clone(&store));
        let scheduler = ReminderScheduler::new(&config);

        info!(
            "[ReminderEngine] Created (owner tag '{}', {} visits on record)",
            config.owner_tag,
            patterns.total_visits()
        );

        Ok(Self {
            store,
            gateway,
            config,
            settings,
            patterns,
            scheduler,
            arrivals: ArrivalTracker::new(),
            gyms: TargetIndex::new(),
            setup: NotificationSetup::new(),
        })
    }

    /// Register notification channels. Safe to call repeatedly.
    pub fn initialize(&self) -> Result<bool> {
        self.setup.initialize(self.gateway.as_ref())
    }

    pub fn is_initialized(&self) -> bool {
        self.setup.is_configured()
    }

    pub fn gateway(&self) -> &Arc<dyn NotificationGateway> {
        &self.gateway
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: EngineConfig) -> Result<()> {
        config.validate()?;
        self.scheduler.set_config(&config);
        self.config = config;
        Ok(())
    }

    pub fn settings(&self) -> &ReminderSettings {
        &self.settings
    }

    /// Persist new settings and re-plan reminders.
    ///
    /// Fails only if the old reminders could not be cancelled. A failed
    /// settings write is reported as a warning, and is logged even when the
    /// cancel error is what gets returned.
    pub fn update_settings(
        &mut self,
        settings: ReminderSettings,
        now: NaiveDateTime,
    ) -> Result<ApplyReport> {
        if let Err(e) = settings.validate() {
            warn!("[ReminderEngine] Settings contain {}; entry will be skipped", e);
        }
        let saved = store::save_json(self.store.as_ref(), NOTIFICATION_SETTINGS_KEY, &settings);
        self.settings = settings;

        let rescheduled = self.reschedule(now);
        if let Err(e) = &saved {
            error!("[ReminderEngine] Failed to save settings: {}", e);
        }
        let mut report = rescheduled?;
        if let Err(e) = saved {
            report.warnings.push(e);
        }
        Ok(report)
    }

    // ========================================================================
    // Gyms
    // ========================================================================

    pub fn set_gyms(&mut self, gyms: Vec<GymProfile>) {
        self.arrivals.clear();
        self.gyms = TargetIndex::from_gyms(gyms);
    }

    pub fn add_gym(&mut self, gym: GymProfile) {
        self.gyms.insert(gym);
    }

    pub fn remove_gym(&mut self, gym_id: &str) -> Option<GymProfile> {
        self.arrivals.forget(gym_id);
        self.gyms.remove(gym_id)
    }

    pub fn gyms(&self) -> &TargetIndex {
        &self.gyms
    }

    /// The stored gym whose detection circle contains `location`, closest first.
    pub fn gym_at(&self, location: &Coordinate) -> Option<&GymProfile> {
        self.gyms
            .find_containing(location)
            .into_iter()
            .next()
            .map(|(gym, _)| gym)
    }

    // ========================================================================
    // Samples
    // ========================================================================

    /// Apply one sample for `gym`.
    ///
    /// On arrival the visit is counted and, if enabled, one arrival
    /// notification is shown for the dwell session. When the visit takes the
    /// pattern count past the threshold the reminders are re-planned.
    ///
    /// Runs synchronously. Off a tokio runtime a re-plan may block for the
    /// arm retry backoff; on a runtime thread failed arms are left pending
    /// for [`ReminderEngine::on_foreground`] instead.
    pub fn observe_sample(&mut self, gym: &GymProfile, sample: &ProximitySample) -> SampleOutcome {
        let transition = self.arrivals.observe(&gym.id, sample.is_near);
        let mut outcome = SampleOutcome::new(&gym.id, transition);

        if transition == Transition::Arrived {
            self.record_arrival(gym, sample.sampled_at, &mut outcome);
            if !self.settings.location_reminders_enabled {
                // Session consumed; enabling later does not fire mid-dwell
                self.arrivals.mark_notified(&gym.id);
            }
        }

        // Near samples retry a delivery that failed earlier in the session
        if sample.is_near && self.arrivals.should_notify(&gym.id) {
            let payload =
                NotificationPayload::arrival(&gym.name, &geo_utils::format_distance(sample.distance_meters));
            match self.gateway.deliver_now(&payload) {
                Ok(()) => {
                    self.arrivals.mark_notified(&gym.id);
                    outcome.notification_delivered = true;
                    info!("[ReminderEngine] Arrival notification for {}", gym.name);
                }
                Err(e) => {
                    warn!("[ReminderEngine] Arrival notification failed: {}", e);
                    outcome.warnings.push(e);
                }
            }
        }

        outcome
    }

    /// Evaluate a raw position against the stored gyms.
    ///
    /// At most one gym is active for a position: the one the user is
    /// already dwelling at if it still contains them, else the nearest
    /// containing gym. Every other gym with an open session gets a far
    /// sample, so overlapping circles never count one arrival twice.
    /// Outcomes are returned only for gyms that were sampled.
    pub fn observe_position(&mut self, location: Coordinate, at: NaiveDateTime) -> Vec<SampleOutcome> {
        let containing = self.gyms.find_containing(&location);
        let active = containing
            .iter()
            .find(|(gym, _)| self.arrivals.is_near(&gym.id))
            .or_else(|| containing.first())
            .map(|(gym, _)| gym.id.clone());

        let touched: Vec<GymProfile> = self
            .gyms
            .iter()
            .filter(|gym| active.as_deref() == Some(gym.id.as_str()) || self.arrivals.is_near(&gym.id))
            .cloned()
            .collect();

        touched
            .iter()
            .map(|gym| {
                let mut sample = ProximitySample::evaluate(location, &gym.target, at);
                if active.as_deref() != Some(gym.id.as_str()) {
                    sample.is_near = false;
                }
                self.observe_sample(gym, &sample)
            })
            .collect()
    }

    fn record_arrival(&mut self, gym: &GymProfile, at: NaiveDateTime, outcome: &mut SampleOutcome) {
        let threshold = self.config.insufficient_data_threshold;
        let before = self.patterns.total_visits();

        let (_, snapshot, written) = self.patterns.record_visit(at);
        outcome.visit_recorded = true;
        if let Err(e) = written {
            outcome.warnings.push(e);
        }
        if let Err(e) = self.patterns.record_last_visit(&gym.name, at) {
            warn!("[ReminderEngine] Failed to save last visit: {}", e);
            outcome.warnings.push(e);
        }

        if before <= threshold && snapshot.total_visits > threshold {
            info!(
                "[ReminderEngine] {} visits recorded, switching to pattern reminders",
                snapshot.total_visits
            );
            match self.reschedule(at) {
                Ok(report) => {
                    outcome.rescheduled = true;
                    outcome.warnings.extend(report.warnings);
                }
                Err(e) => outcome.warnings.push(e),
            }
        }
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Re-plan and replace the armed reminders.
    pub fn reschedule(&mut self, now: NaiveDateTime) -> Result<ApplyReport> {
        let plan = compute_plan(&self.patterns.load(), &self.settings, now, &self.config);
        debug!("[ReminderEngine] Planned {} reminders", plan.len());
        self.scheduler.apply(self.gateway.as_ref(), plan, now)
    }

    /// App came to the foreground.
    ///
    /// Re-plans when the last pass is older than the staleness period (or
    /// never ran); otherwise only retries reminders that failed to arm.
    /// Returns `None` when there was nothing to do.
    pub fn on_foreground(&mut self, now: NaiveDateTime) -> Result<Option<ApplyReport>> {
        let stale = match self.scheduler.last_applied_at() {
            None => true,
            Some(last) => match (now - last).to_std() {
                Ok(elapsed) => elapsed >= self.config.reschedule_staleness(),
                // Clock went backwards
                Err(_) => true,
            },
        };

        if stale {
            return self.reschedule(now).map(Some);
        }
        if !self.scheduler.pending().is_empty() {
            return Ok(Some(self.scheduler.retry_pending(self.gateway.as_ref(), now)));
        }
        Ok(None)
    }

    pub fn scheduler(&self) -> &ReminderScheduler {
        &self.scheduler
    }

    // ========================================================================
    // Immediate notifications
    // ========================================================================

    /// Show the quick-access notification. Returns `false` when disabled.
    pub fn show_quick_access(&self, gym_name: &str) -> Result<bool> {
        if !self.settings.quick_access_enabled {
            return Ok(false);
        }
        self.gateway
            .deliver_now(&NotificationPayload::quick_access(gym_name))?;
        Ok(true)
    }

    /// Show the motivational message for `now`'s day. Returns `false` when disabled.
    pub fn show_motivational(&self, now: NaiveDateTime) -> Result<bool> {
        if !self.settings.motivational_messages {
            return Ok(false);
        }
        let message = MOTIVATIONAL_MESSAGES[now.ordinal0() as usize % MOTIVATIONAL_MESSAGES.len()];
        self.gateway
            .deliver_now(&NotificationPayload::motivational(message))?;
        Ok(true)
    }

    // ========================================================================
    // Patterns
    // ========================================================================

    pub fn patterns(&self) -> WorkoutPatterns {
        self.patterns.load()
    }

    pub fn last_visit(&self) -> Option<LastVisit> {
        self.patterns.last_visit()
    }

    /// Clear all learned patterns (debug/testing).
    pub fn reset_patterns(&mut self) -> Result<()> {
        self.patterns.reset()
    }
}

// ============================================================================
// Global Singleton
// ============================================================================

/// Process-wide engine, installed once by the host.
pub static ENGINE: Lazy<Mutex<Option<ReminderEngine>>> = Lazy::new(|| Mutex::new(None));

/// Install (or replace) the global engine.
pub fn install_engine(engine: ReminderEngine) {
    let mut slot = ENGINE.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    *slot = Some(engine);
}

/// Run `f` against the global engine.
pub fn with_engine<F, R>(f: F) -> Result<R>
where
    F: FnOnce(&mut ReminderEngine) -> R,
{
    let mut slot = ENGINE.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    slot.as_mut().map(f).ok_or(ProximityError::NotInitialized)
}

/// Sample callback that feeds the global engine for `gym`.
pub fn global_sample_callback(gym: GymProfile) -> SampleCallback {
    Arc::new(move |sample: ProximitySample| {
        if let Err(e) = with_engine(|engine| engine.observe_sample(&gym, &sample)) {
            warn!("[ReminderEngine] Dropping sample: {}", e);
        }
    })
}

/// Current device-local wall-clock time.
pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}
