//! # Reminder Scheduler
//!
//! Turns visit patterns and user settings into a set of armed reminders.
//!
//! ## Planning
//!
//! - With too little data (or pattern reminders switched off) the plan is one
//!   daily reminder per configured `HH:MM` time.
//! - Otherwise the busiest weekdays are crossed with the busiest hours, one
//!   weekly reminder per pair. Over-scheduling a little is preferred to
//!   missing the user's real workout slot.
//!
//! Every reminder's first firing is strictly after `now`.
//!
//! ## Applying
//!
//! Each pass replaces the whole set: everything under the engine's owner tag
//! is cancelled, then the new plan is armed. Reminders that fail to arm are
//! retried once after a short backoff and otherwise kept as pending, so a
//! later [`ReminderScheduler::retry_pending`] can finish the job without
//! cancelling again.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use chrono::{Datelike, NaiveDateTime};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{ProximityError, Result};
use crate::notifications::{ArmedReminder, NotificationGateway, NotificationPayload, RepeatInterval};
use crate::patterns::WorkoutPatterns;

// ============================================================================
// Settings
// ============================================================================

/// User-facing notification settings.
///
/// Field names match the `@notification_settings` blob stored by the app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReminderSettings {
    #[serde(rename = "locationReminders")]
    pub location_reminders_enabled: bool,
    #[serde(rename = "workoutReminders")]
    pub workout_reminders_enabled: bool,
    #[serde(rename = "quickAccess")]
    pub quick_access_enabled: bool,
    pub motivational_messages: bool,
    pub weekly_stats: bool,
    /// Fallback reminder times, `HH:MM`, in display order
    pub reminder_times: Vec<String>,
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            location_reminders_enabled: true,
            workout_reminders_enabled: true,
            quick_access_enabled: true,
            motivational_messages: true,
            weekly_stats: false,
            reminder_times: vec!["09:00".to_string(), "18:00".to_string()],
        }
    }
}

impl ReminderSettings {
    /// Parse every reminder time, failing on the first malformed entry.
    pub fn parsed_times(&self) -> Result<Vec<ReminderTime>> {
        self.reminder_times.iter().map(|t| t.parse()).collect()
    }

    pub fn validate(&self) -> Result<()> {
        self.parsed_times().map(|_| ())
    }
}

/// A wall-clock time of day, `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReminderTime {
    pub hour: u32,
    pub minute: u32,
}

impl FromStr for ReminderTime {
    type Err = ProximityError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ProximityError::InvalidReminderTime {
            value: s.to_string(),
        };
        let (h, m) = s.trim().split_once(':').ok_or_else(invalid)?;
        if h.is_empty() || m.len() != 2 {
            return Err(invalid());
        }
        let hour: u32 = h.parse().map_err(|_| invalid())?;
        let minute: u32 = m.parse().map_err(|_| invalid())?;
        if hour > 23 || minute > 59 {
            return Err(invalid());
        }
        Ok(Self { hour, minute })
    }
}

impl fmt::Display for ReminderTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

// ============================================================================
// Planning
// ============================================================================

/// Next `time` strictly after `now` (today or tomorrow).
fn next_daily(now: NaiveDateTime, time: ReminderTime) -> Option<NaiveDateTime> {
    let candidate = now.date().and_hms_opt(time.hour, time.minute, 0)?;
    if candidate <= now {
        candidate.checked_add_signed(chrono::Duration::days(1))
    } else {
        Some(candidate)
    }
}

/// Next `day_of_week` (0 = Sunday) at `hour:00` strictly after `now`.
fn next_weekly(now: NaiveDateTime, day_of_week: u8, hour: u8) -> Option<NaiveDateTime> {
    let today = now.weekday().num_days_from_sunday() as i64;
    let days_ahead = (day_of_week as i64 + 7 - today) % 7;
    let date = now
        .date()
        .checked_add_signed(chrono::Duration::days(days_ahead))?;
    let candidate = date.and_hms_opt(hour as u32, 0, 0)?;
    if candidate <= now {
        candidate.checked_add_signed(chrono::Duration::days(7))
    } else {
        Some(candidate)
    }
}

/// Move a reminder's first firing forward by whole repeat periods until it
/// is strictly after `now`. `None` for a one-shot reminder that has passed.
fn roll_forward(mut reminder: ArmedReminder, now: NaiveDateTime) -> Option<ArmedReminder> {
    if reminder.scheduled_at > now {
        return Some(reminder);
    }
    let period_days = match reminder.repeat {
        RepeatInterval::Daily => 1,
        RepeatInterval::Weekly => 7,
        RepeatInterval::None => return None,
    };
    let behind_days = now.signed_duration_since(reminder.scheduled_at).num_days();
    let steps = behind_days / period_days + 1;
    reminder.scheduled_at = reminder
        .scheduled_at
        .checked_add_signed(chrono::Duration::days(steps * period_days))?;
    Some(reminder)
}

/// Decide which reminders should be armed.
///
/// Pure: reads nothing but its arguments.
pub fn compute_plan(
    patterns: &WorkoutPatterns,
    settings: &ReminderSettings,
    now: NaiveDateTime,
    config: &EngineConfig,
) -> Vec<ArmedReminder> {
    let use_patterns = settings.workout_reminders_enabled
        && patterns.total_visits > config.insufficient_data_threshold;

    if use_patterns {
        pattern_plan(patterns, now, config)
    } else {
        fallback_plan(settings, now)
    }
}

fn pattern_plan(
    patterns: &WorkoutPatterns,
    now: NaiveDateTime,
    config: &EngineConfig,
) -> Vec<ArmedReminder> {
    let days = patterns.preferred_days(config.top_days);
    let hours = patterns.preferred_hours(config.top_hours);
    debug!(
        "[Scheduler] Pattern plan: days {:?} x hours {:?}",
        days, hours
    );

    let mut plan = Vec::with_capacity(days.len() * hours.len());
    for &day in &days {
        for &hour in &hours {
            if let Some(scheduled_at) = next_weekly(now, day, hour) {
                plan.push(ArmedReminder {
                    id: format!("weekly-{}-{}", day, hour),
                    scheduled_at,
                    repeat: RepeatInterval::Weekly,
                    payload: NotificationPayload::weekly_reminder(),
                });
            }
        }
    }
    plan
}

fn fallback_plan(settings: &ReminderSettings, now: NaiveDateTime) -> Vec<ArmedReminder> {
    let mut seen = HashSet::new();
    let mut plan = Vec::with_capacity(settings.reminder_times.len());

    for raw in &settings.reminder_times {
        let time: ReminderTime = match raw.parse() {
            Ok(t) => t,
            Err(e) => {
                warn!("[Scheduler] Skipping reminder time: {}", e);
                continue;
            }
        };
        if !seen.insert(time) {
            continue;
        }
        if let Some(scheduled_at) = next_daily(now, time) {
            plan.push(ArmedReminder {
                id: format!("daily-{}", time),
                scheduled_at,
                repeat: RepeatInterval::Daily,
                payload: NotificationPayload::daily_reminder(),
            });
        }
    }
    plan
}

// ============================================================================
// Applying
// ============================================================================

/// Outcome of an apply or retry pass.
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    /// Whether this pass cancelled the previous set
    pub cancelled: bool,
    /// Reminders armed by this pass
    pub armed: usize,
    /// Reminders still waiting to be armed
    pub pending: usize,
    /// Non-fatal arming failures (after the retry)
    pub warnings: Vec<ProximityError>,
}

impl ApplyReport {
    pub fn is_complete(&self) -> bool {
        self.pending == 0
    }
}

/// Tracks the reminder set this engine owns and replaces it atomically.
#[derive(Debug)]
pub struct ReminderScheduler {
    owner_tag: String,
    retry_backoff: Duration,
    armed: Vec<ArmedReminder>,
    pending: Vec<ArmedReminder>,
    last_applied_at: Option<NaiveDateTime>,
}

impl ReminderScheduler {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            owner_tag: config.owner_tag.clone(),
            retry_backoff: config.arm_retry_backoff(),
            armed: Vec::new(),
            pending: Vec::new(),
            last_applied_at: None,
        }
    }

    pub fn set_config(&mut self, config: &EngineConfig) {
        self.owner_tag = config.owner_tag.clone();
        self.retry_backoff = config.arm_retry_backoff();
    }

    pub fn owner_tag(&self) -> &str {
        &self.owner_tag
    }

    /// Reminders this scheduler has successfully armed.
    pub fn armed(&self) -> &[ArmedReminder] {
        &self.armed
    }

    /// Reminders from the latest plan that are not armed yet.
    pub fn pending(&self) -> &[ArmedReminder] {
        &self.pending
    }

    /// When the last plan was applied (cancel succeeded).
    pub fn last_applied_at(&self) -> Option<NaiveDateTime> {
        self.last_applied_at
    }

    /// Replace the armed set with `plan`.
    ///
    /// Fails only when the cancel step fails; in that case nothing changed
    /// and the previous set is still considered armed.
    pub fn apply(
        &mut self,
        gateway: &dyn NotificationGateway,
        plan: Vec<ArmedReminder>,
        now: NaiveDateTime,
    ) -> Result<ApplyReport> {
        if let Err(e) = gateway.cancel_all(&self.owner_tag) {
            error!(
                "[Scheduler] Failed to cancel reminders for '{}': {}",
                self.owner_tag, e
            );
            return Err(e);
        }

        let previous = self.armed.len() + self.pending.len();
        self.armed.clear();
        self.pending = plan;
        self.last_applied_at = Some(now);

        let mut report = self.arm_pending(gateway);
        report.cancelled = true;
        info!(
            "[Scheduler] Replaced {} reminders with {} ({} pending)",
            previous, report.armed, report.pending
        );
        Ok(report)
    }

    /// Arm whatever the last apply could not, without cancelling anything.
    ///
    /// Pending reminders whose first firing is no longer after `now` are
    /// moved forward by whole repeat periods first. Past one-shot reminders
    /// are dropped.
    pub fn retry_pending(
        &mut self,
        gateway: &dyn NotificationGateway,
        now: NaiveDateTime,
    ) -> ApplyReport {
        if self.pending.is_empty() {
            return ApplyReport::default();
        }
        self.pending = std::mem::take(&mut self.pending)
            .into_iter()
            .filter_map(|reminder| {
                let id = reminder.id.clone();
                let rolled = roll_forward(reminder, now);
                if rolled.is_none() {
                    warn!("[Scheduler] Dropping pending reminder {}: already past", id);
                }
                rolled
            })
            .collect();
        debug!("[Scheduler] Retrying {} pending reminders", self.pending.len());
        self.arm_pending(gateway)
    }

    fn arm_pending(&mut self, gateway: &dyn NotificationGateway) -> ApplyReport {
        let mut report = ApplyReport::default();
        let mut still_pending = Vec::new();

        for reminder in std::mem::take(&mut self.pending) {
            match self.arm_with_retry(gateway, &reminder) {
                Ok(()) => {
                    report.armed += 1;
                    self.armed.push(reminder);
                }
                Err(e) => {
                    report.warnings.push(e);
                    still_pending.push(reminder);
                }
            }
        }

        self.pending = still_pending;
        report.pending = self.pending.len();
        report
    }

    fn arm_with_retry(
        &self,
        gateway: &dyn NotificationGateway,
        reminder: &ArmedReminder,
    ) -> Result<()> {
        let first = match gateway.arm(&self.owner_tag, reminder) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        if !self.retry_backoff.is_zero() && tokio::runtime::Handle::try_current().is_ok() {
            // Sleeping here would stall a runtime worker; leave it pending
            warn!(
                "[Scheduler] Arming {} failed ({}), deferred to the next retry",
                reminder.id, first
            );
            return Err(ProximityError::SchedulingConflict {
                reminder_id: reminder.id.clone(),
                message: first.to_string(),
            });
        }
        warn!(
            "[Scheduler] Arming {} failed ({}), retrying after {:?}",
            reminder.id, first, self.retry_backoff
        );
        if !self.retry_backoff.is_zero() {
            thread::sleep(self.retry_backoff);
        }
        gateway.arm(&self.owner_tag, reminder).map_err(|e| {
            error!("[Scheduler] Arming {} failed again: {}", reminder.id, e);
            ProximityError::SchedulingConflict {
                reminder_id: reminder.id.clone(),
                message: e.to_string(),
            }
        })
    }
}
