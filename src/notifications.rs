//! Notification dispatch boundary.
//!
//! The engine decides *what* to show and *when*; the OS-level delivery is a
//! collaborator behind [`NotificationGateway`]. Hosts that cannot call back
//! into native code synchronously use [`QueuedGateway`] and drain its
//! command queue.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::NaiveDateTime;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{ProximityError, Result};

/// Android notification channels used by the app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationChannel {
    #[serde(rename = "gym-qr-channel")]
    GymQr,
    LocationAlerts,
    WorkoutReminders,
    QuickAccess,
}

impl NotificationChannel {
    pub const ALL: [NotificationChannel; 4] = [
        NotificationChannel::GymQr,
        NotificationChannel::LocationAlerts,
        NotificationChannel::WorkoutReminders,
        NotificationChannel::QuickAccess,
    ];

    /// Channel id registered with the OS.
    pub fn id(&self) -> &'static str {
        match self {
            NotificationChannel::GymQr => "gym-qr-channel",
            NotificationChannel::LocationAlerts => "location-alerts",
            NotificationChannel::WorkoutReminders => "workout-reminders",
            NotificationChannel::QuickAccess => "quick-access",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            NotificationChannel::GymQr => "Gym QR Access",
            NotificationChannel::LocationAlerts => "Location Alerts",
            NotificationChannel::WorkoutReminders => "Workout Reminders",
            NotificationChannel::QuickAccess => "Quick Access",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            NotificationChannel::GymQr => "Quick access to your gym QR code",
            NotificationChannel::LocationAlerts => "Alerts when you arrive at your gym",
            NotificationChannel::WorkoutReminders => "Smart workout reminders based on your patterns",
            NotificationChannel::QuickAccess => "Quick access to your gym QR code",
        }
    }

    /// Android importance level (3 = default, 4 = high).
    pub fn importance(&self) -> u8 {
        match self {
            NotificationChannel::QuickAccess => 3,
            _ => 4,
        }
    }

    pub fn vibrate(&self) -> bool {
        !matches!(self, NotificationChannel::QuickAccess)
    }
}

/// How an armed reminder repeats after first firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatInterval {
    None,
    Daily,
    Weekly,
}

/// Content of a notification, independent of when it fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub channel: NotificationChannel,
    pub title: String,
    pub message: String,
    pub big_text: Option<String>,
    /// Action the app performs when tapped (e.g. `show_qr`)
    pub action: String,
    pub gym_name: Option<String>,
    /// What produced the notification (e.g. `location_trigger`)
    pub source: String,
}

impl NotificationPayload {
    /// "You just arrived" notification.
    pub fn arrival(gym_name: &str, distance_text: &str) -> Self {
        Self {
            channel: NotificationChannel::LocationAlerts,
            title: format!("Arrived at {}", gym_name),
            message: format!("You're {} away. Tap for instant QR access!", distance_text),
            big_text: Some(format!(
                "Welcome to {}! Your membership QR code is ready. Tap this notification for instant access.",
                gym_name
            )),
            action: "show_qr".to_string(),
            gym_name: Some(gym_name.to_string()),
            source: "location_trigger".to_string(),
        }
    }

    /// Pattern-based weekly reminder.
    pub fn weekly_reminder() -> Self {
        Self {
            channel: NotificationChannel::WorkoutReminders,
            title: "Workout Reminder".to_string(),
            message: "Time for your usual workout!".to_string(),
            big_text: None,
            action: "scheduled_reminder".to_string(),
            gym_name: None,
            source: "pattern_reminder".to_string(),
        }
    }

    /// Fixed-time daily reminder.
    pub fn daily_reminder() -> Self {
        Self {
            channel: NotificationChannel::WorkoutReminders,
            title: "Workout Time!".to_string(),
            message: "Ready for your workout?".to_string(),
            big_text: None,
            action: "daily_reminder".to_string(),
            gym_name: None,
            source: "workout_reminder".to_string(),
        }
    }

    pub fn quick_access(gym_name: &str) -> Self {
        Self {
            channel: NotificationChannel::QuickAccess,
            title: "Quick QR Access".to_string(),
            message: format!("Tap for {} membership QR code", gym_name),
            big_text: Some(format!(
                "Quick access to your {} membership. Tap to display your QR code instantly.",
                gym_name
            )),
            action: "show_qr".to_string(),
            gym_name: Some(gym_name.to_string()),
            source: "quick_access".to_string(),
        }
    }

    pub fn motivational(message: &str) -> Self {
        Self {
            channel: NotificationChannel::WorkoutReminders,
            title: "Stay Motivated!".to_string(),
            message: message.to_string(),
            big_text: None,
            action: "open_app".to_string(),
            gym_name: None,
            source: "motivational".to_string(),
        }
    }
}

/// A notification registered for future delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmedReminder {
    /// Stable id within one plan (e.g. `weekly-1-18`, `daily-09:00`)
    pub id: String,
    /// Device-local wall-clock time of the first firing
    pub scheduled_at: NaiveDateTime,
    pub repeat: RepeatInterval,
    pub payload: NotificationPayload,
}

impl ArmedReminder {
    pub fn channel(&self) -> NotificationChannel {
        self.payload.channel
    }
}

/// Notification delivery collaborator.
pub trait NotificationGateway: Send + Sync {
    /// Register a channel with the OS (Android). Must tolerate repeats.
    fn create_channel(&self, channel: NotificationChannel) -> Result<()>;

    /// Show a notification immediately.
    fn deliver_now(&self, payload: &NotificationPayload) -> Result<()>;

    /// Register a reminder for future delivery under `owner_tag`.
    fn arm(&self, owner_tag: &str, reminder: &ArmedReminder) -> Result<()>;

    /// Cancel every pending reminder armed under `owner_tag`, and nothing else.
    fn cancel_all(&self, owner_tag: &str) -> Result<()>;
}

/// Process-scoped "channels configured" state.
///
/// `initialize` registers every channel once; later calls are no-ops. If
/// channel creation fails the state stays unconfigured so the next call
/// tries again.
#[derive(Debug, Default)]
pub struct NotificationSetup {
    configured: Mutex<bool>,
}

impl NotificationSetup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when this call performed the configuration.
    pub fn initialize(&self, gateway: &dyn NotificationGateway) -> Result<bool> {
        let mut configured = self
            .configured
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *configured {
            return Ok(false);
        }
        for channel in NotificationChannel::ALL {
            gateway.create_channel(channel)?;
            debug!("[Notifications] Channel created: {}", channel.id());
        }
        *configured = true;
        info!("[Notifications] Configured {} channels", NotificationChannel::ALL.len());
        Ok(true)
    }

    pub fn is_configured(&self) -> bool {
        self.configured
            .lock()
            .map(|c| *c)
            .unwrap_or(false)
    }
}

/// One call the host must perform against the OS notification API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayCommand {
    CreateChannel { channel: NotificationChannel },
    DeliverNow { payload: NotificationPayload },
    Arm { owner_tag: String, reminder: ArmedReminder },
    CancelAll { owner_tag: String },
}

#[derive(Debug, Default)]
struct QueueState {
    commands: Vec<GatewayCommand>,
    armed: HashMap<String, Vec<ArmedReminder>>,
}

/// Gateway that records commands for the host to drain, and mirrors which
/// reminders are currently armed per owner tag.
#[derive(Debug, Default)]
pub struct QueuedGateway {
    state: Mutex<QueueState>,
}

impl QueuedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, command: GatewayCommand) -> Result<std::sync::MutexGuard<'_, QueueState>> {
        let mut state = self.state.lock().map_err(|e| ProximityError::SchedulingConflict {
            reminder_id: String::new(),
            message: e.to_string(),
        })?;
        state.commands.push(command);
        Ok(state)
    }

    /// Take all pending commands, oldest first.
    pub fn drain(&self) -> Vec<GatewayCommand> {
        self.state
            .lock()
            .map(|mut s| std::mem::take(&mut s.commands))
            .unwrap_or_default()
    }

    /// Pending commands as a JSON array.
    pub fn drain_json(&self) -> String {
        serde_json::to_string(&self.drain()).unwrap_or_else(|_| "[]".to_string())
    }

    /// Reminders currently armed under `owner_tag`.
    pub fn armed(&self, owner_tag: &str) -> Vec<ArmedReminder> {
        self.state
            .lock()
            .map(|s| s.armed.get(owner_tag).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Number of immediate notifications still queued.
    pub fn pending_deliveries(&self) -> usize {
        self.state
            .lock()
            .map(|s| {
                s.commands
                    .iter()
                    .filter(|c| matches!(c, GatewayCommand::DeliverNow { .. }))
                    .count()
            })
            .unwrap_or(0)
    }
}

impl NotificationGateway for QueuedGateway {
    fn create_channel(&self, channel: NotificationChannel) -> Result<()> {
        self.push(GatewayCommand::CreateChannel { channel }).map(|_| ())
    }

    fn deliver_now(&self, payload: &NotificationPayload) -> Result<()> {
        self.push(GatewayCommand::DeliverNow {
            payload: payload.clone(),
        })
        .map(|_| ())
    }

    fn arm(&self, owner_tag: &str, reminder: &ArmedReminder) -> Result<()> {
        let mut state = self.push(GatewayCommand::Arm {
            owner_tag: owner_tag.to_string(),
            reminder: reminder.clone(),
        })?;
        let armed = state.armed.entry(owner_tag.to_string()).or_default();
        armed.retain(|r| r.id != reminder.id);
        armed.push(reminder.clone());
        Ok(())
    }

    fn cancel_all(&self, owner_tag: &str) -> Result<()> {
        let mut state = self.push(GatewayCommand::CancelAll {
            owner_tag: owner_tag.to_string(),
        })?;
        state.armed.remove(owner_tag);
        Ok(())
    }
}
