//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ProximityError, Result};

/// Tunables for sampling, pattern thresholds and reminder arming.
///
/// Everything has a sensible default; hosts usually only override the
/// sample interval or the staleness period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Milliseconds between location samples.
    /// Default: 30000 (balances accuracy against battery drain)
    pub sample_interval_ms: u64,

    /// Position fetch timeout in milliseconds; `None` means half the interval.
    pub position_timeout_ms: Option<u64>,

    /// Pattern-based scheduling needs strictly more visits than this.
    /// Default: 5
    pub insufficient_data_threshold: u32,

    /// Weekdays picked for pattern reminders. Default: 3
    pub top_days: usize,

    /// Hours picked for pattern reminders. Default: 2
    pub top_hours: usize,

    /// Re-run scheduling on foreground when the last pass is older than this.
    /// Default: 12 hours
    pub reschedule_staleness_secs: u64,

    /// Delay before the single retry of a failed arm. Default: 200
    pub arm_retry_backoff_ms: u64,

    /// Tag scoping every reminder this engine arms or cancels.
    pub owner_tag: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 30_000,
            position_timeout_ms: None,
            insufficient_data_threshold: 5,
            top_days: 3,
            top_hours: 2,
            reschedule_staleness_secs: 12 * 3600,
            arm_retry_backoff_ms: 200,
            owner_tag: "gym-reminders".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    /// Effective position timeout (explicit value or half the interval).
    pub fn position_timeout(&self) -> Duration {
        match self.position_timeout_ms {
            Some(ms) => Duration::from_millis(ms),
            None => self.sample_interval() / 2,
        }
    }

    pub fn reschedule_staleness(&self) -> Duration {
        Duration::from_secs(self.reschedule_staleness_secs)
    }

    pub fn arm_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.arm_retry_backoff_ms)
    }

    /// Reject values that would stall the sampler or produce empty plans.
    pub fn validate(&self) -> Result<()> {
        if self.sample_interval_ms == 0 {
            return Err(ProximityError::ConfigError {
                message: "sample_interval_ms must be greater than zero".to_string(),
            });
        }
        if self.position_timeout_ms == Some(0) {
            return Err(ProximityError::ConfigError {
                message: "position_timeout_ms must be greater than zero".to_string(),
            });
        }
        if self.top_days == 0 || self.top_days > 7 {
            return Err(ProximityError::ConfigError {
                message: format!("top_days must be in 1..=7, got {}", self.top_days),
            });
        }
        if self.top_hours == 0 || self.top_hours > 24 {
            return Err(ProximityError::ConfigError {
                message: format!("top_hours must be in 1..=24, got {}", self.top_hours),
            });
        }
        if self.owner_tag.trim().is_empty() {
            return Err(ProximityError::ConfigError {
                message: "owner_tag must not be empty".to_string(),
            });
        }
        Ok(())
    }
}
