//! Configuration types for the alert engine.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::alerts::expander::ExpansionWindow;
use crate::alerts::identity::MAX_LOOKAHEAD_DAYS;
use crate::alerts::instance::DeliveryChannel;
use crate::error::{EngineError, Result};

/// Top-level configuration for the alert engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Lookahead window and minimum future lag.
    pub window: WindowConfig,
    /// Registration retry and verification settings.
    pub delivery: DeliveryConfig,
    /// Bulk reconciliation pacing.
    pub reconcile: ReconcileConfig,
    /// Snooze and out-of-stock settings.
    pub actions: ActionConfig,
}

/// Lookahead window configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Days of alerts kept registered ahead of now, today included.
    pub lookahead_days: u32,
    /// Minimum lead time for notification registrations (ms).
    pub notification_lag_ms: u64,
    /// Minimum lead time for exact alarm registrations (ms).
    ///
    /// Alarm services need a little longer to commit a registration.
    pub alarm_lag_ms: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            lookahead_days: 7,
            notification_lag_ms: 3_000,
            alarm_lag_ms: 5_000,
        }
    }
}

impl WindowConfig {
    /// Minimum future lag for instances delivered on `channel`.
    #[must_use]
    pub fn min_future_lag(&self, channel: DeliveryChannel) -> TimeDelta {
        let ms = match channel {
            DeliveryChannel::Alarm => self.alarm_lag_ms,
            DeliveryChannel::Notification | DeliveryChannel::BrowserFallback => {
                self.notification_lag_ms
            }
        };
        TimeDelta::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
    }

    /// Expansion bounds for instances delivered on `channel`.
    #[must_use]
    pub fn expansion(&self, channel: DeliveryChannel) -> ExpansionWindow {
        ExpansionWindow::new(self.lookahead_days, self.min_future_lag(channel))
    }
}

/// Delivery chain configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Notification registration attempts before giving up.
    pub registration_attempts: u32,
    /// Pause between registration attempts (ms).
    pub retry_backoff_ms: u64,
    /// Pause before re-querying the pending set after registration (ms).
    pub verification_settle_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            registration_attempts: 3,
            retry_backoff_ms: 500,
            verification_settle_ms: 300,
        }
    }
}

impl DeliveryConfig {
    #[must_use]
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    #[must_use]
    pub fn verification_settle(&self) -> Duration {
        Duration::from_millis(self.verification_settle_ms)
    }
}

/// Bulk reconciliation configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Pause between schedules during a bulk reschedule (ms).
    pub inter_schedule_pause_ms: u64,
    /// Delay between startup reconciliation and stale-alert cleanup (ms).
    pub startup_cleanup_delay_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            inter_schedule_pause_ms: 100,
            startup_cleanup_delay_ms: 2_000,
        }
    }
}

impl ReconcileConfig {
    #[must_use]
    pub fn inter_schedule_pause(&self) -> Duration {
        Duration::from_millis(self.inter_schedule_pause_ms)
    }

    #[must_use]
    pub fn startup_cleanup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_cleanup_delay_ms)
    }
}

/// Alert action configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionConfig {
    /// Minutes a snoozed alert is deferred by.
    pub snooze_minutes: u32,
    /// Local hour of the out-of-stock alert.
    pub out_of_stock_hour: u8,
    /// Local minute of the out-of-stock alert.
    pub out_of_stock_minute: u8,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            snooze_minutes: 5,
            out_of_stock_hour: 9,
            out_of_stock_minute: 0,
        }
    }
}

impl ActionConfig {
    #[must_use]
    pub fn snooze(&self) -> TimeDelta {
        TimeDelta::minutes(i64::from(self.snooze_minutes))
    }
}

impl EngineConfig {
    /// Configuration with every delay zeroed, for tests and dry runs.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            delivery: DeliveryConfig {
                retry_backoff_ms: 0,
                verification_settle_ms: 0,
                ..DeliveryConfig::default()
            },
            reconcile: ReconcileConfig {
                inter_schedule_pause_ms: 0,
                startup_cleanup_delay_ms: 0,
            },
            ..Self::default()
        }
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_LOOKAHEAD_DAYS).contains(&self.window.lookahead_days) {
            return Err(EngineError::Config(format!(
                "window.lookahead_days must be between 1 and {MAX_LOOKAHEAD_DAYS}, got {}",
                self.window.lookahead_days
            )));
        }
        if self.delivery.registration_attempts == 0 {
            return Err(EngineError::Config(
                "delivery.registration_attempts must be at least 1".to_owned(),
            ));
        }
        if self.actions.snooze_minutes == 0 {
            return Err(EngineError::Config(
                "actions.snooze_minutes must be at least 1".to_owned(),
            ));
        }
        if self.actions.out_of_stock_hour > 23 || self.actions.out_of_stock_minute > 59 {
            return Err(EngineError::Config(format!(
                "actions out-of-stock time {:02}:{:02} is out of range",
                self.actions.out_of_stock_hour, self.actions.out_of_stock_minute
            )));
        }
        Ok(())
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or fails validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when it exists, otherwise fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file is invalid.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path (`config_dir()/config.toml`).
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        crate::app_dirs::config_file()
    }
}
