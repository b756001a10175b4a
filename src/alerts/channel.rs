//! Alert channel seams.
//!
//! The engine never talks to a platform directly. It registers, cancels and
//! inspects alerts through the two traits here: [`AlarmChannel`] for exact
//! wake alarms and [`NotificationChannel`] for interactive notifications.
//! Hosts plug in real implementations; tests use [`super::mock`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::instance::{AlertKind, DeliveryChannel};
use crate::error::EngineError;
use crate::schedule::ChannelPreference;

/// Failure reported by an alert channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The primitive is not present or not initialised.
    #[error("channel unavailable: {0}")]
    Unavailable(String),

    /// The user has not granted the permission the primitive needs.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The primitive refused the request; a later attempt may succeed.
    #[error("registration rejected: {0}")]
    Rejected(String),

    /// The addressed alert does not exist.
    #[error("alert not found: {0}")]
    NotFound(String),
}

impl ChannelError {
    /// Returns `true` if repeating the same registration may succeed.
    ///
    /// A permission denial is terminal until the user changes a setting.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::PermissionDenied(_))
    }
}

impl From<ChannelError> for EngineError {
    fn from(e: ChannelError) -> Self {
        Self::Channel(e.to_string())
    }
}

/// Result type for channel calls.
pub type ChannelResult<T> = std::result::Result<T, ChannelError>;

/// User response to a delivered alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertAction {
    Taken,
    Snooze,
    Skip,
    Dismiss,
}

impl AlertAction {
    /// Action buttons attached to every interactive dose notification.
    pub const NOTIFICATION_ACTIONS: [Self; 3] = [Self::Taken, Self::Snooze, Self::Skip];

    /// Wire identifier used in notification action callbacks.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Taken => "taken",
            Self::Snooze => "snooze",
            Self::Skip => "skip",
            Self::Dismiss => "dismiss",
        }
    }

    /// Button label shown to the user.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Taken => "Taken",
            Self::Snooze => "Snooze 5 min",
            Self::Skip => "Skip",
            Self::Dismiss => "Dismiss",
        }
    }
}

impl fmt::Display for AlertAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertAction {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "taken" => Ok(Self::Taken),
            "snooze" => Ok(Self::Snooze),
            "skip" => Ok(Self::Skip),
            "dismiss" => Ok(Self::Dismiss),
            other => Err(EngineError::Validation(format!("unknown alert action: {other}"))),
        }
    }
}

/// Metadata attached to a registered notification so that callbacks and
/// pending queries can be traced back to their schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertExtra {
    pub schedule_id: String,
    pub kind: AlertKind,
}

/// One interactive notification to register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub instance_id: i32,
    pub title: String,
    pub body: String,
    pub trigger_at: DateTime<Utc>,
    pub actions: Vec<AlertAction>,
    /// 1 for silent reminders, 2 for alarm-preference reminders.
    pub priority: u8,
    pub extra: AlertExtra,
}

/// One exact wake alarm to register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmRequest {
    pub instance_id: i32,
    pub medication_name: String,
    pub dosage_label: String,
    /// Patient name, or `"You"` when the schedule has none.
    pub patient_label: String,
    pub trigger_at: DateTime<Utc>,
}

/// Entry of a channel's pending set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAlert {
    pub instance_id: i32,
    pub trigger_at: DateTime<Utc>,
    #[serde(default)]
    pub extra: Option<AlertExtra>,
}

/// Exact-alarm permission state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmPermission {
    pub has_permission: bool,
    /// `false` on platform versions that do not gate exact alarms.
    pub requires_permission: bool,
}

impl AlarmPermission {
    /// Returns `true` if exact alarms may be registered right now.
    #[must_use]
    pub fn allows_scheduling(self) -> bool {
        self.has_permission || !self.requires_permission
    }
}

/// Exact wake-alarm primitive.
#[async_trait]
pub trait AlarmChannel: Send + Sync {
    /// Register a full-screen alarm.
    async fn schedule_alarm(&self, request: &AlarmRequest) -> ChannelResult<()>;

    /// Cancel a previously registered alarm.
    async fn cancel_alarm(&self, instance_id: i32) -> ChannelResult<()>;

    /// Query the exact-alarm permission.
    async fn check_permission(&self) -> ChannelResult<AlarmPermission>;
}

/// Interactive notification primitive.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Register a batch of notifications.
    async fn schedule(&self, requests: &[NotificationRequest]) -> ChannelResult<()>;

    /// Cancel notifications by identifier. Unknown identifiers are ignored.
    async fn cancel(&self, instance_ids: &[i32]) -> ChannelResult<()>;

    /// Everything currently waiting to fire.
    async fn pending(&self) -> ChannelResult<Vec<PendingAlert>>;
}

/// The primitives available to the engine.
#[derive(Clone, Default)]
pub struct AlertChannels {
    pub alarm: Option<Arc<dyn AlarmChannel>>,
    pub notifications: Option<Arc<dyn NotificationChannel>>,
}

impl AlertChannels {
    /// No native primitives; alerts fall back to in-process timers.
    #[must_use]
    pub fn browser_only() -> Self {
        Self::default()
    }

    /// Native notifications without exact alarms.
    #[must_use]
    pub fn native(notifications: Arc<dyn NotificationChannel>) -> Self {
        Self {
            alarm: None,
            notifications: Some(notifications),
        }
    }

    #[must_use]
    pub fn with_alarm(mut self, alarm: Arc<dyn AlarmChannel>) -> Self {
        self.alarm = Some(alarm);
        self
    }
}

impl fmt::Debug for AlertChannels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertChannels")
            .field("alarm", &self.alarm.is_some())
            .field("notifications", &self.notifications.is_some())
            .finish()
    }
}

/// What the platform can do, resolved once when the engine starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertChannelCapabilities {
    /// Interactive notifications are available.
    pub native_platform: bool,
    /// Exact wake alarms are available.
    pub exact_alarm: bool,
}

impl AlertChannelCapabilities {
    /// Capabilities implied by the configured primitives.
    ///
    /// Exact alarms count only on a native platform.
    #[must_use]
    pub fn resolve(channels: &AlertChannels) -> Self {
        let native_platform = channels.notifications.is_some();
        Self {
            native_platform,
            exact_alarm: native_platform && channels.alarm.is_some(),
        }
    }

    /// Channel a schedule with `preference` is first attempted on.
    #[must_use]
    pub fn planned_channel(self, preference: ChannelPreference) -> DeliveryChannel {
        if !self.native_platform {
            DeliveryChannel::BrowserFallback
        } else if preference == ChannelPreference::Alarm && self.exact_alarm {
            DeliveryChannel::Alarm
        } else {
            DeliveryChannel::Notification
        }
    }
}
