//! Concrete alert instances and the UI-facing notification records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::schedule::MedicationSchedule;

/// Delivery path an instance is (or will be) registered through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryChannel {
    /// Exact wake alarm.
    Alarm,
    /// Interactive notification with Taken / Snooze / Skip actions.
    Notification,
    /// Same-process timer used when no native platform is present.
    BrowserFallback,
}

/// Lifecycle of an [`AlertInstance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Scheduled,
    Delivered,
    Acted,
    Cancelled,
}

/// Why an instance exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertKind {
    /// Regular recurrence alert for one day offset.
    Dose,
    /// Re-fire of a snoozed alert. `generation` counts consecutive snoozes.
    Snooze { generation: u32 },
    /// One-shot alert raised when stock reaches zero.
    OutOfStock,
}

/// One concrete future firing derived from a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertInstance {
    pub schedule_id: String,
    /// Day offset within the lookahead window (0 = today).
    pub day_offset: u32,
    /// Platform-safe identifier handed to the alert channel.
    pub instance_id: i32,
    /// Identifier of the alert this one derives from (itself for dose and
    /// out-of-stock alerts, the snoozed alert's root for snoozes).
    pub root_id: i32,
    pub kind: AlertKind,
    pub trigger_at: DateTime<Utc>,
    pub channel: DeliveryChannel,
    pub status: InstanceStatus,
}

impl AlertInstance {
    /// Returns `true` while the instance can still fire or be acted upon.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self.status, InstanceStatus::Scheduled | InstanceStatus::Delivered)
    }

    /// Returns `true` once the alert has reached the user: reported delivered,
    /// or its trigger has passed.
    #[must_use]
    pub fn has_fired(&self, now: DateTime<Utc>) -> bool {
        self.status == InstanceStatus::Delivered
            || (self.status == InstanceStatus::Scheduled && self.trigger_at <= now)
    }

    /// Local calendar date of the trigger in the given zone.
    #[must_use]
    pub fn trigger_date<Tz: chrono::TimeZone>(&self, tz: &Tz) -> NaiveDate {
        self.trigger_at.with_timezone(tz).date_naive()
    }
}

/// Kind of entry shown in the pending-notifications list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Dose,
    Snooze,
    OutOfStock,
    /// In-app low-stock reminder; never registered with a channel.
    Refill,
}

impl From<AlertKind> for RecordKind {
    fn from(kind: AlertKind) -> Self {
        match kind {
            AlertKind::Dose => Self::Dose,
            AlertKind::Snooze { .. } => Self::Snooze,
            AlertKind::OutOfStock => Self::OutOfStock,
        }
    }
}

/// UI status of a notification record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Delivered,
    Taken,
    Skipped,
    Snoozed,
    Dismissed,
    Cancelled,
}

/// Pending-alert summary kept for the UI.
///
/// Records are a cache of what the engine registered. The alert channel
/// stays authoritative for what will actually fire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Channel identifier, absent for in-app refill reminders.
    pub instance_id: Option<i32>,
    pub schedule_id: String,
    pub medication_name: String,
    #[serde(default)]
    pub patient_name: String,
    pub kind: RecordKind,
    pub message: String,
    #[serde(default)]
    pub trigger_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub channel: Option<DeliveryChannel>,
    /// Root of the alert's snooze lineage.
    #[serde(default)]
    pub root_id: Option<i32>,
    /// Snooze generation; `0` for dose and out-of-stock alerts.
    #[serde(default)]
    pub generation: u32,
    #[serde(default)]
    pub day_offset: u32,
    pub status: RecordStatus,
}

impl NotificationRecord {
    /// Record for a registered instance.
    #[must_use]
    pub fn for_instance(schedule: &MedicationSchedule, instance: &AlertInstance) -> Self {
        let message = match instance.kind {
            AlertKind::OutOfStock => format!("{} is out of stock", schedule.name),
            AlertKind::Dose | AlertKind::Snooze { .. } => schedule.alert_body(),
        };
        let generation = match instance.kind {
            AlertKind::Snooze { generation } => generation,
            AlertKind::Dose | AlertKind::OutOfStock => 0,
        };
        Self {
            instance_id: Some(instance.instance_id),
            schedule_id: schedule.id.clone(),
            medication_name: schedule.name.clone(),
            patient_name: schedule.patient_name.clone(),
            kind: instance.kind.into(),
            message,
            trigger_at: Some(instance.trigger_at),
            channel: Some(instance.channel),
            root_id: Some(instance.root_id),
            generation,
            day_offset: instance.day_offset,
            status: RecordStatus::Pending,
        }
    }

    /// In-app low-stock reminder.
    #[must_use]
    pub fn refill(schedule: &MedicationSchedule) -> Self {
        Self {
            instance_id: None,
            schedule_id: schedule.id.clone(),
            medication_name: schedule.name.clone(),
            patient_name: schedule.patient_name.clone(),
            kind: RecordKind::Refill,
            message: format!("Only {} {} left", schedule.current_stock, schedule.dosage_unit),
            trigger_at: None,
            channel: None,
            root_id: None,
            generation: 0,
            day_offset: 0,
            status: RecordStatus::Pending,
        }
    }

    /// Returns `true` while the record still awaits the user.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self.status, RecordStatus::Pending | RecordStatus::Delivered)
    }

    /// Returns `true` while the record awaits the user for an alert whose
    /// trigger has passed.
    #[must_use]
    pub fn has_fired(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.trigger_at.is_some_and(|t| t <= now)
    }

    /// The alert this record was written for. `None` for refill reminders.
    #[must_use]
    pub fn alert_instance(&self) -> Option<AlertInstance> {
        let instance_id = self.instance_id?;
        let kind = match self.kind {
            RecordKind::Dose => AlertKind::Dose,
            RecordKind::Snooze => AlertKind::Snooze {
                generation: self.generation.max(1),
            },
            RecordKind::OutOfStock => AlertKind::OutOfStock,
            RecordKind::Refill => return None,
        };
        let status = match self.status {
            RecordStatus::Pending => InstanceStatus::Scheduled,
            RecordStatus::Delivered => InstanceStatus::Delivered,
            RecordStatus::Cancelled => InstanceStatus::Cancelled,
            RecordStatus::Taken
            | RecordStatus::Skipped
            | RecordStatus::Snoozed
            | RecordStatus::Dismissed => InstanceStatus::Acted,
        };
        Some(AlertInstance {
            schedule_id: self.schedule_id.clone(),
            day_offset: self.day_offset,
            instance_id,
            root_id: self.root_id.unwrap_or(instance_id),
            kind,
            trigger_at: self.trigger_at?,
            channel: self.channel.unwrap_or(DeliveryChannel::Notification),
            status,
        })
    }
}
