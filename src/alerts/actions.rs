//! Alert action state machine.
//!
//! ```text
//! Scheduled ──fired──▶ Delivered ──action──▶ Taken | Skipped | Snoozed | Dismissed
//!     └─────────────────────action──────────────▲
//! ```
//!
//! Actions are accepted once a live instance has fired: reported delivered,
//! or scheduled with a trigger that has passed. Out-of-stock alerts own a
//! single identifier and can be dismissed before they fire. Every accepted
//! action is terminal for the addressed instance. A snooze
//! creates exactly one new instance under a disjoint identifier. The engine
//! applies the side effects (history, stock, cancellation); this module
//! only decides them.

use chrono::{DateTime, Days, TimeDelta, TimeZone, Utc};
use serde::Serialize;

use super::channel::AlertAction;
use super::identity;
use super::instance::{AlertInstance, AlertKind, DeliveryChannel, InstanceStatus, RecordStatus};
use crate::error::{EngineError, Result};
use crate::schedule::{DosageEvent, DoseOutcome, MedicationSchedule};

/// How an accepted action resolved the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Taken,
    Skipped,
    Snoozed,
    Dismissed,
}

impl Resolution {
    /// History outcome, for resolutions that write history.
    #[must_use]
    pub fn dose_outcome(self) -> Option<DoseOutcome> {
        match self {
            Self::Taken => Some(DoseOutcome::Taken),
            Self::Skipped => Some(DoseOutcome::Skipped),
            Self::Snoozed | Self::Dismissed => None,
        }
    }

    /// Status the addressed instance ends in.
    #[must_use]
    pub fn instance_status(self) -> InstanceStatus {
        match self {
            Self::Snoozed => InstanceStatus::Cancelled,
            Self::Taken | Self::Skipped | Self::Dismissed => InstanceStatus::Acted,
        }
    }

    /// Status shown for the instance's notification record.
    #[must_use]
    pub fn record_status(self) -> RecordStatus {
        match self {
            Self::Taken => RecordStatus::Taken,
            Self::Skipped => RecordStatus::Skipped,
            Self::Snoozed => RecordStatus::Snoozed,
            Self::Dismissed => RecordStatus::Dismissed,
        }
    }
}

/// Decide how `action` resolves `instance`.
///
/// # Errors
///
/// Returns [`EngineError::InvalidTransition`] when the instance is no longer
/// live or has not fired by `now`, or when a dose action is addressed to an
/// out-of-stock alert (those can only be dismissed).
pub fn resolve(
    instance: &AlertInstance,
    action: AlertAction,
    now: DateTime<Utc>,
) -> Result<Resolution> {
    if !instance.is_live() {
        return Err(EngineError::InvalidTransition {
            instance_id: instance.instance_id,
            message: format!("cannot apply {action} to an alert that is {:?}", instance.status),
        });
    }
    if instance.kind == AlertKind::OutOfStock && action != AlertAction::Dismiss {
        return Err(EngineError::InvalidTransition {
            instance_id: instance.instance_id,
            message: format!("out-of-stock alerts can only be dismissed, got {action}"),
        });
    }
    if instance.kind != AlertKind::OutOfStock && !instance.has_fired(now) {
        return Err(EngineError::InvalidTransition {
            instance_id: instance.instance_id,
            message: format!(
                "cannot apply {action} to an alert that fires at {}",
                instance.trigger_at
            ),
        });
    }
    Ok(match action {
        AlertAction::Taken => Resolution::Taken,
        AlertAction::Skip => Resolution::Skipped,
        AlertAction::Snooze => Resolution::Snoozed,
        AlertAction::Dismiss => Resolution::Dismissed,
    })
}

/// The replacement instance for a snoozed `instance`, firing `delay` after `now`.
#[must_use]
pub fn snoozed(instance: &AlertInstance, now: DateTime<Utc>, delay: TimeDelta) -> AlertInstance {
    let generation = match instance.kind {
        AlertKind::Snooze { generation } => generation.saturating_add(1),
        AlertKind::Dose | AlertKind::OutOfStock => 1,
    };
    AlertInstance {
        schedule_id: instance.schedule_id.clone(),
        day_offset: instance.day_offset,
        instance_id: identity::snooze_id(instance.root_id, generation),
        root_id: instance.root_id,
        kind: AlertKind::Snooze { generation },
        trigger_at: now + delay,
        channel: instance.channel,
        status: InstanceStatus::Scheduled,
    }
}

/// History record for answering a dose of `schedule`.
#[must_use]
pub fn dosage_event(
    schedule: &MedicationSchedule,
    outcome: DoseOutcome,
    at: DateTime<Utc>,
) -> DosageEvent {
    DosageEvent {
        schedule_id: schedule.id.clone(),
        medication_name: schedule.name.clone(),
        amount: schedule.dosage_amount,
        taken_at: at,
        outcome,
    }
}

/// Returns `true` when taking a dose moved stock from `stock_before` to
/// exactly zero on a schedule that still produces timed alerts.
#[must_use]
pub fn depleted_by_dose<Tz: TimeZone>(
    schedule: &MedicationSchedule,
    stock_before: u32,
    now: &DateTime<Tz>,
) -> bool {
    stock_before > 0
        && schedule.is_out_of_stock()
        && schedule.recurrence.is_timed()
        && schedule.is_active_on(now.date_naive())
}

/// The one-shot out-of-stock alert for `schedule`.
///
/// Fires at `hour:minute` local time today when at least `min_lag` remains
/// before it, otherwise at the same time tomorrow.
#[must_use]
pub fn out_of_stock_instance<Tz: TimeZone>(
    schedule: &MedicationSchedule,
    now: &DateTime<Tz>,
    hour: u8,
    minute: u8,
    min_lag: TimeDelta,
) -> Option<AlertInstance> {
    let time = chrono::NaiveTime::from_hms_opt(u32::from(hour), u32::from(minute), 0)?;
    let today = now.date_naive();
    let (day_offset, trigger) = [0_u32, 1]
        .into_iter()
        .filter_map(|offset| {
            let date = today.checked_add_days(Days::new(u64::from(offset)))?;
            let trigger = now
                .timezone()
                .from_local_datetime(&date.and_time(time))
                .earliest()?;
            Some((offset, trigger))
        })
        .find(|(_, trigger)| trigger.clone().signed_duration_since(now.clone()) >= min_lag)?;

    let instance_id = identity::out_of_stock_id(&schedule.id);
    Some(AlertInstance {
        schedule_id: schedule.id.clone(),
        day_offset,
        instance_id,
        root_id: instance_id,
        kind: AlertKind::OutOfStock,
        trigger_at: trigger.with_timezone(&Utc),
        channel: DeliveryChannel::Notification,
        status: InstanceStatus::Scheduled,
    })
}
