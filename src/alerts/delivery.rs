//! Delivery fallback chain.
//!
//! Registers a schedule's instances through the best available primitive:
//!
//! 1. exact wake alarm, when the schedule prefers alarms and the platform has them;
//! 2. interactive notification, for everything else on a native platform
//!    (and for each alarm registration that fails);
//! 3. in-process timers, when no native platform is present at all.
//!
//! Notification registration is retried with a fixed backoff. After a
//! successful registration the pending set is re-queried to confirm the
//! platform actually holds what was registered.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;

use super::browser::{BrowserTimers, FiredAlert};
use super::channel::{
    AlarmChannel, AlarmRequest, AlertAction, AlertChannelCapabilities, AlertChannels, AlertExtra,
    ChannelError, ChannelResult, NotificationChannel, NotificationRequest, PendingAlert,
};
use super::instance::{AlertInstance, AlertKind, DeliveryChannel};
use crate::config::DeliveryConfig;
use crate::schedule::{ChannelPreference, MedicationSchedule};

/// Non-fatal observation made while delivering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryIssue {
    /// Exact alarms need a permission the user has not granted; alarms were
    /// downgraded to notifications.
    AlarmPermissionRequired,
    /// One alarm registration failed and was downgraded to a notification.
    AlarmFallback { instance_id: i32, reason: String },
    /// Fewer alerts are pending than were registered.
    VerificationMismatch { expected: usize, actual: usize },
    /// The identifier is held by a different schedule.
    IdCollision {
        instance_id: i32,
        other_schedule_id: String,
    },
}

/// Terminal delivery failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryFailure {
    PermissionDenied {
        channel: DeliveryChannel,
        message: String,
    },
    RetriesExhausted {
        attempts: u32,
        last_error: String,
    },
}

/// What one delivery attempt achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Instances now held by a primitive, ordered by trigger.
    pub registered: Vec<AlertInstance>,
    pub issues: Vec<DeliveryIssue>,
    pub failure: Option<DeliveryFailure>,
}

/// Retry settings for notification registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl From<&DeliveryConfig> for RetryPolicy {
    fn from(config: &DeliveryConfig) -> Self {
        Self {
            attempts: config.registration_attempts.max(1),
            backoff: config.retry_backoff(),
        }
    }
}

/// Build the interactive notification for `instance`.
#[must_use]
pub fn notification_request(
    schedule: &MedicationSchedule,
    instance: &AlertInstance,
) -> NotificationRequest {
    let (title, body, actions) = match instance.kind {
        AlertKind::OutOfStock => (
            format!("Out of Stock: {}", schedule.name),
            format!("{} has run out. Time to refill.", schedule.name),
            Vec::new(),
        ),
        AlertKind::Dose | AlertKind::Snooze { .. } => (
            schedule.alert_title(),
            schedule.alert_body(),
            AlertAction::NOTIFICATION_ACTIONS.to_vec(),
        ),
    };
    NotificationRequest {
        instance_id: instance.instance_id,
        title,
        body,
        trigger_at: instance.trigger_at,
        actions,
        priority: schedule.channel_preference.priority(),
        extra: AlertExtra {
            schedule_id: schedule.id.clone(),
            kind: instance.kind,
        },
    }
}

/// Build the exact wake alarm for `instance`.
#[must_use]
pub fn alarm_request(schedule: &MedicationSchedule, instance: &AlertInstance) -> AlarmRequest {
    let patient_label = if schedule.patient_name.trim().is_empty() {
        "You".to_owned()
    } else {
        schedule.patient_name.clone()
    };
    AlarmRequest {
        instance_id: instance.instance_id,
        medication_name: schedule.name.clone(),
        dosage_label: schedule.dosage_label(),
        patient_label,
        trigger_at: instance.trigger_at,
    }
}

/// Registers instances through the fallback tiers.
#[derive(Debug)]
pub struct DeliveryChain {
    channels: AlertChannels,
    capabilities: AlertChannelCapabilities,
    retry: RetryPolicy,
    settle: Duration,
    timers: BrowserTimers,
}

impl DeliveryChain {
    /// Create a chain over `channels`. Capabilities are resolved here, once.
    pub fn new(
        channels: AlertChannels,
        config: &DeliveryConfig,
        fired_tx: Option<mpsc::UnboundedSender<FiredAlert>>,
    ) -> Self {
        let capabilities = AlertChannelCapabilities::resolve(&channels);
        tracing::info!(
            native_platform = capabilities.native_platform,
            exact_alarm = capabilities.exact_alarm,
            "alert channel capabilities resolved"
        );
        Self {
            channels,
            capabilities,
            retry: RetryPolicy::from(config),
            settle: config.verification_settle(),
            timers: BrowserTimers::new(fired_tx),
        }
    }

    #[must_use]
    pub fn capabilities(&self) -> AlertChannelCapabilities {
        self.capabilities
    }

    /// Tier a schedule with `preference` ends up on, exact-alarm permission included.
    pub async fn resolved_channel(&self, preference: ChannelPreference) -> DeliveryChannel {
        let planned = self.capabilities.planned_channel(preference);
        if planned != DeliveryChannel::Alarm {
            return planned;
        }
        let Some(alarm) = &self.channels.alarm else {
            return DeliveryChannel::Notification;
        };
        match alarm.check_permission().await {
            Ok(permission) if permission.allows_scheduling() => DeliveryChannel::Alarm,
            Ok(_) | Err(_) => DeliveryChannel::Notification,
        }
    }

    /// Register `instances` of `schedule`. An empty slice registers nothing.
    pub async fn deliver(
        &mut self,
        schedule: &MedicationSchedule,
        instances: Vec<AlertInstance>,
        now: DateTime<Utc>,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        if instances.is_empty() {
            return report;
        }

        let Some(notifications) = self.channels.notifications.clone() else {
            self.arm_timers(schedule, instances, now, &mut report);
            return report;
        };

        let (wants_alarm, mut remaining): (Vec<_>, Vec<_>) =
            instances.into_iter().partition(|instance| {
                schedule.channel_preference == ChannelPreference::Alarm
                    && instance.kind != AlertKind::OutOfStock
            });

        if !wants_alarm.is_empty() {
            match self.channels.alarm.clone() {
                Some(alarm) => {
                    if self.alarm_permitted(alarm.as_ref(), &mut report).await {
                        let fallen_back = self
                            .register_alarms(alarm.as_ref(), schedule, wants_alarm, &mut report)
                            .await;
                        remaining.extend(fallen_back);
                    } else {
                        remaining.extend(wants_alarm);
                    }
                }
                None => remaining.extend(wants_alarm),
            }
        }

        if !remaining.is_empty() {
            let requests: Vec<NotificationRequest> = remaining
                .iter()
                .map(|instance| notification_request(schedule, instance))
                .collect();
            match self.register_notifications(notifications.as_ref(), &requests).await {
                Ok(()) => {
                    let expected: Vec<i32> = requests.iter().map(|r| r.instance_id).collect();
                    for mut instance in remaining {
                        instance.channel = DeliveryChannel::Notification;
                        report.registered.push(instance);
                    }
                    self.verify(notifications.as_ref(), &schedule.id, &expected, &mut report)
                        .await;
                }
                Err(failure) => report.failure = Some(failure),
            }
        }

        report.registered.sort_by_key(|instance| instance.trigger_at);
        report
    }

    fn arm_timers(
        &mut self,
        schedule: &MedicationSchedule,
        instances: Vec<AlertInstance>,
        now: DateTime<Utc>,
        report: &mut DeliveryReport,
    ) {
        for mut instance in instances {
            instance.channel = DeliveryChannel::BrowserFallback;
            let delay = (instance.trigger_at - now).to_std().unwrap_or_default();
            self.timers.arm(&notification_request(schedule, &instance), delay);
            report.registered.push(instance);
        }
        tracing::info!(
            schedule_id = %schedule.id,
            count = report.registered.len(),
            "armed in-process timers"
        );
        report.registered.sort_by_key(|instance| instance.trigger_at);
    }

    async fn alarm_permitted(&self, alarm: &dyn AlarmChannel, report: &mut DeliveryReport) -> bool {
        match alarm.check_permission().await {
            Ok(permission) if permission.allows_scheduling() => true,
            Ok(_) => {
                tracing::warn!("exact alarm permission not granted, falling back to notifications");
                report.issues.push(DeliveryIssue::AlarmPermissionRequired);
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "exact alarm permission check failed, falling back to notifications");
                report.issues.push(DeliveryIssue::AlarmPermissionRequired);
                false
            }
        }
    }

    /// Register alarms one by one; returns the instances that must fall back.
    async fn register_alarms(
        &self,
        alarm: &dyn AlarmChannel,
        schedule: &MedicationSchedule,
        instances: Vec<AlertInstance>,
        report: &mut DeliveryReport,
    ) -> Vec<AlertInstance> {
        let mut fallen_back = Vec::new();
        for mut instance in instances {
            match alarm.schedule_alarm(&alarm_request(schedule, &instance)).await {
                Ok(()) => {
                    instance.channel = DeliveryChannel::Alarm;
                    report.registered.push(instance);
                }
                Err(e) => {
                    tracing::warn!(
                        schedule_id = %schedule.id,
                        instance_id = instance.instance_id,
                        error = %e,
                        "exact alarm failed, falling back to notification"
                    );
                    report.issues.push(DeliveryIssue::AlarmFallback {
                        instance_id: instance.instance_id,
                        reason: e.to_string(),
                    });
                    fallen_back.push(instance);
                }
            }
        }
        fallen_back
    }

    async fn register_notifications(
        &self,
        notifications: &dyn NotificationChannel,
        requests: &[NotificationRequest],
    ) -> Result<(), DeliveryFailure> {
        let attempts = self.retry.attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match notifications.schedule(requests).await {
                Ok(()) => {
                    if attempt > 1 {
                        tracing::info!(attempt, "notification registration succeeded after retry");
                    }
                    return Ok(());
                }
                Err(ChannelError::PermissionDenied(message)) => {
                    tracing::error!(%message, "notification permission denied");
                    return Err(DeliveryFailure::PermissionDenied {
                        channel: DeliveryChannel::Notification,
                        message,
                    });
                }
                Err(e) => {
                    tracing::warn!(attempt, attempts, error = %e, "notification registration failed");
                    last_error = e.to_string();
                    if attempt < attempts && !self.retry.backoff.is_zero() {
                        tokio::time::sleep(self.retry.backoff).await;
                    }
                }
            }
        }

        tracing::error!(attempts, %last_error, "notification registration retries exhausted");
        Err(DeliveryFailure::RetriesExhausted {
            attempts,
            last_error,
        })
    }

    async fn verify(
        &self,
        notifications: &dyn NotificationChannel,
        schedule_id: &str,
        expected: &[i32],
        report: &mut DeliveryReport,
    ) {
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }
        let pending = match notifications.pending().await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!(schedule_id, error = %e, "could not verify registered notifications");
                return;
            }
        };

        let mut actual = 0;
        for alert in pending.iter().filter(|a| expected.contains(&a.instance_id)) {
            match &alert.extra {
                Some(extra) if extra.schedule_id != schedule_id => {
                    tracing::warn!(
                        schedule_id,
                        instance_id = alert.instance_id,
                        other_schedule_id = %extra.schedule_id,
                        "alert identifier collision"
                    );
                    report.issues.push(DeliveryIssue::IdCollision {
                        instance_id: alert.instance_id,
                        other_schedule_id: extra.schedule_id.clone(),
                    });
                }
                _ => actual += 1,
            }
        }

        if actual < expected.len() {
            tracing::warn!(
                schedule_id,
                expected = expected.len(),
                actual,
                "pending notifications do not match registration"
            );
            report.issues.push(DeliveryIssue::VerificationMismatch {
                expected: expected.len(),
                actual,
            });
        } else {
            tracing::debug!(schedule_id, count = actual, "registration verified");
        }
    }

    /// Best-effort cancellation across every primitive.
    ///
    /// Alarms are cancelled only when `include_alarms` is set and the
    /// platform has them. Failures are logged and otherwise ignored.
    pub async fn cancel(&mut self, ids: &[i32], include_alarms: bool) {
        if ids.is_empty() {
            return;
        }
        if let Some(notifications) = &self.channels.notifications
            && let Err(e) = notifications.cancel(ids).await
        {
            tracing::debug!(error = %e, "notification cancel failed");
        }
        if include_alarms
            && self.capabilities.exact_alarm
            && let Some(alarm) = &self.channels.alarm
        {
            for id in ids {
                if let Err(e) = alarm.cancel_alarm(*id).await {
                    tracing::debug!(instance_id = id, error = %e, "alarm cancel skipped");
                }
            }
        }
        self.timers.cancel(ids);
    }

    /// The notification primitive's pending set (empty without one).
    pub async fn pending(&self) -> ChannelResult<Vec<PendingAlert>> {
        match &self.channels.notifications {
            Some(notifications) => notifications.pending().await,
            None => Ok(Vec::new()),
        }
    }

    /// Identifiers of in-process timers that have not fired.
    pub fn armed_timer_ids(&mut self) -> Vec<i32> {
        self.timers.armed_ids()
    }
}
