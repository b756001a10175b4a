//! Cancel-then-recreate reconciliation.
//!
//! Every schedule mutation is applied as "cancel everything the schedule
//! could own, then expand and deliver afresh". Cancellation works from the
//! deterministic identifier bands rather than from memory, so it also clears
//! alerts registered by an earlier process.

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

use super::delivery::{DeliveryChain, DeliveryFailure, DeliveryIssue, DeliveryReport};
use super::expander;
use super::identity;
use super::instance::{AlertInstance, AlertKind, DeliveryChannel, InstanceStatus};
use crate::clock::Clock;
use crate::config::WindowConfig;
use crate::schedule::MedicationSchedule;

/// Resolved instances remembered so late actions get a clear error.
const RETIRED_MEMORY: usize = 64;

/// Classified result of scheduling one schedule's alerts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleOutcome {
    /// `count` alerts are registered on `channels`.
    Scheduled {
        count: usize,
        channels: Vec<DeliveryChannel>,
    },
    /// The recurrence never produces timed alerts.
    NoTimedAlerts,
    /// Every candidate in the window was suppressed or past the end date.
    NothingToSchedule,
    /// The user must grant a permission before alerts can be registered.
    PermissionDenied {
        channel: DeliveryChannel,
        message: String,
    },
    /// Registration kept failing.
    RetriesExhausted { attempts: u32, last_error: String },
}

impl ScheduleOutcome {
    /// Returns `true` for outcomes the user should be told about.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied { .. } | Self::RetriesExhausted { .. }
        )
    }
}

/// Outcome, warnings and registered instances for one schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleReport {
    pub schedule_id: String,
    pub outcome: ScheduleOutcome,
    pub issues: Vec<DeliveryIssue>,
    pub instances: Vec<AlertInstance>,
}

impl ScheduleReport {
    fn without_alerts(schedule_id: &str, outcome: ScheduleOutcome) -> Self {
        Self {
            schedule_id: schedule_id.to_owned(),
            outcome,
            issues: Vec::new(),
            instances: Vec::new(),
        }
    }

    fn classify(schedule_id: &str, report: DeliveryReport) -> Self {
        let outcome = match report.failure {
            Some(DeliveryFailure::PermissionDenied { channel, message }) => {
                ScheduleOutcome::PermissionDenied { channel, message }
            }
            Some(DeliveryFailure::RetriesExhausted {
                attempts,
                last_error,
            }) => ScheduleOutcome::RetriesExhausted {
                attempts,
                last_error,
            },
            None => {
                let mut channels: Vec<DeliveryChannel> = Vec::new();
                for instance in &report.registered {
                    if !channels.contains(&instance.channel) {
                        channels.push(instance.channel);
                    }
                }
                ScheduleOutcome::Scheduled {
                    count: report.registered.len(),
                    channels,
                }
            }
        };
        Self {
            schedule_id: schedule_id.to_owned(),
            outcome,
            issues: report.issues,
            instances: report.registered,
        }
    }
}

/// Owns the delivery chain and the cache of live instances.
#[derive(Debug)]
pub struct Reconciler {
    chain: DeliveryChain,
    window: WindowConfig,
    live: Vec<AlertInstance>,
    retired: VecDeque<AlertInstance>,
}

impl Reconciler {
    pub fn new(chain: DeliveryChain, window: WindowConfig) -> Self {
        Self {
            chain,
            window,
            live: Vec::new(),
            retired: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn chain(&self) -> &DeliveryChain {
        &self.chain
    }

    /// Instances registered by this process that are still live.
    #[must_use]
    pub fn live_instances(&self) -> &[AlertInstance] {
        &self.live
    }

    #[must_use]
    pub fn live_instance(&self, instance_id: i32) -> Option<&AlertInstance> {
        self.live.iter().find(|i| i.instance_id == instance_id)
    }

    /// The live instance with `instance_id`, or the most recently retired one.
    #[must_use]
    pub fn find_instance(&self, instance_id: i32) -> Option<&AlertInstance> {
        self.live_instance(instance_id).or_else(|| {
            self.retired
                .iter()
                .rev()
                .find(|i| i.instance_id == instance_id)
        })
    }

    /// Record that the channel fired `instance_id`.
    pub fn mark_delivered(&mut self, instance_id: i32) -> Option<AlertInstance> {
        let instance = self.live.iter_mut().find(|i| i.instance_id == instance_id)?;
        if instance.status == InstanceStatus::Scheduled {
            instance.status = InstanceStatus::Delivered;
        }
        Some(instance.clone())
    }

    /// Cancel every alert `schedule` could own and register a fresh set.
    pub async fn reschedule(
        &mut self,
        schedule: &MedicationSchedule,
        now: DateTime<Local>,
    ) -> ScheduleReport {
        self.cancel_window(&schedule.id).await;

        if !schedule.recurrence.is_timed() {
            tracing::debug!(schedule_id = %schedule.id, "recurrence has no timed alerts");
            return ScheduleReport::without_alerts(&schedule.id, ScheduleOutcome::NoTimedAlerts);
        }

        let channel = self
            .chain
            .resolved_channel(schedule.channel_preference)
            .await;
        let window = self.window.expansion(channel);
        let instances: Vec<AlertInstance> = expander::expand(schedule, &now, &window)
            .map(|occurrence| {
                let instance_id = identity::dose_id(&schedule.id, occurrence.day_offset);
                AlertInstance {
                    schedule_id: schedule.id.clone(),
                    day_offset: occurrence.day_offset,
                    instance_id,
                    root_id: instance_id,
                    kind: AlertKind::Dose,
                    trigger_at: occurrence.trigger_at,
                    channel,
                    status: InstanceStatus::Scheduled,
                }
            })
            .collect();

        if instances.is_empty() {
            tracing::info!(
                schedule_id = %schedule.id,
                alert_time = %schedule.alert_time,
                "nothing to schedule in the lookahead window"
            );
            return ScheduleReport::without_alerts(&schedule.id, ScheduleOutcome::NothingToSchedule);
        }

        self.deliver(schedule, instances, now.with_timezone(&Utc)).await
    }

    /// Register one extra instance (a snooze or an out-of-stock alert).
    pub async fn register(
        &mut self,
        schedule: &MedicationSchedule,
        instance: AlertInstance,
        now: DateTime<Utc>,
    ) -> ScheduleReport {
        self.deliver(schedule, vec![instance], now).await
    }

    async fn deliver(
        &mut self,
        schedule: &MedicationSchedule,
        instances: Vec<AlertInstance>,
        now: DateTime<Utc>,
    ) -> ScheduleReport {
        let mut collisions = Vec::new();
        for instance in &instances {
            if let Some(other) = self
                .live
                .iter()
                .find(|l| l.instance_id == instance.instance_id && l.schedule_id != schedule.id)
            {
                tracing::warn!(
                    schedule_id = %schedule.id,
                    instance_id = instance.instance_id,
                    other_schedule_id = %other.schedule_id,
                    "alert identifier already held by another schedule"
                );
                collisions.push(DeliveryIssue::IdCollision {
                    instance_id: instance.instance_id,
                    other_schedule_id: other.schedule_id.clone(),
                });
            }
        }

        let delivery = self.chain.deliver(schedule, instances, now).await;
        self.live.extend(delivery.registered.iter().cloned());
        let mut report = ScheduleReport::classify(&schedule.id, delivery);
        for collision in collisions {
            if !report.issues.contains(&collision) {
                report.issues.push(collision);
            }
        }

        match &report.outcome {
            ScheduleOutcome::Scheduled { count, channels } => tracing::info!(
                schedule_id = %schedule.id,
                count,
                ?channels,
                "alerts scheduled"
            ),
            outcome => tracing::warn!(schedule_id = %schedule.id, ?outcome, "alerts not scheduled"),
        }
        report
    }

    /// Cancel everything `schedule_id` owns, the out-of-stock alert included.
    pub async fn cancel_schedule(&mut self, schedule_id: &str) {
        self.cancel_window(schedule_id).await;
        self.cancel_out_of_stock(schedule_id).await;
    }

    /// Cancel the schedule's pending out-of-stock alert.
    pub async fn cancel_out_of_stock(&mut self, schedule_id: &str) {
        let id = identity::out_of_stock_id(schedule_id);
        self.chain.cancel(&[id], true).await;
        self.forget(|i| i.schedule_id == schedule_id && i.instance_id == id);
    }

    async fn cancel_window(&mut self, schedule_id: &str) {
        let ids = identity::window_ids(schedule_id, self.window.lookahead_days);
        self.chain.cancel(&ids, true).await;
        let oos_root = identity::out_of_stock_id(schedule_id);
        self.forget(|i| i.schedule_id == schedule_id && i.root_id != oos_root);
        tracing::debug!(schedule_id, count = ids.len(), "cancelled alert window");
    }

    fn forget(&mut self, matches: impl Fn(&AlertInstance) -> bool) {
        self.live.retain(|i| !matches(i));
    }

    /// Cancel a single live instance and drop it from the cache.
    ///
    /// The alarm primitive is only called when the instance was registered there.
    pub async fn retire(&mut self, instance_id: i32, status: InstanceStatus) -> Option<AlertInstance> {
        let index = self.live.iter().position(|i| i.instance_id == instance_id)?;
        let mut instance = self.live.remove(index);
        self.chain
            .cancel(&[instance_id], instance.channel == DeliveryChannel::Alarm)
            .await;
        instance.status = status;
        if self.retired.len() == RETIRED_MEMORY {
            self.retired.pop_front();
        }
        self.retired.push_back(instance.clone());
        Some(instance)
    }

    /// Reschedule every schedule in order, pausing between schedules.
    pub async fn reschedule_all(
        &mut self,
        schedules: &[MedicationSchedule],
        clock: &dyn Clock,
        pause: Duration,
    ) -> Vec<ScheduleReport> {
        let mut reports = Vec::with_capacity(schedules.len());
        for (index, schedule) in schedules.iter().enumerate() {
            if index > 0 && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            reports.push(self.reschedule(schedule, clock.now()).await);
        }
        reports
    }

    /// Cancel pending alerts whose trigger is already in the past.
    ///
    /// Returns the cancelled identifiers.
    pub async fn cleanup_stale(&mut self, now: DateTime<Utc>) -> Vec<i32> {
        let pending = match self.chain.pending().await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!(error = %e, "cannot list pending alerts for cleanup");
                return Vec::new();
            }
        };
        let stale: Vec<i32> = pending
            .iter()
            .filter(|alert| alert.trigger_at < now)
            .map(|alert| alert.instance_id)
            .collect();
        if stale.is_empty() {
            tracing::debug!("no stale alerts");
            return stale;
        }

        self.chain.cancel(&stale, false).await;
        self.forget(|i| stale.contains(&i.instance_id) && i.trigger_at < now);
        tracing::info!(count = stale.len(), "cancelled stale alerts");
        stale
    }
}
