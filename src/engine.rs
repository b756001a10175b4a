//! The alert engine.
//!
//! [`AlertEngine`] is the single entry point a UI or host drives. It owns the
//! schedules, the dosage history and the notification records, persists them
//! through a [`ScheduleStore`], and applies every mutation to the alert
//! channels through the [`Reconciler`].
//!
//! All operations run to completion one at a time; callers serialize access
//! (the host bridge owns the engine on a single task).

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::alerts::actions::{self, Resolution};
use crate::alerts::delivery::DeliveryChain;
use crate::alerts::{
    AlertAction, AlertChannelCapabilities, AlertChannels, AlertInstance, DeliveryChannel,
    FiredAlert, InstanceStatus, NotificationRecord, RecordKind, RecordStatus, Reconciler,
    ScheduleReport,
};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::schedule::{DosageEvent, MedicationSchedule};
use crate::stats::{self, AdherenceStats};
use crate::store::ScheduleStore;

/// Settled notification records kept for the UI.
const MAX_SETTLED_RECORDS: usize = 200;

/// Result of [`AlertEngine::on_app_start`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartupReport {
    pub schedules: Vec<ScheduleReport>,
    pub stale_cancelled: usize,
}

/// Result of [`AlertEngine::on_alert_action`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    pub instance_id: i32,
    pub schedule_id: String,
    pub resolution: Resolution,
    /// History record written by a taken or skipped dose.
    pub event: Option<DosageEvent>,
    pub current_stock: u32,
    /// Registration of the replacement alert after a snooze.
    pub snooze: Option<ScheduleReport>,
    /// Registration of the out-of-stock alert when the dose emptied the stock.
    pub out_of_stock: Option<ScheduleReport>,
}

/// Medication alert engine.
pub struct AlertEngine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn ScheduleStore>,
    reconciler: Reconciler,
    schedules: Vec<MedicationSchedule>,
    history: Vec<DosageEvent>,
    records: Vec<NotificationRecord>,
}

impl AlertEngine {
    /// Create an engine over `channels` and `store`.
    ///
    /// In-process timer firings (used when no native platform is present)
    /// are reported on `fired_tx`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if `config` is out of range.
    pub fn new(
        config: EngineConfig,
        channels: AlertChannels,
        store: Arc<dyn ScheduleStore>,
        fired_tx: Option<mpsc::UnboundedSender<FiredAlert>>,
    ) -> Result<Self> {
        config.validate()?;
        let chain = DeliveryChain::new(channels, &config.delivery, fired_tx);
        let reconciler = Reconciler::new(chain, config.window.clone());
        Ok(Self {
            config,
            clock: Arc::new(SystemClock),
            store,
            reconciler,
            schedules: Vec::new(),
            history: Vec::new(),
            records: Vec::new(),
        })
    }

    /// Replace the wall clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn capabilities(&self) -> AlertChannelCapabilities {
        self.reconciler.chain().capabilities()
    }

    // ─── lifecycle ───────────────────────────────────────────────────────────

    /// Reload state from the store.
    ///
    /// # Errors
    ///
    /// Returns a storage error if any file cannot be read.
    pub fn load(&mut self) -> Result<()> {
        self.schedules = self.store.load_schedules()?;
        self.history = self.store.load_history()?;
        self.records = self.store.load_notifications()?;
        tracing::info!(
            schedules = self.schedules.len(),
            history = self.history.len(),
            records = self.records.len(),
            "engine state loaded"
        );
        Ok(())
    }

    /// Load state, reschedule every schedule, restore pending out-of-stock
    /// alerts, then clean up stale alerts.
    ///
    /// # Errors
    ///
    /// Returns a storage error if state cannot be loaded or saved.
    pub async fn on_app_start(&mut self) -> Result<StartupReport> {
        self.load()?;

        let schedules = self.schedules.clone();
        let reports = self
            .reconciler
            .reschedule_all(
                &schedules,
                self.clock.as_ref(),
                self.config.reconcile.inter_schedule_pause(),
            )
            .await;
        let now = self.clock.now().with_timezone(&Utc);
        for (schedule, report) in schedules.iter().zip(&reports) {
            self.sync_dose_records(schedule, report, now);
            self.refresh_refill_record(schedule);
        }
        self.restore_out_of_stock(now).await;
        self.persist_records()?;

        let delay = self.config.reconcile.startup_cleanup_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let now = self.clock.now().with_timezone(&Utc);
        let stale = self.reconciler.cleanup_stale(now).await;
        let stale_cancelled = stale.len();
        if stale_cancelled > 0 {
            self.settle_records(
                |r| {
                    r.instance_id.is_some_and(|id| stale.contains(&id))
                        && r.trigger_at.is_some_and(|t| t < now)
                },
                RecordStatus::Cancelled,
            );
            self.persist_records()?;
        }

        tracing::info!(
            schedules = reports.len(),
            stale_cancelled,
            "startup reconciliation complete"
        );
        Ok(StartupReport {
            schedules: reports,
            stale_cancelled,
        })
    }

    // ─── schedule mutations ──────────────────────────────────────────────────

    /// Store a new schedule and register its alerts.
    ///
    /// # Errors
    ///
    /// Returns a validation error, [`EngineError::DuplicateSchedule`], or a
    /// storage error.
    pub async fn on_schedule_created(
        &mut self,
        schedule: MedicationSchedule,
    ) -> Result<ScheduleReport> {
        schedule.validate()?;
        if self.schedules.iter().any(|s| s.id == schedule.id) {
            return Err(EngineError::DuplicateSchedule(schedule.id));
        }
        self.schedules.push(schedule.clone());
        if let Err(e) = self.store.save_schedules(&self.schedules) {
            self.schedules.retain(|s| s.id != schedule.id);
            return Err(e);
        }
        tracing::info!(schedule_id = %schedule.id, name = %schedule.name, "schedule created");
        self.reschedule(&schedule).await
    }

    /// Replace a stored schedule and re-register its alerts.
    ///
    /// # Errors
    ///
    /// Returns a validation error, [`EngineError::UnknownSchedule`], or a
    /// storage error.
    pub async fn on_schedule_updated(
        &mut self,
        schedule: MedicationSchedule,
    ) -> Result<ScheduleReport> {
        schedule.validate()?;
        let index = self.index_of(&schedule.id)?;
        let previous = std::mem::replace(&mut self.schedules[index], schedule.clone());
        if let Err(e) = self.store.save_schedules(&self.schedules) {
            self.schedules[index] = previous;
            return Err(e);
        }
        tracing::info!(schedule_id = %schedule.id, "schedule updated");
        if !schedule.is_out_of_stock() {
            self.clear_out_of_stock(&schedule).await;
        }
        self.reschedule(&schedule).await
    }

    /// Remove a schedule and cancel everything it registered.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownSchedule`] or a storage error.
    pub async fn on_schedule_deleted(&mut self, schedule_id: &str) -> Result<MedicationSchedule> {
        let index = self.index_of(schedule_id)?;
        let removed = self.schedules.remove(index);
        if let Err(e) = self.store.save_schedules(&self.schedules) {
            self.schedules.insert(index, removed);
            return Err(e);
        }
        self.reconciler.cancel_schedule(schedule_id).await;
        self.records
            .retain(|r| !(r.schedule_id == schedule_id && r.is_pending()));
        self.persist_records()?;
        tracing::info!(schedule_id, "schedule deleted");
        Ok(removed)
    }

    /// Apply a stock change made outside the alert flow.
    ///
    /// Only the stock counters of `schedule` are taken over; recurrence
    /// alerts are not re-registered.
    ///
    /// # Errors
    ///
    /// Returns a validation error, [`EngineError::UnknownSchedule`], or a
    /// storage error.
    pub async fn on_stock_changed(
        &mut self,
        schedule: MedicationSchedule,
    ) -> Result<MedicationSchedule> {
        schedule.validate()?;
        let index = self.index_of(&schedule.id)?;
        let stored = &mut self.schedules[index];
        stored.current_stock = schedule.current_stock;
        stored.total_stock = schedule.total_stock;
        stored.refill_threshold = schedule.refill_threshold;
        let updated = stored.clone();
        self.store.save_schedules(&self.schedules)?;

        if !updated.is_out_of_stock() {
            self.clear_out_of_stock(&updated).await;
        }
        self.refresh_refill_record(&updated);
        self.persist_records()?;
        tracing::info!(
            schedule_id = %updated.id,
            current_stock = updated.current_stock,
            "stock changed"
        );
        Ok(updated)
    }

    /// Add `amount` units to a schedule's stock.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownSchedule`] or a storage error.
    pub async fn refill(&mut self, schedule_id: &str, amount: u32) -> Result<MedicationSchedule> {
        let mut schedule = self.schedule(schedule_id)?.clone();
        schedule.refill(amount);
        self.on_stock_changed(schedule).await
    }

    /// Set a schedule's current stock, raising the total when needed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownSchedule`] or a storage error.
    pub async fn set_stock(
        &mut self,
        schedule_id: &str,
        current_stock: u32,
    ) -> Result<MedicationSchedule> {
        let mut schedule = self.schedule(schedule_id)?.clone();
        schedule.current_stock = current_stock;
        schedule.total_stock = schedule.total_stock.max(current_stock);
        self.on_stock_changed(schedule).await
    }

    // ─── alert callbacks ─────────────────────────────────────────────────────

    /// Apply a user response to an alert that has fired.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownInstance`], [`EngineError::InvalidTransition`]
    /// (also for alerts that have not fired yet), [`EngineError::UnknownSchedule`]
    /// or a storage error.
    pub async fn on_alert_action(
        &mut self,
        instance_id: i32,
        action: AlertAction,
    ) -> Result<ActionOutcome> {
        let now = self.clock.now();
        let now_utc = now.with_timezone(&Utc);
        let (instance, registered) = self.fired_target(instance_id, now_utc)?;
        let resolution = actions::resolve(&instance, action, now_utc)?;
        let index = self.index_of(&instance.schedule_id)?;

        let mut outcome = ActionOutcome {
            instance_id,
            schedule_id: instance.schedule_id.clone(),
            resolution,
            event: None,
            current_stock: self.schedules[index].current_stock,
            snooze: None,
            out_of_stock: None,
        };

        if let Some(dose_outcome) = resolution.dose_outcome() {
            let event = actions::dosage_event(&self.schedules[index], dose_outcome, now_utc);
            self.store.append_history(&event)?;
            self.history.push(event.clone());
            outcome.event = Some(event);
        }

        // A fired alert whose identifier was handed to a later occurrence is
        // settled from its record only; the registration belongs to the later one.
        if registered {
            self.reconciler
                .retire(instance_id, resolution.instance_status())
                .await;
        }
        let trigger_at = instance.trigger_at;
        self.settle_records(
            |r| r.instance_id == Some(instance_id) && r.trigger_at == Some(trigger_at),
            resolution.record_status(),
        );

        match resolution {
            Resolution::Taken => {
                let stock_before = self.schedules[index].current_stock;
                outcome.current_stock = self.schedules[index].take_dose();
                self.store.save_schedules(&self.schedules)?;
                let schedule = self.schedules[index].clone();
                if actions::depleted_by_dose(&schedule, stock_before, &now) {
                    outcome.out_of_stock = self.schedule_out_of_stock(&schedule, now).await;
                }
                self.refresh_refill_record(&schedule);
            }
            Resolution::Snoozed => {
                let schedule = self.schedules[index].clone();
                let next = actions::snoozed(&instance, now_utc, self.config.actions.snooze());
                let report = self.reconciler.register(&schedule, next, now_utc).await;
                self.record_instances(&schedule, &report.instances, now_utc);
                outcome.snooze = Some(report);
            }
            Resolution::Skipped | Resolution::Dismissed => {}
        }

        self.persist_records()?;
        tracing::info!(
            instance_id,
            schedule_id = %outcome.schedule_id,
            action = %action,
            current_stock = outcome.current_stock,
            "alert action applied"
        );
        Ok(outcome)
    }

    /// Record that the channel fired `instance_id`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownInstance`] or a storage error.
    pub fn on_alert_delivered(&mut self, instance_id: i32) -> Result<AlertInstance> {
        let instance = self
            .reconciler
            .mark_delivered(instance_id)
            .ok_or(EngineError::UnknownInstance(instance_id))?;
        for record in &mut self.records {
            if record.instance_id == Some(instance_id)
                && record.trigger_at == Some(instance.trigger_at)
                && record.status == RecordStatus::Pending
            {
                record.status = RecordStatus::Delivered;
            }
        }
        self.persist_records()?;
        tracing::debug!(instance_id, "alert delivered");
        Ok(instance)
    }

    // ─── queries ─────────────────────────────────────────────────────────────

    #[must_use]
    pub fn schedules(&self) -> &[MedicationSchedule] {
        &self.schedules
    }

    /// # Errors
    ///
    /// Returns [`EngineError::UnknownSchedule`].
    pub fn schedule(&self, schedule_id: &str) -> Result<&MedicationSchedule> {
        self.schedules
            .iter()
            .find(|s| s.id == schedule_id)
            .ok_or_else(|| EngineError::UnknownSchedule(schedule_id.to_owned()))
    }

    /// Live alert instances registered by this process.
    #[must_use]
    pub fn live_instances(&self) -> &[AlertInstance] {
        self.reconciler.live_instances()
    }

    /// Records still awaiting the user, soonest first; refill reminders last.
    #[must_use]
    pub fn pending_notifications(&self) -> Vec<&NotificationRecord> {
        let mut pending: Vec<&NotificationRecord> =
            self.records.iter().filter(|r| r.is_pending()).collect();
        pending.sort_by_key(|r| (r.trigger_at.is_none(), r.trigger_at));
        pending
    }

    /// Clear the pending list. Registered alerts are left untouched.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn dismiss_all_pending(&mut self) -> Result<usize> {
        let count = self.records.iter().filter(|r| r.is_pending()).count();
        self.settle_records(|_| true, RecordStatus::Dismissed);
        self.persist_records()?;
        Ok(count)
    }

    /// Full dosage history, oldest first.
    #[must_use]
    pub fn history(&self) -> &[DosageEvent] {
        &self.history
    }

    /// Events recorded today, newest first.
    #[must_use]
    pub fn todays_history(&self) -> Vec<&DosageEvent> {
        let now = self.clock.now();
        stats::events_on(&self.history, now.date_naive(), &now.timezone())
    }

    #[must_use]
    pub fn schedules_by_patient(&self) -> BTreeMap<String, Vec<&MedicationSchedule>> {
        stats::schedules_by_patient(&self.schedules)
    }

    /// Distinct patient names, sorted.
    #[must_use]
    pub fn patients(&self) -> Vec<String> {
        self.schedules_by_patient().into_keys().collect()
    }

    /// Adherence over the last seven days.
    #[must_use]
    pub fn adherence(&self) -> AdherenceStats {
        stats::weekly_adherence(&self.schedules, &self.history, &self.clock.now())
    }

    // ─── internals ───────────────────────────────────────────────────────────

    fn index_of(&self, schedule_id: &str) -> Result<usize> {
        self.schedules
            .iter()
            .position(|s| s.id == schedule_id)
            .ok_or_else(|| EngineError::UnknownSchedule(schedule_id.to_owned()))
    }

    /// The alert an action on `instance_id` answers, and whether it is the
    /// registration the reconciler still holds under that identifier.
    ///
    /// Identifiers are reused by later reconciliations, so a registered
    /// instance is only the target once it has fired. Otherwise the most
    /// recent pending record of an alert that already fired under the same
    /// identifier is the target.
    fn fired_target(&self, instance_id: i32, now: DateTime<Utc>) -> Result<(AlertInstance, bool)> {
        if let Some(live) = self.reconciler.live_instance(instance_id)
            && live.has_fired(now)
        {
            return Ok((live.clone(), true));
        }
        let recorded = self
            .records
            .iter()
            .filter(|r| r.instance_id == Some(instance_id) && r.has_fired(now))
            .filter_map(NotificationRecord::alert_instance)
            .max_by_key(|i| i.trigger_at);
        if let Some(mut instance) = recorded {
            tracing::debug!(
                instance_id,
                trigger_at = %instance.trigger_at,
                "action answers an alert fired before the last reconciliation"
            );
            instance.status = InstanceStatus::Delivered;
            return Ok((instance, false));
        }
        self.reconciler
            .find_instance(instance_id)
            .cloned()
            .map(|instance| (instance, true))
            .ok_or(EngineError::UnknownInstance(instance_id))
    }

    async fn reschedule(&mut self, schedule: &MedicationSchedule) -> Result<ScheduleReport> {
        let now = self.clock.now();
        let report = self.reconciler.reschedule(schedule, now).await;
        self.sync_dose_records(schedule, &report, now.with_timezone(&Utc));
        self.refresh_refill_record(schedule);
        self.persist_records()?;
        Ok(report)
    }

    async fn schedule_out_of_stock(
        &mut self,
        schedule: &MedicationSchedule,
        now: DateTime<Local>,
    ) -> Option<ScheduleReport> {
        let lag = self
            .config
            .window
            .min_future_lag(DeliveryChannel::Notification);
        let actions_config = &self.config.actions;
        let instance = actions::out_of_stock_instance(
            schedule,
            &now,
            actions_config.out_of_stock_hour,
            actions_config.out_of_stock_minute,
            lag,
        )?;

        self.clear_out_of_stock(schedule).await;
        let now = now.with_timezone(&Utc);
        let report = self.reconciler.register(schedule, instance, now).await;
        self.record_instances(schedule, &report.instances, now);
        tracing::info!(schedule_id = %schedule.id, "out-of-stock alert scheduled");
        Some(report)
    }

    /// Re-register out-of-stock alerts an earlier run left pending.
    ///
    /// Alerts that already fired stay answerable through their records.
    async fn restore_out_of_stock(&mut self, now: DateTime<Utc>) {
        let pending: Vec<AlertInstance> = self
            .records
            .iter()
            .filter(|r| r.kind == RecordKind::OutOfStock && r.is_pending())
            .filter_map(NotificationRecord::alert_instance)
            .collect();
        for mut instance in pending {
            let Ok(schedule) = self.schedule(&instance.schedule_id).cloned() else {
                continue;
            };
            if !schedule.is_out_of_stock() {
                self.clear_out_of_stock(&schedule).await;
                continue;
            }
            if instance.trigger_at <= now {
                continue;
            }
            instance.status = InstanceStatus::Scheduled;
            self.reconciler.cancel_out_of_stock(&schedule.id).await;
            let report = self.reconciler.register(&schedule, instance, now).await;
            self.record_instances(&schedule, &report.instances, now);
            tracing::info!(schedule_id = %schedule.id, "out-of-stock alert restored");
        }
    }

    async fn clear_out_of_stock(&mut self, schedule: &MedicationSchedule) {
        self.reconciler.cancel_out_of_stock(&schedule.id).await;
        self.records.retain(|r| {
            !(r.schedule_id == schedule.id && r.kind == RecordKind::OutOfStock && r.is_pending())
        });
    }

    /// Replace the schedule's upcoming dose and snooze records with `report`'s
    /// instances. Records of alerts that already fired stay until answered.
    fn sync_dose_records(
        &mut self,
        schedule: &MedicationSchedule,
        report: &ScheduleReport,
        now: DateTime<Utc>,
    ) {
        self.records.retain(|r| {
            !(r.schedule_id == schedule.id
                && matches!(r.kind, RecordKind::Dose | RecordKind::Snooze)
                && r.is_pending()
                && !r.has_fired(now))
        });
        self.record_instances(schedule, &report.instances, now);
    }

    fn record_instances(
        &mut self,
        schedule: &MedicationSchedule,
        instances: &[AlertInstance],
        now: DateTime<Utc>,
    ) {
        for instance in instances {
            self.records.retain(|r| {
                !(r.instance_id == Some(instance.instance_id) && r.is_pending() && !r.has_fired(now))
            });
            self.records
                .push(NotificationRecord::for_instance(schedule, instance));
        }
    }

    /// Keep exactly one refill reminder while `0 < stock <= threshold`.
    fn refresh_refill_record(&mut self, schedule: &MedicationSchedule) {
        if schedule.is_low_stock() && !schedule.is_out_of_stock() {
            let exists = self.records.iter().any(|r| {
                r.schedule_id == schedule.id && r.kind == RecordKind::Refill && r.is_pending()
            });
            if !exists {
                tracing::info!(
                    schedule_id = %schedule.id,
                    current_stock = schedule.current_stock,
                    "stock low, refill reminder raised"
                );
                self.records.push(NotificationRecord::refill(schedule));
            }
        } else {
            self.records
                .retain(|r| !(r.schedule_id == schedule.id && r.kind == RecordKind::Refill));
        }
    }

    fn settle_records(&mut self, matches: impl Fn(&NotificationRecord) -> bool, status: RecordStatus) {
        for record in &mut self.records {
            if record.is_pending() && matches(record) {
                record.status = status;
            }
        }
    }

    fn persist_records(&mut self) -> Result<()> {
        let settled = self.records.iter().filter(|r| !r.is_pending()).count();
        if settled > MAX_SETTLED_RECORDS {
            let mut drop_count = settled - MAX_SETTLED_RECORDS;
            self.records.retain(|r| {
                if drop_count > 0 && !r.is_pending() {
                    drop_count -= 1;
                    false
                } else {
                    true
                }
            });
        }
        self.store.save_notifications(&self.records)
    }
}
