//! Shared helpers for integration tests.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Days, Local, NaiveDate, TimeZone, Utc};
use medalert::alerts::mock::{MockAlarmChannel, MockNotificationChannel};
use medalert::{
    AlertChannels, AlertEngine, AlertTime, EngineConfig, ManualClock, MedicationSchedule,
    MemoryStore,
};

/// Schedule id whose digits reduce to the identifier base `12345`.
pub(crate) const SCHEDULE_ID: &str = "1700000012345";

pub(crate) fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 10).unwrap()
}

/// Local wall-clock instant on [`day`].
pub(crate) fn at(hour: u32, minute: u32) -> DateTime<Local> {
    on(0, hour, minute)
}

/// Local wall-clock instant `offset` days after [`day`].
pub(crate) fn on(offset: u64, hour: u32, minute: u32) -> DateTime<Local> {
    let date = day().checked_add_days(Days::new(offset)).unwrap();
    Local
        .from_local_datetime(&date.and_hms_opt(hour, minute, 0).unwrap())
        .unwrap()
}

/// UTC instant of `hour:minute` local time, `offset` days after [`day`].
pub(crate) fn local_trigger(offset: u64, hour: u32, minute: u32) -> DateTime<Utc> {
    let date = day().checked_add_days(Days::new(offset)).unwrap();
    Local
        .from_local_datetime(&date.and_hms_opt(hour, minute, 0).unwrap())
        .unwrap()
        .with_timezone(&Utc)
}

/// Daily 08:00 schedule with ten tablets in stock.
pub(crate) fn daily_schedule() -> MedicationSchedule {
    MedicationSchedule::new(SCHEDULE_ID, "Metformin", AlertTime::new(8, 0).unwrap(), day())
        .with_patient("Alice")
        .with_stock(10, 30)
        .with_refill_threshold(2)
}

pub(crate) struct Harness {
    pub engine: AlertEngine,
    pub notifications: Arc<MockNotificationChannel>,
    pub alarm: Arc<MockAlarmChannel>,
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryStore>,
}

/// Engine on a native platform without exact alarms.
pub(crate) fn harness(now: DateTime<Local>) -> Harness {
    build(now, EngineConfig::immediate(), false, MemoryStore::new())
}

/// Engine on a native platform with exact alarms.
pub(crate) fn harness_with_alarm(now: DateTime<Local>) -> Harness {
    build(now, EngineConfig::immediate(), true, MemoryStore::new())
}

pub(crate) fn build(
    now: DateTime<Local>,
    config: EngineConfig,
    with_alarm: bool,
    store: MemoryStore,
) -> Harness {
    let notifications = Arc::new(MockNotificationChannel::new());
    let alarm = Arc::new(MockAlarmChannel::new());
    let mut channels = AlertChannels::native(notifications.clone());
    if with_alarm {
        channels = channels.with_alarm(alarm.clone());
    }
    let clock = Arc::new(ManualClock::new(now));
    let store = Arc::new(store);
    let engine = AlertEngine::new(config, channels, store.clone(), None)
        .unwrap()
        .with_clock(clock.clone());
    Harness {
        engine,
        notifications,
        alarm,
        clock,
        store,
    }
}

impl Harness {
    /// Fire `instance_id` the way the platform does: it leaves the pending
    /// set and the engine hears about it.
    pub(crate) fn deliver(&mut self, instance_id: i32) {
        self.notifications.fire(instance_id);
        self.engine.on_alert_delivered(instance_id).unwrap();
    }

    /// A fresh engine over the same store and notification channel, as after
    /// a process restart at `now`.
    pub(crate) fn restart(&self, now: DateTime<Local>) -> Harness {
        let clock = Arc::new(ManualClock::new(now));
        let engine = AlertEngine::new(
            EngineConfig::immediate(),
            AlertChannels::native(self.notifications.clone()),
            self.store.clone(),
            None,
        )
        .unwrap()
        .with_clock(clock.clone());
        Harness {
            engine,
            notifications: self.notifications.clone(),
            alarm: self.alarm.clone(),
            clock,
            store: self.store.clone(),
        }
    }
}

/// `(instance_id, trigger)` pairs pending for `schedule_id`.
pub(crate) fn pending_pairs(
    notifications: &MockNotificationChannel,
    schedule_id: &str,
) -> BTreeSet<(i32, DateTime<Utc>)> {
    notifications
        .pending_snapshot()
        .into_iter()
        .filter(|p| {
            p.extra
                .as_ref()
                .is_some_and(|extra| extra.schedule_id == schedule_id)
        })
        .map(|p| (p.instance_id, p.trigger_at))
        .collect()
}
