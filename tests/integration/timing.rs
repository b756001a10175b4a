//! Fixed delays of the default configuration, measured on a paused tokio clock.

use std::sync::Arc;
use std::time::Duration;

use medalert::alerts::channel::ChannelError;
use medalert::{
    AlertChannels, AlertEngine, EngineConfig, ManualClock, MedicationSchedule, MemoryStore,
    ScheduleOutcome,
};
use tokio::time::Instant;

use crate::helpers::{at, build, daily_schedule};

/// Sleeps under a paused clock complete at their deadline; allow timer granularity.
fn assert_elapsed(start: Instant, expected: Duration) {
    let elapsed = start.elapsed();
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_millis(50),
        "expected about {expected:?}, measured {elapsed:?}"
    );
}

fn schedule_with_id(id: &str) -> MedicationSchedule {
    MedicationSchedule {
        id: id.to_owned(),
        ..daily_schedule()
    }
}

#[tokio::test(start_paused = true)]
async fn retries_wait_the_backoff_then_settle_before_verifying() {
    let config = EngineConfig::default();
    assert_eq!(config.delivery.retry_backoff_ms, 500);
    assert_eq!(config.delivery.verification_settle_ms, 300);
    let mut h = build(at(7, 0), config, false, MemoryStore::new());
    h.notifications
        .fail_next(ChannelError::Rejected("throttled".to_owned()), 2);

    let start = Instant::now();
    let report = h.engine.on_schedule_created(daily_schedule()).await.unwrap();

    assert!(matches!(report.outcome, ScheduleOutcome::Scheduled { count: 7, .. }));
    assert_eq!(h.notifications.schedule_calls(), 3);
    assert_elapsed(start, Duration::from_millis(2 * 500 + 300));
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_stop_after_the_last_attempt() {
    let mut h = build(at(7, 0), EngineConfig::default(), false, MemoryStore::new());
    h.notifications
        .fail_always(Some(ChannelError::Unavailable("service down".to_owned())));

    let start = Instant::now();
    let report = h.engine.on_schedule_created(daily_schedule()).await.unwrap();

    assert!(matches!(
        report.outcome,
        ScheduleOutcome::RetriesExhausted { attempts: 3, .. }
    ));
    // Backoff between attempts only, and nothing to verify.
    assert_elapsed(start, Duration::from_millis(2 * 500));
}

#[tokio::test(start_paused = true)]
async fn startup_pauses_between_schedules_and_delays_cleanup() {
    let config = EngineConfig::default();
    assert_eq!(config.reconcile.inter_schedule_pause_ms, 100);
    assert_eq!(config.reconcile.startup_cleanup_delay_ms, 2000);
    let store = MemoryStore::with_schedules(vec![
        schedule_with_id("1700000012345"),
        schedule_with_id("1700000060001"),
        schedule_with_id("1700000070002"),
    ]);
    let mut engine = AlertEngine::new(
        config,
        AlertChannels::browser_only(),
        Arc::new(store),
        None,
    )
    .unwrap()
    .with_clock(Arc::new(ManualClock::new(at(7, 0))));

    let start = Instant::now();
    let startup = engine.on_app_start().await.unwrap();

    assert_eq!(startup.schedules.len(), 3);
    assert_elapsed(start, Duration::from_millis(2 * 100 + 2000));
}

#[tokio::test(start_paused = true)]
async fn native_startup_adds_one_settle_per_schedule() {
    let store = MemoryStore::with_schedules(vec![
        schedule_with_id("1700000012345"),
        schedule_with_id("1700000060001"),
    ]);
    let mut h = build(at(7, 0), EngineConfig::default(), false, store);

    let start = Instant::now();
    let startup = h.engine.on_app_start().await.unwrap();

    assert!(startup
        .schedules
        .iter()
        .all(|r| matches!(r.outcome, ScheduleOutcome::Scheduled { count: 7, .. })));
    assert_elapsed(start, Duration::from_millis(2 * 300 + 100 + 2000));
}
