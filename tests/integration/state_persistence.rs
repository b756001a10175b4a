//! Engine state survives a restart through the JSON file store.

use std::sync::Arc;

use medalert::alerts::identity::dose_id;
use medalert::alerts::mock::MockNotificationChannel;
use medalert::alerts::RecordStatus;
use medalert::{
    AlertAction, AlertChannels, AlertEngine, EngineConfig, JsonFileStore, ManualClock,
    ScheduleStore,
};

use crate::helpers::{SCHEDULE_ID, at, daily_schedule, pending_pairs};

fn engine_over(
    root: &std::path::Path,
    notifications: Arc<MockNotificationChannel>,
) -> AlertEngine {
    AlertEngine::new(
        EngineConfig::immediate(),
        AlertChannels::native(notifications),
        Arc::new(JsonFileStore::new(root)),
        None,
    )
    .unwrap()
    .with_clock(Arc::new(ManualClock::new(at(7, 0))))
}

#[tokio::test]
async fn schedules_history_and_records_survive_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let mut engine = engine_over(dir.path(), Arc::new(MockNotificationChannel::new()));
        engine.on_schedule_created(daily_schedule()).await.unwrap();
        engine.on_alert_delivered(dose_id(SCHEDULE_ID, 0)).unwrap();
        engine
            .on_alert_action(dose_id(SCHEDULE_ID, 0), AlertAction::Taken)
            .await
            .unwrap();
    }

    let store = JsonFileStore::new(dir.path());
    assert_eq!(store.load_schedules().unwrap()[0].current_stock, 9);
    assert_eq!(store.load_history().unwrap().len(), 1);
    let records = store.load_notifications().unwrap();
    assert!(records.iter().any(|r| r.status == RecordStatus::Taken));

    let notifications = Arc::new(MockNotificationChannel::new());
    let mut engine = engine_over(dir.path(), notifications.clone());
    let startup = engine.on_app_start().await.unwrap();

    assert_eq!(startup.schedules.len(), 1);
    assert_eq!(engine.schedule(SCHEDULE_ID).unwrap().current_stock, 9);
    assert_eq!(engine.history().len(), 1);
    assert_eq!(engine.todays_history().len(), 1);
    assert_eq!(pending_pairs(&notifications, SCHEDULE_ID).len(), 7);
    assert_eq!(engine.pending_notifications().len(), 7);
    assert_eq!(engine.adherence().taken, 1);
}

#[tokio::test]
async fn fresh_directory_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine_over(
        &dir.path().join("not-yet-created"),
        Arc::new(MockNotificationChannel::new()),
    );

    let startup = engine.on_app_start().await.unwrap();

    assert!(startup.schedules.is_empty());
    assert_eq!(startup.stale_cancelled, 0);
    assert!(engine.schedules().is_empty());
    assert!(engine.history().is_empty());
}

#[test]
fn config_file_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let mut config = EngineConfig::default();
    config.window.lookahead_days = 5;
    config.actions.snooze_minutes = 10;

    config.save_to_file(&path).unwrap();
    let loaded = EngineConfig::from_file(&path).unwrap();

    assert_eq!(loaded.window.lookahead_days, 5);
    assert_eq!(loaded.actions.snooze_minutes, 10);
    assert_eq!(loaded.delivery.registration_attempts, 3);
}
