//! Alerts that fired before a restart are still answered correctly after it.

use medalert::alerts::identity::{dose_id, out_of_stock_id};
use medalert::alerts::{AlertKind, InstanceStatus, RecordKind, Resolution};
use medalert::{AlertAction, DoseOutcome, EngineError};

use crate::helpers::{SCHEDULE_ID, at, daily_schedule, harness, local_trigger, on, pending_pairs};

#[tokio::test]
async fn next_day_restart_keeps_tapped_alert_off_tomorrow() {
    let mut h = harness(at(7, 0));
    h.engine.on_schedule_created(daily_schedule()).await.unwrap();
    let id = dose_id(SCHEDULE_ID, 1);
    assert!(pending_pairs(&h.notifications, SCHEDULE_ID).contains(&(id, local_trigger(1, 8, 0))));

    // Fires on the second morning while the app is closed.
    h.notifications.fire(id);
    let mut h = h.restart(on(1, 8, 1));
    h.engine.on_app_start().await.unwrap();
    let tomorrow = (id, local_trigger(2, 8, 0));
    assert!(pending_pairs(&h.notifications, SCHEDULE_ID).contains(&tomorrow));

    let outcome = h
        .engine
        .on_alert_action(id, AlertAction::Taken)
        .await
        .unwrap();
    assert_eq!(outcome.current_stock, 9);
    assert_eq!(outcome.event.unwrap().outcome, DoseOutcome::Taken);

    assert!(pending_pairs(&h.notifications, SCHEDULE_ID).contains(&tomorrow));
    let live = h
        .engine
        .live_instances()
        .iter()
        .find(|i| i.instance_id == id)
        .unwrap();
    assert_eq!(live.trigger_at, local_trigger(2, 8, 0));
    assert_eq!(live.status, InstanceStatus::Scheduled);

    let records = h.engine.pending_notifications();
    assert!(!records
        .iter()
        .any(|r| r.instance_id == Some(id) && r.trigger_at == Some(local_trigger(1, 8, 0))));
    assert!(records
        .iter()
        .any(|r| r.instance_id == Some(id) && r.trigger_at == Some(local_trigger(2, 8, 0))));

    let err = h
        .engine
        .on_alert_action(id, AlertAction::Taken)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
    assert_eq!(h.engine.history().len(), 1);
}

#[tokio::test]
async fn snoozing_a_fired_alert_after_restart_registers_a_snooze() {
    let mut h = harness(at(7, 0));
    h.engine.on_schedule_created(daily_schedule()).await.unwrap();
    let id = dose_id(SCHEDULE_ID, 1);
    h.notifications.fire(id);

    let mut h = h.restart(on(1, 8, 1));
    h.engine.on_app_start().await.unwrap();
    let outcome = h
        .engine
        .on_alert_action(id, AlertAction::Snooze)
        .await
        .unwrap();

    let report = outcome.snooze.unwrap();
    let snooze = &report.instances[0];
    assert_eq!(snooze.root_id, id);
    assert_eq!(snooze.kind, AlertKind::Snooze { generation: 1 });
    assert!(h.notifications.pending_ids().contains(&snooze.instance_id));
    assert!(pending_pairs(&h.notifications, SCHEDULE_ID).contains(&(id, local_trigger(2, 8, 0))));
}

#[tokio::test]
async fn pending_out_of_stock_alert_is_restored_on_start() {
    let mut h = harness(at(7, 0));
    h.engine
        .on_schedule_created(daily_schedule().with_stock(1, 30))
        .await
        .unwrap();
    h.clock.set(at(8, 0));
    h.engine
        .on_alert_action(dose_id(SCHEDULE_ID, 0), AlertAction::Taken)
        .await
        .unwrap();
    let oos = out_of_stock_id(SCHEDULE_ID);
    assert!(h.notifications.pending_ids().contains(&oos));

    let mut h = h.restart(at(8, 30));
    h.engine.on_app_start().await.unwrap();

    assert!(h.notifications.pending_ids().contains(&oos));
    let restored = h
        .engine
        .live_instances()
        .iter()
        .find(|i| i.instance_id == oos)
        .unwrap();
    assert_eq!(restored.kind, AlertKind::OutOfStock);
    assert_eq!(restored.trigger_at, local_trigger(0, 9, 0));
    let oos_records = h
        .engine
        .pending_notifications()
        .iter()
        .filter(|r| r.kind == RecordKind::OutOfStock)
        .count();
    assert_eq!(oos_records, 1);

    let outcome = h
        .engine
        .on_alert_action(oos, AlertAction::Dismiss)
        .await
        .unwrap();
    assert_eq!(outcome.resolution, Resolution::Dismissed);
    assert!(!h.notifications.pending_ids().contains(&oos));
    assert!(h
        .engine
        .pending_notifications()
        .iter()
        .all(|r| r.kind != RecordKind::OutOfStock));
}

#[tokio::test]
async fn out_of_stock_alert_fired_while_closed_can_be_dismissed() {
    let mut h = harness(at(7, 0));
    h.engine
        .on_schedule_created(daily_schedule().with_stock(1, 30))
        .await
        .unwrap();
    h.clock.set(at(8, 0));
    h.engine
        .on_alert_action(dose_id(SCHEDULE_ID, 0), AlertAction::Taken)
        .await
        .unwrap();
    let oos = out_of_stock_id(SCHEDULE_ID);
    h.notifications.fire(oos);

    let mut h = h.restart(at(9, 30));
    h.engine.on_app_start().await.unwrap();
    assert!(!h.notifications.pending_ids().contains(&oos));

    let outcome = h
        .engine
        .on_alert_action(oos, AlertAction::Dismiss)
        .await
        .unwrap();
    assert_eq!(outcome.resolution, Resolution::Dismissed);
    assert!(h
        .engine
        .pending_notifications()
        .iter()
        .all(|r| r.kind != RecordKind::OutOfStock));
}
