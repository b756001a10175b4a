//! End-to-end scheduling scenarios against the in-memory channels.

use std::collections::BTreeSet;

use medalert::alerts::identity::{dose_id, out_of_stock_id};
use medalert::alerts::{AlertKind, RecordKind};
use medalert::{
    AlertAction, AlertTime, DoseOutcome, RecurrenceRule, ScheduleOutcome, ScheduleStore,
};

use crate::helpers::{SCHEDULE_ID, at, daily_schedule, harness, local_trigger, pending_pairs};

fn expected_pairs(offsets: &[u32], hour: u32, minute: u32) -> BTreeSet<(i32, chrono::DateTime<chrono::Utc>)> {
    offsets
        .iter()
        .map(|&d| (dose_id(SCHEDULE_ID, d), local_trigger(u64::from(d), hour, minute)))
        .collect()
}

#[tokio::test]
async fn created_before_alert_time_schedules_today_and_six_more() {
    let mut h = harness(at(7, 58));
    let report = h.engine.on_schedule_created(daily_schedule()).await.unwrap();

    assert!(matches!(report.outcome, ScheduleOutcome::Scheduled { count: 7, .. }));
    assert_eq!(
        pending_pairs(&h.notifications, SCHEDULE_ID),
        expected_pairs(&[0, 1, 2, 3, 4, 5, 6], 8, 0)
    );
    assert_eq!(h.notifications.schedule_calls(), 1);
}

#[tokio::test]
async fn created_after_alert_time_skips_today() {
    let mut h = harness(at(8, 5));
    let report = h.engine.on_schedule_created(daily_schedule()).await.unwrap();

    assert!(matches!(report.outcome, ScheduleOutcome::Scheduled { count: 6, .. }));
    assert_eq!(
        pending_pairs(&h.notifications, SCHEDULE_ID),
        expected_pairs(&[1, 2, 3, 4, 5, 6], 8, 0)
    );
}

#[tokio::test]
async fn every_other_day_uses_even_offsets() {
    let mut h = harness(at(7, 0));
    h.engine
        .on_schedule_created(daily_schedule().with_recurrence(RecurrenceRule::EveryOtherDay))
        .await
        .unwrap();

    assert_eq!(
        pending_pairs(&h.notifications, SCHEDULE_ID),
        expected_pairs(&[0, 2, 4, 6], 8, 0)
    );
}

#[tokio::test]
async fn taking_last_dose_raises_out_of_stock_alert() {
    let mut h = harness(at(7, 0));
    h.engine
        .on_schedule_created(daily_schedule().with_stock(1, 30))
        .await
        .unwrap();

    h.deliver(dose_id(SCHEDULE_ID, 0));
    let outcome = h
        .engine
        .on_alert_action(dose_id(SCHEDULE_ID, 0), AlertAction::Taken)
        .await
        .unwrap();

    assert_eq!(outcome.current_stock, 0);
    assert_eq!(h.engine.schedule(SCHEDULE_ID).unwrap().current_stock, 0);
    assert_eq!(h.engine.history().len(), 1);
    assert_eq!(h.engine.history()[0].outcome, DoseOutcome::Taken);
    assert_eq!(h.store.load_history().unwrap().len(), 1);

    let report = outcome.out_of_stock.expect("out-of-stock alert scheduled");
    assert!(matches!(report.outcome, ScheduleOutcome::Scheduled { count: 1, .. }));
    let oos = out_of_stock_id(SCHEDULE_ID);
    let instance = &report.instances[0];
    assert_eq!(instance.instance_id, oos);
    assert_eq!(instance.kind, AlertKind::OutOfStock);
    assert_eq!(instance.trigger_at, local_trigger(0, 9, 0));

    let request = h.notifications.request(oos).unwrap();
    assert_eq!(request.title, "Out of Stock: Metformin");
    assert!(request.actions.is_empty());
    assert!(!h.notifications.pending_ids().contains(&dose_id(SCHEDULE_ID, 0)));

    let oos_records = h
        .engine
        .pending_notifications()
        .iter()
        .filter(|r| r.kind == RecordKind::OutOfStock)
        .count();
    assert_eq!(oos_records, 1);
}

#[tokio::test]
async fn editing_alert_time_replaces_every_pending_alert() {
    let mut h = harness(at(7, 0));
    let other = daily_schedule().with_recurrence(RecurrenceRule::Daily);
    let other = medalert::MedicationSchedule {
        id: "1700000054321".to_owned(),
        name: "Lisinopril".to_owned(),
        ..other
    };
    h.engine.on_schedule_created(daily_schedule()).await.unwrap();
    h.engine.on_schedule_created(other.clone()).await.unwrap();

    let before = pending_pairs(&h.notifications, SCHEDULE_ID);
    let other_before = pending_pairs(&h.notifications, &other.id);
    assert_eq!(before.len(), 7);

    let mut edited = daily_schedule();
    edited.alert_time = AlertTime::new(9, 30).unwrap();
    let report = h.engine.on_schedule_updated(edited).await.unwrap();
    assert!(matches!(report.outcome, ScheduleOutcome::Scheduled { count: 7, .. }));

    let after = pending_pairs(&h.notifications, SCHEDULE_ID);
    assert_eq!(after, expected_pairs(&[0, 1, 2, 3, 4, 5, 6], 9, 30));
    assert!(before.is_disjoint(&after));
    assert_eq!(pending_pairs(&h.notifications, &other.id), other_before);
}

#[tokio::test]
async fn deleting_schedule_cancels_everything() {
    let mut h = harness(at(7, 0));
    h.engine
        .on_schedule_created(daily_schedule().with_stock(1, 30))
        .await
        .unwrap();
    h.deliver(dose_id(SCHEDULE_ID, 0));
    h.engine
        .on_alert_action(dose_id(SCHEDULE_ID, 0), AlertAction::Taken)
        .await
        .unwrap();
    assert!(h.notifications.pending_ids().contains(&out_of_stock_id(SCHEDULE_ID)));

    h.engine.on_schedule_deleted(SCHEDULE_ID).await.unwrap();

    assert!(h.notifications.pending_ids().is_empty());
    assert!(h.engine.schedules().is_empty());
    assert!(h.store.load_schedules().unwrap().is_empty());
}

#[tokio::test]
async fn refilling_clears_out_of_stock_alert() {
    let mut h = harness(at(7, 0));
    h.engine
        .on_schedule_created(daily_schedule().with_stock(1, 30))
        .await
        .unwrap();
    h.deliver(dose_id(SCHEDULE_ID, 0));
    h.engine
        .on_alert_action(dose_id(SCHEDULE_ID, 0), AlertAction::Taken)
        .await
        .unwrap();

    let schedule = h.engine.refill(SCHEDULE_ID, 30).await.unwrap();

    assert_eq!(schedule.current_stock, 30);
    assert!(!h.notifications.pending_ids().contains(&out_of_stock_id(SCHEDULE_ID)));
    assert!(
        h.engine
            .pending_notifications()
            .iter()
            .all(|r| r.kind == RecordKind::Dose)
    );
}
