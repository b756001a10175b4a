//! Delivery, identity and action properties across the whole engine.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, TimeDelta, TimeZone, Utc};
use medalert::alerts::channel::{AlarmPermission, ChannelError, PendingAlert};
use medalert::alerts::identity::{dose_id, out_of_stock_id, snooze_id, window_ids};
use medalert::alerts::{AlertKind, DeliveryChannel, DeliveryIssue, InstanceStatus};
use medalert::{
    AlertAction, AlertChannels, AlertEngine, ChannelPreference, EngineConfig, EngineError,
    ManualClock, MemoryStore, ScheduleOutcome,
};

use crate::helpers::{
    SCHEDULE_ID, at, build, daily_schedule, harness, harness_with_alarm, local_trigger,
    pending_pairs,
};

#[test]
fn identifiers_are_pure_functions_of_schedule_and_offset() {
    for offset in 0..7 {
        assert_eq!(dose_id(SCHEDULE_ID, offset), dose_id(SCHEDULE_ID, offset));
    }
    let ids = window_ids(SCHEDULE_ID, 7);
    let unique: std::collections::BTreeSet<_> = ids.iter().collect();
    assert_eq!(unique.len(), ids.len());
    assert!(!ids.contains(&out_of_stock_id(SCHEDULE_ID)));
}

#[tokio::test]
async fn nothing_is_registered_inside_the_minimum_lead_time() {
    let now = Local.with_ymd_and_hms(2025, 6, 10, 7, 59, 58).unwrap();
    let mut h = harness(now);
    let report = h.engine.on_schedule_created(daily_schedule()).await.unwrap();

    assert!(matches!(report.outcome, ScheduleOutcome::Scheduled { count: 6, .. }));
    let lag = TimeDelta::milliseconds(
        i64::try_from(h.engine.config().window.notification_lag_ms).unwrap(),
    );
    let floor = now.with_timezone(&Utc) + lag;
    for (_, trigger) in pending_pairs(&h.notifications, SCHEDULE_ID) {
        assert!(trigger >= floor);
    }
}

#[tokio::test]
async fn past_end_date_reports_nothing_to_schedule() {
    let mut h = harness(at(9, 0));
    let schedule = daily_schedule().with_active_until(Some(crate::helpers::day()));
    let report = h.engine.on_schedule_created(schedule).await.unwrap();

    assert_eq!(report.outcome, ScheduleOutcome::NothingToSchedule);
    assert!(h.notifications.pending_ids().is_empty());
}

#[tokio::test]
async fn stock_never_goes_below_zero() {
    let mut h = harness(at(7, 0));
    h.engine
        .on_schedule_created(daily_schedule().with_stock(2, 30))
        .await
        .unwrap();

    let mut stocks = Vec::new();
    for offset in 0..4 {
        h.deliver(dose_id(SCHEDULE_ID, offset));
        let outcome = h
            .engine
            .on_alert_action(dose_id(SCHEDULE_ID, offset), AlertAction::Taken)
            .await
            .unwrap();
        stocks.push(outcome.current_stock);
        assert!(offset < 2 || outcome.out_of_stock.is_none());
    }

    assert_eq!(stocks, vec![1, 0, 0, 0]);
    assert_eq!(h.engine.history().len(), 4);
    let oos_alerts = h
        .engine
        .live_instances()
        .iter()
        .filter(|i| i.kind == AlertKind::OutOfStock)
        .count();
    assert_eq!(oos_alerts, 1);
}

#[tokio::test]
async fn out_of_stock_alert_moves_to_tomorrow_after_nine() {
    let mut h = harness(at(10, 0));
    h.engine
        .on_schedule_created(daily_schedule().with_stock(1, 30))
        .await
        .unwrap();

    h.deliver(dose_id(SCHEDULE_ID, 1));
    let outcome = h
        .engine
        .on_alert_action(dose_id(SCHEDULE_ID, 1), AlertAction::Taken)
        .await
        .unwrap();

    let report = outcome.out_of_stock.unwrap();
    assert_eq!(report.instances[0].trigger_at, local_trigger(1, 9, 0));
}

#[tokio::test]
async fn out_of_stock_alert_only_accepts_dismiss() {
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

    let oos = out_of_stock_id(SCHEDULE_ID);
    let err = h
        .engine
        .on_alert_action(oos, AlertAction::Taken)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));

    let outcome = h
        .engine
        .on_alert_action(oos, AlertAction::Dismiss)
        .await
        .unwrap();
    assert!(outcome.event.is_none());
    assert!(!h.notifications.pending_ids().contains(&oos));
    assert_eq!(h.engine.history().len(), 1);
}

#[tokio::test]
async fn snoozes_never_reuse_an_identifier() {
    let mut h = harness(at(7, 0));
    h.engine.on_schedule_created(daily_schedule()).await.unwrap();
    let original = dose_id(SCHEDULE_ID, 0);
    let delay = h.engine.config().actions.snooze();

    h.deliver(original);
    let first = h
        .engine
        .on_alert_action(original, AlertAction::Snooze)
        .await
        .unwrap()
        .snooze
        .unwrap();
    let first = first.instances[0].clone();
    assert_eq!(first.instance_id, snooze_id(original, 1));
    assert_eq!(first.root_id, original);
    assert_eq!(first.trigger_at, at(7, 0).with_timezone(&Utc) + delay);
    assert!(!h.notifications.pending_ids().contains(&original));

    h.clock.advance(delay);
    let second = h
        .engine
        .on_alert_action(first.instance_id, AlertAction::Snooze)
        .await
        .unwrap()
        .snooze
        .unwrap();
    let second = second.instances[0].clone();
    assert_eq!(second.kind, AlertKind::Snooze { generation: 2 });

    let window = window_ids(SCHEDULE_ID, 7);
    assert_ne!(second.instance_id, original);
    assert_ne!(second.instance_id, first.instance_id);
    for offset in 0..7 {
        assert_ne!(first.instance_id, dose_id(SCHEDULE_ID, offset));
        assert_ne!(second.instance_id, dose_id(SCHEDULE_ID, offset));
    }
    assert!(window.contains(&second.instance_id));
    assert!(h.notifications.pending_ids().contains(&second.instance_id));
    assert!(!h.notifications.pending_ids().contains(&first.instance_id));
    assert!(h.engine.history().is_empty());
}

#[tokio::test]
async fn alarm_preference_uses_exact_alarms() {
    let mut h = harness_with_alarm(at(7, 0));
    let report = h
        .engine
        .on_schedule_created(daily_schedule().with_channel(ChannelPreference::Alarm))
        .await
        .unwrap();

    assert_eq!(
        report.outcome,
        ScheduleOutcome::Scheduled {
            count: 7,
            channels: vec![DeliveryChannel::Alarm],
        }
    );
    assert_eq!(h.alarm.alarm_ids().len(), 7);
    assert_eq!(h.alarm.alarm(dose_id(SCHEDULE_ID, 0)).unwrap().patient_label, "Alice");
    assert!(h.notifications.pending_ids().is_empty());

    h.deliver(dose_id(SCHEDULE_ID, 0));
    h.engine
        .on_alert_action(dose_id(SCHEDULE_ID, 0), AlertAction::Taken)
        .await
        .unwrap();
    assert!(h.alarm.cancelled_ids().contains(&dose_id(SCHEDULE_ID, 0)));
    assert_eq!(h.alarm.alarm_ids().len(), 6);
}

#[tokio::test]
async fn missing_alarm_permission_falls_back_to_notifications() {
    let mut h = harness_with_alarm(at(7, 0));
    h.alarm.set_permission(AlarmPermission {
        has_permission: false,
        requires_permission: true,
    });
    let report = h
        .engine
        .on_schedule_created(daily_schedule().with_channel(ChannelPreference::Alarm))
        .await
        .unwrap();

    assert!(matches!(report.outcome, ScheduleOutcome::Scheduled { count: 7, .. }));
    assert!(report.issues.contains(&DeliveryIssue::AlarmPermissionRequired));
    assert!(h.alarm.alarm_ids().is_empty());
    assert_eq!(pending_pairs(&h.notifications, SCHEDULE_ID).len(), 7);
    let request = h.notifications.request(dose_id(SCHEDULE_ID, 0)).unwrap();
    assert_eq!(request.priority, 2);
}

#[tokio::test]
async fn failing_alarm_registration_falls_back_per_instance() {
    let mut h = harness_with_alarm(at(7, 0));
    h.alarm
        .fail_with(Some(ChannelError::Rejected("alarm service busy".to_owned())));
    let report = h
        .engine
        .on_schedule_created(daily_schedule().with_channel(ChannelPreference::Alarm))
        .await
        .unwrap();

    let fallbacks = report
        .issues
        .iter()
        .filter(|i| matches!(i, DeliveryIssue::AlarmFallback { .. }))
        .count();
    assert_eq!(fallbacks, 7);
    assert_eq!(pending_pairs(&h.notifications, SCHEDULE_ID).len(), 7);
    assert!(report
        .instances
        .iter()
        .all(|i| i.channel == DeliveryChannel::Notification));
}

#[tokio::test]
async fn notification_permission_denial_is_terminal() {
    let mut h = harness(at(7, 0));
    h.notifications.fail_always(Some(ChannelError::PermissionDenied(
        "notifications disabled".to_owned(),
    )));
    let report = h.engine.on_schedule_created(daily_schedule()).await.unwrap();

    assert!(matches!(
        report.outcome,
        ScheduleOutcome::PermissionDenied {
            channel: DeliveryChannel::Notification,
            ..
        }
    ));
    assert!(report.outcome.is_failure());
    assert_eq!(h.notifications.schedule_calls(), 1);
    assert!(h.engine.live_instances().is_empty());
    // The schedule itself is kept.
    assert_eq!(h.engine.schedules().len(), 1);
}

#[tokio::test]
async fn persistent_failure_exhausts_retries() {
    let mut h = harness(at(7, 0));
    h.notifications
        .fail_always(Some(ChannelError::Unavailable("service down".to_owned())));
    let report = h.engine.on_schedule_created(daily_schedule()).await.unwrap();

    match report.outcome {
        ScheduleOutcome::RetriesExhausted {
            attempts,
            last_error,
        } => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("service down"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(h.notifications.schedule_calls(), 3);
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let mut h = harness(at(7, 0));
    h.notifications
        .fail_next(ChannelError::Rejected("throttled".to_owned()), 2);
    let report = h.engine.on_schedule_created(daily_schedule()).await.unwrap();

    assert!(matches!(report.outcome, ScheduleOutcome::Scheduled { count: 7, .. }));
    assert_eq!(h.notifications.schedule_calls(), 3);
}

#[tokio::test]
async fn lost_registration_is_reported_not_retried() {
    let mut h = harness(at(7, 0));
    h.notifications.lose_registration(dose_id(SCHEDULE_ID, 3));
    let report = h.engine.on_schedule_created(daily_schedule()).await.unwrap();

    assert!(report.issues.contains(&DeliveryIssue::VerificationMismatch {
        expected: 7,
        actual: 6,
    }));
    assert_eq!(h.notifications.schedule_calls(), 1);
}

#[tokio::test]
async fn startup_reschedules_and_cancels_stale_alerts() {
    let store = MemoryStore::with_schedules(vec![daily_schedule()]);
    let mut h = build(at(7, 0), EngineConfig::immediate(), false, store);
    h.notifications.insert_pending(PendingAlert {
        instance_id: 999,
        trigger_at: at(6, 0).with_timezone(&Utc),
        extra: None,
    });

    let startup = h.engine.on_app_start().await.unwrap();

    assert_eq!(startup.schedules.len(), 1);
    assert_eq!(startup.stale_cancelled, 1);
    assert!(!h.notifications.pending_ids().contains(&999));
    assert_eq!(pending_pairs(&h.notifications, SCHEDULE_ID).len(), 7);
    assert_eq!(h.engine.pending_notifications().len(), 7);
}

#[tokio::test]
async fn delivered_alert_can_still_be_acted_on() {
    let mut h = harness(at(7, 0));
    h.engine.on_schedule_created(daily_schedule()).await.unwrap();
    let id = dose_id(SCHEDULE_ID, 0);

    h.clock.set(at(8, 0));
    h.notifications.fire(id);
    let instance = h.engine.on_alert_delivered(id).unwrap();
    assert_eq!(instance.status, InstanceStatus::Delivered);

    let outcome = h.engine.on_alert_action(id, AlertAction::Skip).await.unwrap();
    assert_eq!(outcome.current_stock, 10);
    assert_eq!(h.engine.adherence().skipped, 1);
}

#[tokio::test(start_paused = true)]
async fn without_native_platform_timers_fire_in_process() {
    let (fired_tx, mut fired_rx) = tokio::sync::mpsc::unbounded_channel();
    let clock = Arc::new(ManualClock::new(at(7, 59)));
    let mut engine = AlertEngine::new(
        EngineConfig::immediate(),
        AlertChannels::browser_only(),
        Arc::new(MemoryStore::new()),
        Some(fired_tx),
    )
    .unwrap()
    .with_clock(clock);

    let report = engine.on_schedule_created(daily_schedule()).await.unwrap();
    assert_eq!(
        report.outcome,
        ScheduleOutcome::Scheduled {
            count: 7,
            channels: vec![DeliveryChannel::BrowserFallback],
        }
    );

    let fired = tokio::time::timeout(Duration::from_secs(120), fired_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fired.instance_id, dose_id(SCHEDULE_ID, 0));
    assert_eq!(fired.schedule_id, SCHEDULE_ID);

    let delivered = engine.on_alert_delivered(fired.instance_id).unwrap();
    assert_eq!(delivered.status, InstanceStatus::Delivered);
}
