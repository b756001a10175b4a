//! In-memory mock implementations of [`AlarmChannel`] and [`NotificationChannel`].
//!
//! These are used in tests and in dry runs to exercise the engine without a
//! platform alert service. Both mocks record every call and support failure
//! injection.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Mutex;

use super::channel::{
    AlarmChannel, AlarmPermission, AlarmRequest, ChannelError, ChannelResult, NotificationChannel,
    NotificationRequest, PendingAlert,
};

fn poisoned() -> ChannelError {
    ChannelError::Unavailable("mock lock poisoned".to_owned())
}

// ─── MockNotificationChannel ─────────────────────────────────────────────────

#[derive(Default)]
struct NotificationState {
    pending: BTreeMap<i32, PendingAlert>,
    requests: BTreeMap<i32, NotificationRequest>,
    schedule_calls: usize,
    cancelled: Vec<i32>,
    queued_failures: VecDeque<ChannelError>,
    permanent_failure: Option<ChannelError>,
    lost: HashSet<i32>,
}

/// An in-memory notification service.
///
/// Registering an identifier that is already pending replaces it, the way
/// platform notification services do.
#[derive(Default)]
pub struct MockNotificationChannel {
    state: Mutex<NotificationState>,
}

impl MockNotificationChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> ChannelResult<std::sync::MutexGuard<'_, NotificationState>> {
        self.state.lock().map_err(|_| poisoned())
    }

    /// Fail the next `times` registration calls with `error`.
    pub fn fail_next(&self, error: ChannelError, times: usize) {
        if let Ok(mut state) = self.lock() {
            state.queued_failures.extend(std::iter::repeat_n(error, times));
        }
    }

    /// Fail every registration call with `error` until cleared with `None`.
    pub fn fail_always(&self, error: Option<ChannelError>) {
        if let Ok(mut state) = self.lock() {
            state.permanent_failure = error;
        }
    }

    /// Accept a registration for `instance_id` but never make it pending.
    pub fn lose_registration(&self, instance_id: i32) {
        if let Ok(mut state) = self.lock() {
            state.lost.insert(instance_id);
        }
    }

    /// Seed the pending set directly, bypassing registration.
    pub fn insert_pending(&self, alert: PendingAlert) {
        if let Ok(mut state) = self.lock() {
            state.pending.insert(alert.instance_id, alert);
        }
    }

    /// Remove `instance_id` from the pending set as if it had fired.
    pub fn fire(&self, instance_id: i32) -> Option<PendingAlert> {
        self.lock().ok()?.pending.remove(&instance_id)
    }

    /// Identifiers currently pending, ascending.
    pub fn pending_ids(&self) -> Vec<i32> {
        self.lock()
            .map(|state| state.pending.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Snapshot of the pending set.
    pub fn pending_snapshot(&self) -> Vec<PendingAlert> {
        self.lock()
            .map(|state| state.pending.values().cloned().collect())
            .unwrap_or_default()
    }

    /// The last request registered under `instance_id`.
    pub fn request(&self, instance_id: i32) -> Option<NotificationRequest> {
        self.lock().ok()?.requests.get(&instance_id).cloned()
    }

    /// Number of `schedule` calls, failed ones included.
    pub fn schedule_calls(&self) -> usize {
        self.lock().map(|state| state.schedule_calls).unwrap_or(0)
    }

    /// Every identifier passed to `cancel`, in call order.
    pub fn cancelled_ids(&self) -> Vec<i32> {
        self.lock()
            .map(|state| state.cancelled.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl NotificationChannel for MockNotificationChannel {
    async fn schedule(&self, requests: &[NotificationRequest]) -> ChannelResult<()> {
        let mut state = self.lock()?;
        state.schedule_calls += 1;
        if let Some(error) = state.queued_failures.pop_front() {
            return Err(error);
        }
        if let Some(error) = state.permanent_failure.clone() {
            return Err(error);
        }
        for request in requests {
            state.requests.insert(request.instance_id, request.clone());
            if state.lost.contains(&request.instance_id) {
                continue;
            }
            state.pending.insert(
                request.instance_id,
                PendingAlert {
                    instance_id: request.instance_id,
                    trigger_at: request.trigger_at,
                    extra: Some(request.extra.clone()),
                },
            );
        }
        Ok(())
    }

    async fn cancel(&self, instance_ids: &[i32]) -> ChannelResult<()> {
        let mut state = self.lock()?;
        for id in instance_ids {
            state.pending.remove(id);
            state.cancelled.push(*id);
        }
        Ok(())
    }

    async fn pending(&self) -> ChannelResult<Vec<PendingAlert>> {
        Ok(self.lock()?.pending.values().cloned().collect())
    }
}

// ─── MockAlarmChannel ────────────────────────────────────────────────────────

struct AlarmState {
    alarms: BTreeMap<i32, AlarmRequest>,
    cancelled: Vec<i32>,
    permission: AlarmPermission,
    failure: Option<ChannelError>,
}

/// An in-memory exact-alarm service. Permission is granted by default.
pub struct MockAlarmChannel {
    state: Mutex<AlarmState>,
}

impl Default for MockAlarmChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAlarmChannel {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AlarmState {
                alarms: BTreeMap::new(),
                cancelled: Vec::new(),
                permission: AlarmPermission {
                    has_permission: true,
                    requires_permission: true,
                },
                failure: None,
            }),
        }
    }

    fn lock(&self) -> ChannelResult<std::sync::MutexGuard<'_, AlarmState>> {
        self.state.lock().map_err(|_| poisoned())
    }

    /// Revoke or grant the exact-alarm permission.
    pub fn set_permission(&self, permission: AlarmPermission) {
        if let Ok(mut state) = self.lock() {
            state.permission = permission;
        }
    }

    /// Fail every `schedule_alarm` call with `error` until cleared with `None`.
    pub fn fail_with(&self, error: Option<ChannelError>) {
        if let Ok(mut state) = self.lock() {
            state.failure = error;
        }
    }

    /// Identifiers of registered alarms, ascending.
    pub fn alarm_ids(&self) -> Vec<i32> {
        self.lock()
            .map(|state| state.alarms.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn alarm(&self, instance_id: i32) -> Option<AlarmRequest> {
        self.lock().ok()?.alarms.get(&instance_id).cloned()
    }

    /// Every identifier passed to `cancel_alarm`, in call order.
    pub fn cancelled_ids(&self) -> Vec<i32> {
        self.lock()
            .map(|state| state.cancelled.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AlarmChannel for MockAlarmChannel {
    async fn schedule_alarm(&self, request: &AlarmRequest) -> ChannelResult<()> {
        let mut state = self.lock()?;
        if let Some(error) = state.failure.clone() {
            return Err(error);
        }
        state.alarms.insert(request.instance_id, request.clone());
        Ok(())
    }

    async fn cancel_alarm(&self, instance_id: i32) -> ChannelResult<()> {
        let mut state = self.lock()?;
        state.cancelled.push(instance_id);
        state
            .alarms
            .remove(&instance_id)
            .map(|_| ())
            .ok_or_else(|| ChannelError::NotFound(format!("alarm {instance_id}")))
    }

    async fn check_permission(&self) -> ChannelResult<AlarmPermission> {
        Ok(self.lock()?.permission)
    }
}
