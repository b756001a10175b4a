//! In-process timer tier used when no native alert platform is present.
//!
//! Timers live only as long as the process. Each armed alert is a spawned
//! task that sleeps until its trigger and then reports a [`FiredAlert`] on
//! the channel handed to [`BrowserTimers::new`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::channel::NotificationRequest;

/// An in-process timer that reached its trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FiredAlert {
    pub instance_id: i32,
    pub schedule_id: String,
    pub title: String,
    pub body: String,
    pub fired_at: DateTime<Utc>,
}

/// Armed in-process timers keyed by instance id.
#[derive(Debug, Default)]
pub struct BrowserTimers {
    handles: HashMap<i32, JoinHandle<()>>,
    fired_tx: Option<mpsc::UnboundedSender<FiredAlert>>,
}

impl BrowserTimers {
    /// Create a timer set. Without a sender, fired timers are only logged.
    pub fn new(fired_tx: Option<mpsc::UnboundedSender<FiredAlert>>) -> Self {
        Self {
            handles: HashMap::new(),
            fired_tx,
        }
    }

    /// Arm a timer for `request` that fires after `delay`, replacing any
    /// timer already armed under the same id.
    pub fn arm(&mut self, request: &NotificationRequest, delay: Duration) {
        self.cancel(&[request.instance_id]);

        let tx = self.fired_tx.clone();
        let fired = FiredAlert {
            instance_id: request.instance_id,
            schedule_id: request.extra.schedule_id.clone(),
            title: request.title.clone(),
            body: request.body.clone(),
            fired_at: request.trigger_at,
        };
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tracing::info!(instance_id = fired.instance_id, title = %fired.title, "in-process alert fired");
            if let Some(tx) = tx
                && tx.send(fired).is_err()
            {
                tracing::debug!("fired-alert receiver dropped");
            }
        });
        self.handles.insert(request.instance_id, handle);
    }

    /// Abort the timers for `ids`. Returns how many were still armed.
    pub fn cancel(&mut self, ids: &[i32]) -> usize {
        let mut cancelled = 0;
        for id in ids {
            if let Some(handle) = self.handles.remove(id) {
                if !handle.is_finished() {
                    cancelled += 1;
                }
                handle.abort();
            }
        }
        cancelled
    }

    /// Identifiers of timers that have not fired yet, ascending.
    pub fn armed_ids(&mut self) -> Vec<i32> {
        self.handles.retain(|_, handle| !handle.is_finished());
        let mut ids: Vec<i32> = self.handles.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl Drop for BrowserTimers {
    fn drop(&mut self) {
        for handle in self.handles.values() {
            handle.abort();
        }
    }
}
