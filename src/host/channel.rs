//! Host command channel.
//!
//! [`HostCommandServer`] owns the [`AlertEngine`] and processes one command
//! at a time, so engine operations never interleave. In-process timer
//! firings arrive on the same task and are turned into `alert.fired` events.

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::alerts::{AlertAction, FiredAlert};
use crate::engine::AlertEngine;
use crate::error::{EngineError, Result};
use crate::host::contract::{CommandEnvelope, CommandName, EventEnvelope, ResponseEnvelope};
use crate::schedule::{MedicationSchedule, generate_schedule_id};

struct HostCommandRequest {
    envelope: CommandEnvelope,
    response_tx: oneshot::Sender<Result<ResponseEnvelope>>,
}

#[derive(Clone)]
pub struct HostCommandClient {
    request_tx: mpsc::Sender<HostCommandRequest>,
    event_tx: broadcast::Sender<EventEnvelope>,
}

impl HostCommandClient {
    pub async fn send(&self, envelope: CommandEnvelope) -> Result<ResponseEnvelope> {
        envelope.validate().map_err(|e| {
            EngineError::Protocol(format!(
                "invalid host command envelope {}: {}",
                envelope.request_id, e
            ))
        })?;

        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(HostCommandRequest {
                envelope,
                response_tx,
            })
            .await
            .map_err(|e| EngineError::Channel(format!("failed to send host command request: {e}")))?;

        response_rx
            .await
            .map_err(|e| EngineError::Channel(format!("host command response dropped: {e}")))?
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<EventEnvelope> {
        self.event_tx.subscribe()
    }
}

pub struct HostCommandServer {
    request_rx: mpsc::Receiver<HostCommandRequest>,
    event_tx: broadcast::Sender<EventEnvelope>,
    fired_rx: Option<mpsc::UnboundedReceiver<FiredAlert>>,
    engine: AlertEngine,
}

/// Create a client/server pair around `engine`.
///
/// `fired_rx` is the receiving end of the sender given to
/// [`AlertEngine::new`]; pass `None` when the engine has no in-process timers.
#[must_use]
pub fn command_channel(
    request_capacity: usize,
    event_capacity: usize,
    engine: AlertEngine,
    fired_rx: Option<mpsc::UnboundedReceiver<FiredAlert>>,
) -> (HostCommandClient, HostCommandServer) {
    let (request_tx, request_rx) = mpsc::channel(request_capacity.max(1));
    let (event_tx, _event_rx) = broadcast::channel(event_capacity.max(1));

    (
        HostCommandClient {
            request_tx,
            event_tx: event_tx.clone(),
        },
        HostCommandServer {
            request_rx,
            event_tx,
            fired_rx,
            engine,
        },
    )
}

async fn next_fired(rx: &mut Option<mpsc::UnboundedReceiver<FiredAlert>>) -> Option<FiredAlert> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl HostCommandServer {
    /// Serve requests until every client is dropped.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                request = self.request_rx.recv() => {
                    let Some(request) = request else { break };
                    let response = self.route(&request.envelope).await;
                    let _ = request.response_tx.send(response);
                }
                Some(fired) = next_fired(&mut self.fired_rx) => self.handle_fired(fired),
            }
        }
        tracing::debug!("host command server stopped");
    }

    #[must_use]
    pub fn engine(&self) -> &AlertEngine {
        &self.engine
    }

    /// Route a command envelope to the engine.
    pub async fn route(&mut self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let request_id = envelope.request_id.clone();
        let payload = &envelope.payload;
        let body = match envelope.command {
            CommandName::HostPing => serde_json::json!({"pong": true}),
            CommandName::HostVersion => serde_json::json!({
                "contract_version": crate::host::contract::EVENT_VERSION,
                "package_version": env!("CARGO_PKG_VERSION"),
            }),
            CommandName::EngineStart => {
                let report = self.engine.on_app_start().await?;
                to_payload(&report)?
            }
            CommandName::ScheduleList => to_payload(self.engine.schedules())?,
            CommandName::ScheduleCreate => {
                let schedule = parse_schedule(payload, "schedule.create", true)?;
                let report = self.engine.on_schedule_created(schedule).await?;
                let body = to_payload(&report)?;
                self.emit_event("schedule.created", body.clone());
                body
            }
            CommandName::ScheduleUpdate => {
                let schedule = parse_schedule(payload, "schedule.update", false)?;
                let report = self.engine.on_schedule_updated(schedule).await?;
                let body = to_payload(&report)?;
                self.emit_event("schedule.updated", body.clone());
                body
            }
            CommandName::ScheduleDelete => {
                let id = parse_non_empty_field(payload, "id", "schedule.delete")?;
                let removed = self.engine.on_schedule_deleted(&id).await?;
                self.emit_event("schedule.deleted", serde_json::json!({"id": removed.id}));
                serde_json::json!({"deleted": true, "id": removed.id})
            }
            CommandName::StockRefill => {
                let id = parse_non_empty_field(payload, "id", "stock.refill")?;
                let amount = parse_u32_field(payload, "amount", "stock.refill")?;
                let schedule = self.engine.refill(&id, amount).await?;
                to_payload(&schedule)?
            }
            CommandName::StockSet => {
                let id = parse_non_empty_field(payload, "id", "stock.set")?;
                let current = parse_u32_field(payload, "current_stock", "stock.set")?;
                let schedule = self.engine.set_stock(&id, current).await?;
                to_payload(&schedule)?
            }
            CommandName::AlertAction => {
                let instance_id = parse_instance_id(payload, "alert.action")?;
                let action: AlertAction =
                    parse_non_empty_field(payload, "action", "alert.action")?.parse()?;
                let outcome = self.engine.on_alert_action(instance_id, action).await?;
                to_payload(&outcome)?
            }
            CommandName::AlertDelivered => {
                let instance_id = parse_instance_id(payload, "alert.delivered")?;
                let instance = self.engine.on_alert_delivered(instance_id)?;
                to_payload(&instance)?
            }
            CommandName::NotificationsPending => {
                to_payload(&self.engine.pending_notifications())?
            }
            CommandName::NotificationsDismissAll => {
                let dismissed = self.engine.dismiss_all_pending()?;
                serde_json::json!({"dismissed": dismissed})
            }
            CommandName::HistoryList => match parse_history_scope(payload)? {
                HistoryScope::Today => to_payload(&self.engine.todays_history())?,
                HistoryScope::All => to_payload(self.engine.history())?,
            },
            CommandName::StatsAdherence => to_payload(&self.engine.adherence())?,
            CommandName::RuntimeStop => serde_json::json!({"stopping": true}),
        };
        Ok(ResponseEnvelope::ok(request_id, body))
    }

    fn handle_fired(&mut self, fired: FiredAlert) {
        if let Err(e) = self.engine.on_alert_delivered(fired.instance_id) {
            tracing::warn!(
                instance_id = fired.instance_id,
                error = %e,
                "fired alert is no longer live"
            );
        }
        match to_payload(&fired) {
            Ok(payload) => self.emit_event("alert.fired", payload),
            Err(e) => tracing::error!(error = %e, "failed to serialize fired alert"),
        }
    }

    fn emit_event(&self, event: &str, payload: serde_json::Value) {
        let _ = self.event_tx.send(EventEnvelope::new(event, payload));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HistoryScope {
    Today,
    All,
}

fn to_payload<T: Serialize + ?Sized>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| EngineError::Protocol(format!("failed to serialize response payload: {e}")))
}

fn parse_non_empty_field(
    payload: &serde_json::Value,
    field: &str,
    command: &str,
) -> Result<String> {
    let Some(raw) = payload.get(field).and_then(serde_json::Value::as_str) else {
        return Err(EngineError::Protocol(format!(
            "{command} requires payload.{field}"
        )));
    };
    let value = raw.trim();
    if value.is_empty() {
        return Err(EngineError::Protocol(format!(
            "{command} requires a non-empty payload.{field}"
        )));
    }
    Ok(value.to_owned())
}

fn parse_u32_field(payload: &serde_json::Value, field: &str, command: &str) -> Result<u32> {
    payload
        .get(field)
        .and_then(serde_json::Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| {
            EngineError::Protocol(format!(
                "{command} requires a non-negative integer payload.{field}"
            ))
        })
}

fn parse_instance_id(payload: &serde_json::Value, command: &str) -> Result<i32> {
    payload
        .get("instance_id")
        .and_then(serde_json::Value::as_i64)
        .and_then(|v| i32::try_from(v).ok())
        .ok_or_else(|| EngineError::Protocol(format!("{command} requires payload.instance_id")))
}

/// Decode `payload.schedule`. On create a missing or blank id is generated.
fn parse_schedule(
    payload: &serde_json::Value,
    command: &str,
    generate_id: bool,
) -> Result<MedicationSchedule> {
    let Some(raw) = payload.get("schedule") else {
        return Err(EngineError::Protocol(format!(
            "{command} requires payload.schedule"
        )));
    };
    let mut raw = raw.clone();
    if generate_id && let Some(object) = raw.as_object_mut() {
        let blank = object
            .get("id")
            .and_then(serde_json::Value::as_str)
            .is_none_or(|id| id.trim().is_empty());
        if blank {
            object.insert("id".to_owned(), generate_schedule_id().into());
        }
    }
    serde_json::from_value(raw)
        .map_err(|e| EngineError::Protocol(format!("{command} has an invalid schedule: {e}")))
}

fn parse_history_scope(payload: &serde_json::Value) -> Result<HistoryScope> {
    match payload.get("scope").and_then(serde_json::Value::as_str) {
        None | Some("all") => Ok(HistoryScope::All),
        Some("today") => Ok(HistoryScope::Today),
        Some(other) => Err(EngineError::Protocol(format!(
            "history.list scope must be \"all\" or \"today\", got {other:?}"
        ))),
    }
}
