//! Versioned host command/event envelopes for UI shell integration.

use serde::{Deserialize, Serialize};

/// Contract version for host command/event envelopes.
pub const EVENT_VERSION: u32 = 1;

/// Command set understood by the host bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandName {
    #[serde(rename = "host.ping")]
    HostPing,
    #[serde(rename = "host.version")]
    HostVersion,
    #[serde(rename = "engine.start")]
    EngineStart,
    #[serde(rename = "schedule.list")]
    ScheduleList,
    #[serde(rename = "schedule.create")]
    ScheduleCreate,
    #[serde(rename = "schedule.update")]
    ScheduleUpdate,
    #[serde(rename = "schedule.delete")]
    ScheduleDelete,
    #[serde(rename = "stock.refill")]
    StockRefill,
    #[serde(rename = "stock.set")]
    StockSet,
    #[serde(rename = "alert.action")]
    AlertAction,
    #[serde(rename = "alert.delivered")]
    AlertDelivered,
    #[serde(rename = "notifications.pending")]
    NotificationsPending,
    #[serde(rename = "notifications.dismiss_all")]
    NotificationsDismissAll,
    #[serde(rename = "history.list")]
    HistoryList,
    #[serde(rename = "stats.adherence")]
    StatsAdherence,
    #[serde(rename = "runtime.stop")]
    RuntimeStop,
}

impl CommandName {
    /// Render command name to wire format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HostPing => "host.ping",
            Self::HostVersion => "host.version",
            Self::EngineStart => "engine.start",
            Self::ScheduleList => "schedule.list",
            Self::ScheduleCreate => "schedule.create",
            Self::ScheduleUpdate => "schedule.update",
            Self::ScheduleDelete => "schedule.delete",
            Self::StockRefill => "stock.refill",
            Self::StockSet => "stock.set",
            Self::AlertAction => "alert.action",
            Self::AlertDelivered => "alert.delivered",
            Self::NotificationsPending => "notifications.pending",
            Self::NotificationsDismissAll => "notifications.dismiss_all",
            Self::HistoryList => "history.list",
            Self::StatsAdherence => "stats.adherence",
            Self::RuntimeStop => "runtime.stop",
        }
    }

    /// Parse a command name from wire format.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "host.ping" => Some(Self::HostPing),
            "host.version" => Some(Self::HostVersion),
            "engine.start" => Some(Self::EngineStart),
            "schedule.list" => Some(Self::ScheduleList),
            "schedule.create" => Some(Self::ScheduleCreate),
            "schedule.update" => Some(Self::ScheduleUpdate),
            "schedule.delete" => Some(Self::ScheduleDelete),
            "stock.refill" => Some(Self::StockRefill),
            "stock.set" => Some(Self::StockSet),
            "alert.action" => Some(Self::AlertAction),
            "alert.delivered" => Some(Self::AlertDelivered),
            "notifications.pending" => Some(Self::NotificationsPending),
            "notifications.dismiss_all" => Some(Self::NotificationsDismissAll),
            "history.list" => Some(Self::HistoryList),
            "stats.adherence" => Some(Self::StatsAdherence),
            "runtime.stop" => Some(Self::RuntimeStop),
            _ => None,
        }
    }
}

/// A versioned response envelope from backend host -> frontend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub v: u32,
    pub request_id: String,
    pub ok: bool,
    pub payload: serde_json::Value,
    pub error: Option<String>,
}

impl ResponseEnvelope {
    /// Build a successful response envelope.
    #[must_use]
    pub fn ok(request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: true,
            payload,
            error: None,
        }
    }

    /// Build an error response envelope.
    #[must_use]
    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: false,
            payload: serde_json::Value::Null,
            error: Some(message.into()),
        }
    }
}

/// A versioned command envelope from frontend -> backend host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub v: u32,
    pub request_id: String,
    pub command: CommandName,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl CommandEnvelope {
    /// Build a v1 command envelope.
    #[must_use]
    pub fn new(
        request_id: impl Into<String>,
        command: CommandName,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            command,
            payload,
        }
    }

    /// Validate envelope version and required identifiers.
    pub fn validate(&self) -> Result<(), ContractError> {
        if self.v != EVENT_VERSION {
            return Err(ContractError::new(
                ContractErrorKind::UnsupportedVersion,
                format!(
                    "unsupported contract version {}; expected {}",
                    self.v, EVENT_VERSION
                ),
            ));
        }
        if self.request_id.trim().is_empty() {
            return Err(ContractError::new(
                ContractErrorKind::InvalidEnvelope,
                "request_id cannot be empty".to_owned(),
            ));
        }
        Ok(())
    }
}

/// A versioned event envelope from backend host -> frontend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub v: u32,
    pub event_id: String,
    pub event: String,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Build a v1 event envelope with a fresh event id.
    #[must_use]
    pub fn new(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            v: EVENT_VERSION,
            event_id: uuid::Uuid::new_v4().to_string(),
            event: event.into(),
            payload,
        }
    }
}

/// Contract validation error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractErrorKind {
    UnsupportedVersion,
    InvalidEnvelope,
}

/// Contract validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractError {
    pub kind: ContractErrorKind,
    pub message: String,
}

impl ContractError {
    #[must_use]
    pub fn new(kind: ContractErrorKind, message: String) -> Self {
        Self { kind, message }
    }
}

impl std::fmt::Display for ContractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ContractError {}

impl From<ContractError> for crate::EngineError {
    fn from(e: ContractError) -> Self {
        Self::Protocol(e.to_string())
    }
}
