//! Error types for the medication alert engine.

/// Top-level error type for the alert engine.
///
/// Scheduling results the user must see (permission denied, retries
/// exhausted, nothing to schedule) are not errors; they are reported through
/// [`crate::alerts::ScheduleOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A schedule or value violates a model invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// No schedule with the given id is known.
    #[error("unknown schedule: {0}")]
    UnknownSchedule(String),

    /// A schedule with the given id already exists.
    #[error("duplicate schedule: {0}")]
    DuplicateSchedule(String),

    /// No live alert instance with the given id is known.
    #[error("unknown alert instance: {0}")]
    UnknownInstance(i32),

    /// The alert instance is not in a state that accepts the action.
    #[error("invalid transition for alert {instance_id}: {message}")]
    InvalidTransition {
        /// Instance the action was addressed to.
        instance_id: i32,
        /// What was attempted.
        message: String,
    },

    /// Persistence collaborator failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Alert channel failure that escaped the delivery chain.
    #[error("channel error: {0}")]
    Channel(String),

    /// Malformed host command or payload.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, EngineError>;
