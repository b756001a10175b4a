//! Tracing subscriber setup.
//!
//! Diagnostic output goes to stderr so stdout stays free for the host
//! protocol. When a log directory is given, records are also appended to a
//! daily rolling file (`medalert.log.YYYY-MM-DD`).

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::{EngineError, Result};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "medalert=info";

/// File name prefix of the rolling log.
pub const LOG_FILE_PREFIX: &str = "medalert.log";

/// Build the env filter, falling back to [`DEFAULT_FILTER`].
#[must_use]
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the life of the process. It is `None` when no log directory was given.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created or a global
/// subscriber is already installed.
pub fn init_tracing(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter())
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| EngineError::Config(format!("failed to install tracing subscriber: {e}")))?;

    Ok(guard)
}
