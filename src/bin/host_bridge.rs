//! Headless host bridge binary for stdin/stdout JSON communication.
//!
//! Reads `CommandEnvelope` messages as newline-delimited JSON from stdin,
//! dispatches them to the alert engine, and writes `ResponseEnvelope` and
//! `EventEnvelope` messages to stdout.
//!
//! There is no native alert platform behind this process, so alerts are
//! delivered by in-process timers and surface as `alert.fired` events.
//!
//! All tracing output goes to stderr (and the daily log file) so that
//! stdout remains a clean JSON protocol channel.

use std::sync::Arc;

use medalert::alerts::AlertChannels;
use medalert::host::run_stdio_bridge;
use medalert::{AlertEngine, EngineConfig, JsonFileStore, app_dirs, diagnostics};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_dir = app_dirs::logs_dir();
    let _log_guard = diagnostics::init_tracing(Some(log_dir.as_path()))?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "medalert-host starting");

    let config_path = EngineConfig::default_config_path();
    let config = EngineConfig::load_or_default(&config_path)?;
    let store = JsonFileStore::default_location();
    tracing::info!(
        config = %config_path.display(),
        data = %store.root().display(),
        "using state locations"
    );

    let (fired_tx, fired_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut engine = AlertEngine::new(
        config,
        AlertChannels::browser_only(),
        Arc::new(store),
        Some(fired_tx),
    )?;
    let startup = engine.on_app_start().await?;
    tracing::info!(
        schedules = startup.schedules.len(),
        stale_cancelled = startup.stale_cancelled,
        "engine started"
    );

    run_stdio_bridge(engine, Some(fired_rx))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "medalert-host exited with error");
            anyhow::anyhow!("medalert-host failed: {e}")
        })?;

    tracing::info!("medalert-host shut down cleanly");
    Ok(())
}
