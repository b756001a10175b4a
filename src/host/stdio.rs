//! Stdin/stdout JSON bridge for the host command channel.
//!
//! Reads newline-delimited JSON `CommandEnvelope` messages from stdin,
//! dispatches them through the [`HostCommandServer`], and writes
//! `ResponseEnvelope` and `EventEnvelope` messages as newline-delimited
//! JSON to stdout.
//!
//! Stdout is exclusively reserved for the JSON protocol; all diagnostic
//! output must be routed to stderr.

use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::{Mutex, mpsc};

use crate::alerts::FiredAlert;
use crate::engine::AlertEngine;
use crate::error::{EngineError, Result};
use crate::host::channel::{HostCommandClient, HostCommandServer, command_channel};
use crate::host::contract::{CommandEnvelope, CommandName, ResponseEnvelope};

/// Default request channel capacity for the stdio bridge.
const REQUEST_CAPACITY: usize = 64;

/// Default event broadcast channel capacity for the stdio bridge.
const EVENT_CAPACITY: usize = 128;

/// Run the bridge on the process's stdin and stdout until stdin closes or a
/// `runtime.stop` command is received.
pub async fn run_stdio_bridge(
    engine: AlertEngine,
    fired_rx: Option<mpsc::UnboundedReceiver<FiredAlert>>,
) -> Result<()> {
    let (client, server) = command_channel(REQUEST_CAPACITY, EVENT_CAPACITY, engine, fired_rx);
    run_bridge(
        client,
        server,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await
}

/// Run the bridge over arbitrary line input and output.
///
/// Three tasks operate concurrently:
///
/// 1. **Reader** -- reads newline-delimited JSON, dispatches each
///    `CommandEnvelope` through the client, and writes the response.
/// 2. **Event forwarder** -- writes broadcast `EventEnvelope`s as JSON lines.
/// 3. **Server** -- owns the engine and serves requests and timer firings.
///
/// The bridge exits when the reader finishes. Dropping the client causes the
/// server task to exit.
pub async fn run_bridge<R, W>(
    client: HostCommandClient,
    server: HostCommandServer,
    input: R,
    output: W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let writer = Arc::new(Mutex::new(BufWriter::new(output)));

    let server_handle = tokio::spawn(server.run());

    let event_writer = Arc::clone(&writer);
    let mut event_rx = client.subscribe_events();
    let event_handle = tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event_envelope) => match serde_json::to_string(&event_envelope) {
                    Ok(json) => {
                        let mut w = event_writer.lock().await;
                        if let Err(e) = write_line(&mut *w, &json).await {
                            tracing::warn!(
                                error = %e,
                                "failed to write event envelope; stopping event forwarder"
                            );
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize event envelope; skipping");
                    }
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, "event forwarder lagged; some events were dropped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    tracing::info!("event broadcast channel closed; stopping event forwarder");
                    break;
                }
            }
        }
    });

    let reader_result = run_reader(client, input, Arc::clone(&writer)).await;

    // The reader dropped the client, so the server drains and exits.
    let _ = server_handle.await;
    event_handle.abort();
    let _ = event_handle.await;

    reader_result
}

async fn run_reader<R, W>(
    client: HostCommandClient,
    input: R,
    writer: Arc<Mutex<BufWriter<W>>>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();

    loop {
        let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| EngineError::Channel(format!("failed to read command input: {e}")))?
        else {
            tracing::info!("command input closed (EOF); shutting down bridge");
            break;
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let envelope: CommandEnvelope = match serde_json::from_str(trimmed) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(error = %e, raw_line = %trimmed, "failed to parse command envelope");
                let response = ResponseEnvelope::error(
                    "parse-error",
                    format!("failed to parse command envelope: {e}"),
                );
                write_response(&writer, &response).await?;
                continue;
            }
        };

        let is_stop = envelope.command == CommandName::RuntimeStop;
        let request_id = envelope.request_id.clone();
        let command = envelope.command;

        let response = match client.send(envelope).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(
                    request_id = %request_id,
                    command = command.as_str(),
                    error = %e,
                    "host command failed"
                );
                ResponseEnvelope::error(request_id, e.to_string())
            }
        };
        write_response(&writer, &response).await?;

        if is_stop {
            tracing::info!("runtime.stop received; shutting down bridge");
            break;
        }
    }

    Ok(())
}

async fn write_response<W: AsyncWrite + Unpin>(
    writer: &Mutex<BufWriter<W>>,
    response: &ResponseEnvelope,
) -> Result<()> {
    let json = serde_json::to_string(response).map_err(|e| {
        EngineError::Protocol(format!("failed to serialize response envelope: {e}"))
    })?;
    let mut w = writer.lock().await;
    write_line(&mut *w, &json).await
}

/// Write a single JSON line and flush.
async fn write_line<W: AsyncWrite + Unpin>(writer: &mut BufWriter<W>, json: &str) -> Result<()> {
    writer
        .write_all(json.as_bytes())
        .await
        .map_err(|e| EngineError::Channel(format!("failed to write output: {e}")))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| EngineError::Channel(format!("failed to write newline: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| EngineError::Channel(format!("failed to flush output: {e}")))?;
    Ok(())
}
