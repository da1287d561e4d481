//! Stdio tool-call server.
//!
//! Speaks line-delimited JSON-RPC 2.0 with the coding agent: one request per
//! line on stdin, one response per line on stdout. Nothing else may write to
//! stdout.
//!
//! # Concurrency
//!
//! Every `tools/call` runs on its own task so a five-minute approval never
//! stalls a status notification. Responses from all tasks funnel through a
//! single writer task, so lines never interleave. A
//! `notifications/cancelled` for an in-flight call trips that call's
//! cancellation token, which cancels its pending relay request.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::session::Session;
use crate::tools::{call_tool, tool_definitions};

/// Protocol revision offered when the client does not name one.
const PROTOCOL_VERSION: &str = "2025-03-26";

/// JSON-RPC: method not found.
const METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC: parse error.
const PARSE_ERROR: i64 = -32700;

type InFlight = Arc<Mutex<HashMap<String, CancellationToken>>>;

fn response(id: &Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error_response(id: &Value, code: i64, message: String) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}

/// Queue `message` for the writer task. Returns `false` once the writer has
/// stopped, after which nothing reaches the client.
fn emit(out_tx: &mpsc::UnboundedSender<Value>, message: Value) -> bool {
    if out_tx.send(message).is_err() {
        log::error!("Output writer has stopped; dropping response");
        return false;
    }
    true
}

/// Serve tool calls from `input`, writing responses to `output`, until
/// `input` reaches EOF.
///
/// On EOF every in-flight call is cancelled and its (cancelled) response
/// flushed before returning. If `output` fails first, serving stops the
/// same way and the write error is returned.
pub async fn serve<R, W>(session: Arc<Session>, input: R, output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();
    let writer = tokio::spawn(async move {
        let mut output = output;
        while let Some(message) = out_rx.recv().await {
            let mut line = message.to_string();
            line.push('\n');
            output.write_all(line.as_bytes()).await?;
            output.flush().await?;
        }
        Ok::<(), std::io::Error>(())
    });

    let in_flight: InFlight = Arc::default();
    let mut calls = JoinSet::new();
    let mut lines = input.lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            () = out_tx.closed() => {
                log::error!("Output closed; no longer reading requests");
                break;
            }
        };
        let Some(line) = line else {
            log::info!("Client closed stdin");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        let message: Value = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Invalid JSON from client: {e}");
                if !emit(&out_tx, error_response(&Value::Null, PARSE_ERROR, format!("Parse error: {e}"))) {
                    break;
                }
                continue;
            }
        };

        let method = message.get("method").and_then(Value::as_str).unwrap_or("");
        let id = message.get("id").cloned();
        let params = message.get("params").cloned().unwrap_or_else(|| json!({}));

        match (method, id) {
            ("initialize", Some(id)) => {
                let version = params
                    .get("protocolVersion")
                    .and_then(Value::as_str)
                    .unwrap_or(PROTOCOL_VERSION);
                let init = json!({
                    "protocolVersion": version,
                    "capabilities": { "tools": {} },
                    "serverInfo": {
                        "name": "punchdown",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                });
                if !emit(&out_tx, response(&id, init)) {
                    break;
                }
            }

            ("notifications/initialized", _) => {
                log::info!("Client initialized");
            }

            ("ping", Some(id)) => {
                if !emit(&out_tx, response(&id, json!({}))) {
                    break;
                }
            }

            ("tools/list", Some(id)) => {
                if !emit(&out_tx, response(&id, json!({ "tools": tool_definitions() }))) {
                    break;
                }
            }

            ("tools/call", Some(id)) => {
                let name = params.get("name").and_then(Value::as_str).unwrap_or("").to_string();
                let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

                let key = id.to_string();
                let cancel = CancellationToken::new();
                in_flight
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(key.clone(), cancel.clone());

                let session = Arc::clone(&session);
                let in_flight = Arc::clone(&in_flight);
                let out_tx = out_tx.clone();
                calls.spawn(async move {
                    log::debug!("tools/call {name} (id {key})");
                    let result = call_tool(&session, &name, arguments, &cancel).await;
                    in_flight.lock().unwrap_or_else(PoisonError::into_inner).remove(&key);
                    match serde_json::to_value(&result) {
                        Ok(result) => {
                            emit(&out_tx, response(&id, result));
                        }
                        Err(e) => log::error!("Unserializable result for {name}: {e}"),
                    }
                });
            }

            ("notifications/cancelled", _) => {
                let Some(request_id) = params.get("requestId") else {
                    continue;
                };
                let token = in_flight
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(&request_id.to_string())
                    .cloned();
                if let Some(token) = token {
                    log::info!("Client cancelled call {request_id}");
                    token.cancel();
                }
            }

            (_, Some(id)) => {
                let unknown = error_response(&id, METHOD_NOT_FOUND, format!("Method not found: {method}"));
                if !emit(&out_tx, unknown) {
                    break;
                }
            }

            // Unknown notification: nothing to answer.
            (_, None) => log::debug!("Ignoring notification {method}"),
        }

        // Reap finished calls so the set does not grow unbounded.
        while calls.try_join_next().is_some() {}
    }

    log::info!("Cancelling {} in-flight call(s)", calls.len());
    for token in in_flight.lock().unwrap_or_else(PoisonError::into_inner).values() {
        token.cancel();
    }
    while calls.join_next().await.is_some() {}

    drop(out_tx);
    writer
        .await
        .context("Writer task failed")?
        .context("Failed to write stdout")?;
    Ok(())
}
