// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

//! Thin caller-side client for a paneloop daemon's three sockets: request/
//! response over `rpc.sock`, and a read-only line stream over
//! `events.sock`. Both daemons (`paneloopd`, `paneloop-browserd`) speak the
//! same newline-delimited JSON wire format, so one client serves both.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;

use paneloop_core::error::{ErrorCode, RpcError};
use paneloop_core::lifecycle::runtime_dir;

/// Connected to a daemon's `rpc.sock`. Requests are written and their
/// response read back one at a time under a single mutex — the daemon
/// answers each line on a connection strictly in order, so there is no id
/// correlation to do beyond that serialization.
pub struct Client {
    conn: Mutex<Connection>,
    next_id: AtomicI64,
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    /// Connect to a daemon's RPC socket at an explicit path.
    pub async fn connect(socket_path: impl AsRef<Path>) -> Result<Self, RpcError> {
        let stream = UnixStream::connect(socket_path.as_ref())
            .await
            .map_err(|e| transport_err(socket_path.as_ref(), e))?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            conn: Mutex::new(Connection { reader: BufReader::new(read_half), writer: write_half }),
            next_id: AtomicI64::new(1),
        })
    }

    /// Connect to `<tool>`'s RPC socket under the standard runtime
    /// directory (`$XDG_RUNTIME_DIR/<tool>/rpc.sock`), without the caller
    /// needing to know the socket layout.
    pub async fn connect_tool(tool: &str) -> Result<Self, RpcError> {
        Self::connect(runtime_dir(tool).join("rpc.sock")).await
    }

    /// Issue one request and wait for its response.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = serde_json::json!({ "id": id, "method": method, "params": params });
        let mut line = serde_json::to_vec(&request)
            .map_err(|e| RpcError::new(ErrorCode::ParseError, e.to_string()))?;
        line.push(b'\n');

        let mut conn = self.conn.lock().await;
        conn.writer
            .write_all(&line)
            .await
            .map_err(|e| RpcError::new(ErrorCode::TransportError, e.to_string()))?;

        let mut response_line = String::new();
        let n = conn
            .reader
            .read_line(&mut response_line)
            .await
            .map_err(|e| RpcError::new(ErrorCode::TransportError, e.to_string()))?;
        drop(conn);
        if n == 0 {
            return Err(RpcError::new(ErrorCode::TransportError, "connection closed by daemon"));
        }

        parse_response(&response_line)
    }

    /// Connect to `events_socket_path` and return a stream of parsed event
    /// objects. Lives on `Client` as a namespaced constructor rather than a
    /// method since the event socket is a separate connection from the one
    /// an existing `Client` holds.
    pub async fn subscribe(events_socket_path: impl AsRef<Path>) -> Result<EventStream, RpcError> {
        let stream = UnixStream::connect(events_socket_path.as_ref())
            .await
            .map_err(|e| transport_err(events_socket_path.as_ref(), e))?;
        Ok(EventStream { reader: BufReader::new(stream) })
    }

    /// Subscribe to `<tool>`'s events socket under the standard runtime
    /// directory.
    pub async fn subscribe_tool(tool: &str) -> Result<EventStream, RpcError> {
        Self::subscribe(runtime_dir(tool).join("events.sock")).await
    }
}

fn transport_err(path: &Path, e: std::io::Error) -> RpcError {
    RpcError::new(ErrorCode::TransportError, format!("{}: {e}", path.display()))
}

fn parse_response(line: &str) -> Result<Value, RpcError> {
    let response: Value = serde_json::from_str(line)
        .map_err(|e| RpcError::new(ErrorCode::ParseError, e.to_string()))?;

    if let Some(error) = response.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(ErrorCode::Internal.code() as i64);
        let message =
            error.get("message").and_then(Value::as_str).unwrap_or("unknown error").to_owned();
        return Err(RpcError::new(code_from_wire(code), message));
    }
    Ok(response.get("result").cloned().unwrap_or(Value::Null))
}

fn code_from_wire(code: i64) -> ErrorCode {
    match code {
        -32700 => ErrorCode::ParseError,
        -32601 => ErrorCode::MethodNotFound,
        -32602 => ErrorCode::InvalidParams,
        -32000 => ErrorCode::NotConnected,
        -32001 => ErrorCode::TransportError,
        -32002 => ErrorCode::TargetGone,
        _ => ErrorCode::Internal,
    }
}

/// A subscription to a daemon's event socket: one parsed JSON object per
/// line, until the daemon closes the connection.
pub struct EventStream {
    reader: BufReader<UnixStream>,
}

impl EventStream {
    /// Wait for the next event. Returns `None` once the daemon hangs up
    /// (e.g. on shutdown) rather than an error — callers should treat that
    /// as "reconnect if you still care", matching how subscribers are
    /// expected to re-read state on reconnect rather than trust a gap-free
    /// stream.
    pub async fn next_event(&mut self) -> Result<Option<Value>, RpcError> {
        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| RpcError::new(ErrorCode::TransportError, e.to_string()))?;
        if n == 0 {
            return Ok(None);
        }
        let value = serde_json::from_str(line.trim_end())
            .map_err(|e| RpcError::new(ErrorCode::ParseError, e.to_string()))?;
        Ok(Some(value))
    }
}

/// Resolve the default RPC/events socket paths for a tool name, for
/// callers that want the paths without connecting yet (e.g. to decide
/// whether a daemon is worth starting).
pub fn default_sockets(tool: &str) -> (PathBuf, PathBuf) {
    let dir = runtime_dir(tool);
    (dir.join("rpc.sock"), dir.join("events.sock"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use paneloop_core::rpc::Dispatcher;
    use tokio::net::UnixListener;

    async fn serve_one(listener: UnixListener, dispatcher: Dispatcher<()>) {
        let (stream, _) = listener.accept().await.expect("accept");
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        while let Some(line) = lines.next_line().await.expect("line") {
            let response = dispatcher.dispatch_line((), line.as_bytes()).await;
            write_half.write_all(&response).await.expect("write");
        }
    }

    #[tokio::test]
    async fn call_round_trips_a_successful_result() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let sock = dir.path().join("rpc.sock");

        let mut dispatcher = Dispatcher::new();
        dispatcher.register("ping", |_ctx, _params| async { Ok(serde_json::json!({"pong": true})) });

        let listener = UnixListener::bind(&sock).expect("bind");
        let server = tokio::spawn(serve_one(listener, dispatcher));

        let client = Client::connect(&sock).await.expect("connect");
        let result = client.call("ping", serde_json::json!({})).await.expect("call");
        assert_eq!(result["pong"], true);

        drop(client);
        let _ = server.await;
    }

    #[tokio::test]
    async fn call_surfaces_a_structured_error() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let sock = dir.path().join("rpc.sock");

        let mut dispatcher = Dispatcher::new();
        dispatcher.register("boom", |_ctx, _params| async {
            Err(RpcError::invalid_params("bad params"))
        });

        let listener = UnixListener::bind(&sock).expect("bind");
        let server = tokio::spawn(serve_one(listener, dispatcher));

        let client = Client::connect(&sock).await.expect("connect");
        let err = client.call("boom", serde_json::json!({})).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParams);
        assert_eq!(err.message, "bad params");

        drop(client);
        let _ = server.await;
    }

    #[tokio::test]
    async fn connect_to_missing_socket_is_a_transport_error() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let sock = dir.path().join("nonexistent.sock");
        let err = Client::connect(&sock).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::TransportError);
    }
}
