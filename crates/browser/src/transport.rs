// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! Session-multiplexed transport over a single CDP WebSocket (spec §4.5).
//! One physical connection per debug port; [`paneloop_core::mux::SessionMux`]
//! correlates outgoing commands with their responses, while frames that
//! carry no `sessionId` are endpoint-level and routed to a dedicated
//! ingestion channel instead of any registered session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use paneloop_core::error::{ErrorCode, RpcError};
use paneloop_core::mux::{MuxError, SessionMux};

use crate::target::ConnectionState;

/// Pseudo-session id for commands that are not scoped to any attached
/// target (`Target.*`, `/json/version` follow-ups).
pub const ENDPOINT_SESSION: &str = "__endpoint__";

/// A frame delivered off the read half, already classified by whether it
/// carries a `sessionId`.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    /// A `method`/`params` event with no `sessionId` — `Target.*` and
    /// `Inspector.*` domain events handled by the lifecycle manager.
    EndpointEvent(Value),
    /// A `method`/`params` event scoped to an attached target's session.
    SessionEvent { session_id: String, payload: Value },
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("http error discovering debugger url: {0}")]
    Discovery(#[from] reqwest::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("mux error: {0}")]
    Mux(#[from] MuxError),
    #[error("connection closed")]
    Closed,
}

impl From<TransportError> for RpcError {
    fn from(e: TransportError) -> Self {
        RpcError::new(ErrorCode::TransportError, e.to_string())
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One physical WebSocket connection to the browser's debugger, shared by
/// every attached target.
pub struct BrowserTransport {
    mux: Arc<SessionMux<ConnectionState>>,
    writer: Mutex<futures_util::stream::SplitSink<WsStream, Message>>,
    alive: AtomicBool,
}

impl BrowserTransport {
    /// Fetch `{debug_host}:{debug_port}/json/version`'s `webSocketDebuggerUrl`
    /// and open the WebSocket, registering the endpoint pseudo-session.
    /// Spawns the reader task and returns a channel the caller drains for
    /// [`InboundFrame`]s plus the transport handle itself.
    pub async fn connect(
        version_url: &str,
        mux: Arc<SessionMux<ConnectionState>>,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<InboundFrame>), TransportError> {
        let body: Value = reqwest::get(version_url).await?.json().await?;
        let ws_url = body["webSocketDebuggerUrl"]
            .as_str()
            .ok_or(TransportError::Closed)?
            .to_owned();

        let (stream, _resp) = tokio_tungstenite::connect_async(&ws_url).await?;
        let (write, read) = stream.split();

        mux.register_session(ENDPOINT_SESSION, ConnectionState::Attached).await?;

        let transport = Arc::new(Self { mux: Arc::clone(&mux), writer: Mutex::new(write), alive: AtomicBool::new(true) });
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::read_loop(Arc::clone(&transport), read, mux, tx));
        Ok((transport, rx))
    }

    /// Issue `method`/`params` against `session_id` (or [`ENDPOINT_SESSION`]
    /// for endpoint-level commands) and await its response, per spec
    /// §4.10's "CDP calls are async over the existing WebSocket" note —
    /// this runs on the async runtime directly, no blocking thread needed.
    pub async fn call(
        &self,
        session_id: &str,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let (call_id, rx) = self.mux.begin_call(session_id).await?;
        let frame = if session_id == ENDPOINT_SESSION {
            json!({"id": call_id, "method": method, "params": params})
        } else {
            json!({"id": call_id, "method": method, "params": params, "sessionId": session_id})
        };
        let text = serde_json::to_string(&frame).map_err(|e| RpcError::internal(e.to_string()))?;
        {
            let mut writer = self.writer.lock().await;
            writer.send(Message::Text(text.into())).await.map_err(|e| {
                self.alive.store(false, Ordering::SeqCst);
                RpcError::from(TransportError::from(e))
            })?;
        }
        self.mux.await_call(call_id, rx, timeout).await
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn read_loop(
        transport: Arc<Self>,
        mut read: futures_util::stream::SplitStream<WsStream>,
        mux: Arc<SessionMux<ConnectionState>>,
        tx: mpsc::UnboundedSender<InboundFrame>,
    ) {
        while let Some(message) = read.next().await {
            let text = match message {
                Ok(Message::Text(t)) => t,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    warn!(err = %e, "cdp websocket read error");
                    break;
                }
            };
            let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                debug!("dropping unparseable cdp frame");
                continue;
            };

            if let Some(id) = frame.get("id").and_then(Value::as_u64) {
                let result = if let Some(error) = frame.get("error") {
                    Err(RpcError::new(ErrorCode::Internal, error.to_string()))
                } else {
                    Ok(frame.get("result").cloned().unwrap_or(Value::Null))
                };
                mux.resolve_call(id, result);
                continue;
            }

            let Some(method) = frame.get("method").and_then(Value::as_str) else { continue };
            let payload = json!({"method": method, "params": frame.get("params").cloned().unwrap_or(Value::Null)});
            let outcome = match frame.get("sessionId").and_then(Value::as_str) {
                Some(session_id) => tx.send(InboundFrame::SessionEvent { session_id: session_id.to_owned(), payload }),
                None => tx.send(InboundFrame::EndpointEvent(payload)),
            };
            if outcome.is_err() {
                break;
            }
        }

        // Mark dead before touching the mux so `call` stops accepting new
        // work; draining the pending-call map fails every outstanding
        // caller instead of leaving them to time out one by one.
        transport.alive.store(false, Ordering::SeqCst);
        mux.unregister_session(ENDPOINT_SESSION).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_session_name_is_stable() {
        assert_eq!(ENDPOINT_SESSION, "__endpoint__");
    }
}
