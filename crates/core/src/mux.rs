// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! Generic scaffold for multiplexing many logical sessions over a single
//! physical connection.
//!
//! A [`SessionMux`] does not own any socket or transport itself — it only
//! tracks which logical sessions are live and correlates outgoing calls
//! with their eventual responses by an integer call id. The browser
//! variant's single WebSocket-per-debug-port transport is built on top of
//! this; the terminal variant's per-pane collector connections are not
//! (each pane already gets its own physical connection, so there is
//! nothing to multiplex).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{oneshot, RwLock};

use crate::error::{ErrorCode, RpcError};

#[derive(Debug, Clone, thiserror::Error)]
pub enum MuxError {
    #[error("session '{0}' is already registered")]
    AlreadyRegistered(String),
    #[error("session '{0}' is not registered")]
    NotFound(String),
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
    #[error("session closed before the call resolved")]
    Closed,
}

impl From<MuxError> for RpcError {
    fn from(e: MuxError) -> Self {
        match e {
            MuxError::AlreadyRegistered(_) => RpcError::new(ErrorCode::InvalidParams, e.to_string()),
            MuxError::NotFound(_) => RpcError::target_gone(e.to_string()),
            MuxError::Timeout(_) | MuxError::Closed => {
                RpcError::new(ErrorCode::TransportError, e.to_string())
            }
        }
    }
}

struct SessionEntry<S> {
    state: S,
    call_ids: Vec<u64>,
}

struct PendingCall {
    session_id: String,
    tx: oneshot::Sender<Result<Value, RpcError>>,
}

/// Session registry plus call/response correlation table, generic over
/// whatever per-session state `S` the owning transport wants to keep
/// (e.g. the browser variant's attach lifecycle state).
pub struct SessionMux<S> {
    sessions: RwLock<HashMap<String, SessionEntry<S>>>,
    pending: Mutex<HashMap<u64, PendingCall>>,
    next_call_id: AtomicU64,
}

impl<S> Default for SessionMux<S> {
    fn default() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            next_call_id: AtomicU64::new(1),
        }
    }
}

impl<S> SessionMux<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new logical session. Refuses a duplicate id rather than
    /// silently replacing the existing session's state.
    pub async fn register_session(&self, session_id: impl Into<String>, state: S) -> Result<(), MuxError> {
        let session_id = session_id.into();
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session_id) {
            return Err(MuxError::AlreadyRegistered(session_id));
        }
        sessions.insert(session_id, SessionEntry { state, call_ids: Vec::new() });
        Ok(())
    }

    /// Remove a session and fail out any calls still pending against it.
    /// Returns the session's state to the caller for cleanup.
    pub async fn unregister_session(&self, session_id: &str) -> Option<S> {
        let entry = self.sessions.write().await.remove(session_id)?;
        let mut pending = self.pending.lock();
        for call_id in &entry.call_ids {
            if let Some(call) = pending.remove(call_id) {
                let _ = call.tx.send(Err(MuxError::Closed.into()));
            }
        }
        Some(entry.state)
    }

    pub async fn is_registered(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Allocate a call id correlated to `session_id`, returning it plus the
    /// receiver half the caller should await. The caller is responsible
    /// for actually writing the outgoing frame carrying this id.
    pub async fn begin_call(
        &self,
        session_id: &str,
    ) -> Result<(u64, oneshot::Receiver<Result<Value, RpcError>>), MuxError> {
        let mut sessions = self.sessions.write().await;
        let entry =
            sessions.get_mut(session_id).ok_or_else(|| MuxError::NotFound(session_id.to_owned()))?;
        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        entry.call_ids.push(call_id);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(call_id, PendingCall { session_id: session_id.to_owned(), tx });
        Ok((call_id, rx))
    }

    /// Wait for `begin_call`'s receiver with a timeout, translating the
    /// combination of outcomes into a single `Result`. On timeout, drops
    /// the now-useless pending entry so `call_id` is released immediately
    /// rather than lingering until the owning session is unregistered.
    pub async fn await_call(
        &self,
        call_id: u64,
        rx: oneshot::Receiver<Result<Value, RpcError>>,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(MuxError::Closed.into()),
            Err(_) => {
                self.pending.lock().remove(&call_id);
                Err(MuxError::Timeout(timeout).into())
            }
        }
    }

    /// Route an incoming response to the call it answers. Returns `false`
    /// if `call_id` is unknown (already timed out, or never issued).
    pub fn resolve_call(&self, call_id: u64, result: Result<Value, RpcError>) -> bool {
        let mut pending = self.pending.lock();
        let Some(call) = pending.remove(&call_id) else { return false };
        let _ = call.session_id; // call_ids vec on the session entry is left to be GC'd at unregister
        call.tx.send(result).is_ok()
    }

    pub fn pending_call_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl<S: Clone> SessionMux<S> {
    pub async fn session_state(&self, session_id: &str) -> Option<S> {
        self.sessions.read().await.get(session_id).map(|e| e.state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_registration_is_refused() {
        let mux: SessionMux<()> = SessionMux::new();
        mux.register_session("s1", ()).await.expect("first registers");
        let err = mux.register_session("s1", ()).await.unwrap_err();
        assert!(matches!(err, MuxError::AlreadyRegistered(_)));
    }

    #[tokio::test]
    async fn call_resolves_to_its_result() {
        let mux: SessionMux<()> = SessionMux::new();
        mux.register_session("s1", ()).await.unwrap();
        let (call_id, rx) = mux.begin_call("s1").await.unwrap();
        assert!(mux.resolve_call(call_id, Ok(serde_json::json!({"ok": true}))));
        let result = mux.await_call(call_id, rx, Duration::from_secs(1)).await.unwrap();
        assert_eq!(result["ok"], true);
    }

    #[tokio::test]
    async fn call_against_unknown_session_is_refused() {
        let mux: SessionMux<()> = SessionMux::new();
        assert!(matches!(mux.begin_call("ghost").await, Err(MuxError::NotFound(_))));
    }

    #[tokio::test]
    async fn unregistering_a_session_fails_its_pending_calls() {
        let mux: SessionMux<()> = SessionMux::new();
        mux.register_session("s1", ()).await.unwrap();
        let (call_id, rx) = mux.begin_call("s1").await.unwrap();
        mux.unregister_session("s1").await;
        let result = mux.await_call(call_id, rx, Duration::from_secs(1)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn call_times_out_if_never_resolved() {
        let mux: SessionMux<()> = SessionMux::new();
        mux.register_session("s1", ()).await.unwrap();
        let (call_id, rx) = mux.begin_call("s1").await.unwrap();
        let result = mux.await_call(call_id, rx, Duration::from_millis(20)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn timed_out_call_id_is_released_immediately() {
        let mux: SessionMux<()> = SessionMux::new();
        mux.register_session("s1", ()).await.unwrap();
        let (call_id, rx) = mux.begin_call("s1").await.unwrap();
        assert_eq!(mux.pending_call_count(), 1);
        let _ = mux.await_call(call_id, rx, Duration::from_millis(20)).await;
        assert_eq!(mux.pending_call_count(), 0);
    }
}
