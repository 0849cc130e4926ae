// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! RPC method handlers registered against the shared
//! [`paneloop_core::rpc::Dispatcher`]. Reuses the core mandatory method
//! table (spec §6) minus the terminal-only pattern-store methods
//! (`learn_pattern`/`remove_pattern`/`get_patterns` — the Pattern Store is
//! scoped to the terminal tool per spec.md's component table; see
//! DESIGN.md Open Questions), plus browser-specific `cdp`/`navigate`/
//! `js`/`fetch`.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use paneloop_core::action::{Action, ActionState};
use paneloop_core::broadcaster::Event;
use paneloop_core::error::{ErrorCode, RpcError};
use paneloop_core::rpc::Dispatcher;

use crate::events::DebugView;
use crate::server::AppState;

fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    serde_json::from_value(params).map_err(|e| RpcError::invalid_params(e.to_string()))
}

fn session_for(state: &AppState, target: &str) -> Result<String, RpcError> {
    let session = state.targets.lock().session_id_for(target).map(str::to_owned);
    match session {
        Some(s) if !s.is_empty() => Ok(s),
        Some(_) => Err(RpcError::new(ErrorCode::NotConnected, format!("target not yet attached: {target}"))),
        None => Err(RpcError::target_gone(target)),
    }
}

fn require_transport(state: &AppState) -> Result<Arc<crate::transport::BrowserTransport>, RpcError> {
    state.transport().ok_or_else(|| RpcError::new(ErrorCode::NotConnected, "no browser connection"))
}

pub fn build_dispatcher() -> Dispatcher<Arc<AppState>> {
    let mut d = Dispatcher::new();
    d.register("ping", |_state, _params| async { Ok(serde_json::json!({"pong": true})) });
    d.register("execute", |state, params| async move { execute(state, params).await });
    d.register("send", |state, params| async move { execute(state, params).await });
    d.register("resolve", |state, params| async move { resolve(state, params).await });
    d.register("get_queue", |state, _params| async move { Ok(state.queue.lock().snapshot()) });
    d.register("get_status", |state, params| async move { get_status(state, params).await });
    d.register("interrupt", |state, params| async move { interrupt(state, params).await });
    d.register("ls", |state, _params| async move {
        Ok(crate::events::targets_snapshot(&state.targets.lock()))
    });
    d.register("select_pane", |state, params| async move { select(state, params).await });
    d.register("select_panes", |state, params| async move { select(state, params).await });
    d.register("cleanup", |state, _params| async move { cleanup(state).await });
    d.register("debug_eval", |state, params| async move { debug_eval(state, params).await });
    d.register("cdp", |state, params| async move { cdp(state, params).await });
    d.register("navigate", |state, params| async move { navigate(state, params).await });
    d.register("js", |state, params| async move { js(state, params).await });
    d.register("fetch", |state, params| async move { fetch(state, params).await });
    d
}

#[derive(Deserialize)]
struct TargetParams {
    target: String,
}

/// `execute`/`send`: the terminal variant's "command text" becomes a bare
/// CDP method name run with empty params (callers needing params use
/// `cdp` directly). Mirrors the terminal's wire contract — returns
/// `watching` immediately, completes asynchronously once the protocol
/// round trip returns.
#[derive(Deserialize, serde::Serialize)]
struct ExecuteParams {
    target: String,
    command: String,
    #[serde(default)]
    #[allow(dead_code)]
    client_pane: Option<String>,
}

async fn execute(state: Arc<AppState>, params: Value) -> Result<Value, RpcError> {
    let p: ExecuteParams = parse_params(params)?;
    let session = session_for(&state, &p.target)?;
    let transport = require_transport(&state)?;

    if let Some(existing_id) = state.targets.lock().get(&p.target).and_then(|t| t.action_id.clone()) {
        if let Some(existing) = state.queue.lock().get(&existing_id) {
            if !existing.state.is_terminal() {
                return Ok(serde_json::json!({"status": "busy"}));
            }
        }
    }

    let action = {
        let mut queue = state.queue.lock();
        queue.add(Action::new(p.target.clone(), p.command.clone(), ActionState::Watching))
    };
    if let Some(t) = state.targets.lock().get_mut(&p.target) {
        t.action_id = Some(action.id.clone());
    }
    state.broadcaster.publish(Event::new(
        "action_added",
        serde_json::json!({"action_id": action.id, "target_id": p.target, "state": "WATCHING"}),
    ));

    let timeout = Duration::from_secs(state.config.call_timeout_secs);
    let action_id = action.id.clone();
    let target_id = p.target.clone();
    let broadcaster = state.broadcaster.clone();
    let queue_handle = Arc::clone(&state);
    let method = p.command;
    tokio::spawn(async move {
        let outcome = transport.call(&session, &method, serde_json::json!({}), timeout).await;
        let mut result = serde_json::Map::new();
        match outcome {
            Ok(value) => {
                result.insert("output".to_owned(), value);
            }
            Err(e) => {
                result.insert("error".to_owned(), Value::String(e.to_string()));
            }
        }
        let resolved = queue_handle.queue.lock().resolve(&action_id, result);
        if let Some(t) = queue_handle.targets.lock().get_mut(&target_id) {
            if t.action_id.as_deref() == Some(action_id.as_str()) {
                t.action_id = None;
            }
        }
        if let Some(resolved) = resolved {
            broadcaster.publish(Event::new(
                "action_resolved",
                serde_json::json!({"action_id": action_id, "target_id": target_id, "result": resolved.result}),
            ));
        }
    });

    Ok(serde_json::json!({"status": "watching", "action_id": action.id}))
}

#[derive(Deserialize)]
struct ResolveParams {
    action_id: String,
    #[serde(default)]
    result: serde_json::Map<String, Value>,
}

async fn resolve(state: Arc<AppState>, params: Value) -> Result<Value, RpcError> {
    let p: ResolveParams = parse_params(params)?;

    if let Some(existing) = state.queue.lock().get(&p.action_id) {
        if existing.state.is_terminal() {
            return Ok(serde_json::json!({
                "ok": true,
                "status": existing.state.as_status_str(),
                "result": existing.result,
            }));
        }
    }

    let resolved = {
        let mut queue = state.queue.lock();
        if queue.get_pending_mut(&p.action_id).is_none() {
            return Err(RpcError::invalid_params(format!("unknown action id: {}", p.action_id)));
        }
        queue.resolve(&p.action_id, p.result.clone())
    };
    let Some(resolved) = resolved else {
        return Err(RpcError::internal("action vanished mid-resolve"));
    };
    if let Some(t) = state.targets.lock().get_mut(&resolved.target_id) {
        if t.action_id.as_deref() == Some(p.action_id.as_str()) {
            t.action_id = None;
        }
    }
    state.broadcaster.publish(Event::new(
        "action_resolved",
        serde_json::json!({"action_id": p.action_id, "target_id": resolved.target_id, "result": resolved.result}),
    ));
    Ok(serde_json::json!({"ok": true, "status": "completed", "result": resolved.result}))
}

#[derive(Deserialize)]
struct GetStatusParams {
    action_id: String,
}

async fn get_status(state: Arc<AppState>, params: Value) -> Result<Value, RpcError> {
    let p: GetStatusParams = parse_params(params)?;
    let queue = state.queue.lock();
    match queue.get(&p.action_id) {
        Some(action) => Ok(serde_json::json!({
            "status": action.state.as_status_str(),
            "result": action.result,
        })),
        None => Ok(serde_json::json!({"status": "not_found"})),
    }
}

/// Browser analog of the terminal's interrupt keystroke: stop any
/// in-flight navigation and cancel the target's pending action.
async fn interrupt(state: Arc<AppState>, params: Value) -> Result<Value, RpcError> {
    let p: TargetParams = parse_params(params)?;
    let session = session_for(&state, &p.target)?;
    let transport = require_transport(&state)?;
    let timeout = Duration::from_secs(state.config.call_timeout_secs);

    let _ = transport.call(&session, "Page.stopLoading", serde_json::json!({}), timeout).await;

    let action_id = state.targets.lock().get(&p.target).and_then(|t| t.action_id.clone());
    if let Some(id) = &action_id {
        state.queue.lock().cancel(id);
        state.broadcaster.publish(Event::new(
            "action_cancelled",
            serde_json::json!({"action_id": id, "target_id": p.target}),
        ));
    }
    Ok(serde_json::json!({"cancelled": action_id.is_some()}))
}

#[derive(Deserialize)]
struct SelectParams {
    command: String,
}

/// `select_pane`/`select_panes`: when exactly one target is currently
/// attached, auto-resolve against it like `execute`; otherwise park a
/// `SELECTING_PANE` action for a human to `resolve` once they've picked.
async fn select(state: Arc<AppState>, params: Value) -> Result<Value, RpcError> {
    let p: SelectParams = parse_params(params)?;
    let only_target = {
        let targets = state.targets.lock();
        let mut ids = targets.ids();
        match (ids.next(), ids.next()) {
            (Some(id), None) => Some(id.clone()),
            _ => None,
        }
    };

    if let Some(target) = only_target {
        return execute(
            state,
            serde_json::to_value(ExecuteParams { target, command: p.command, client_pane: None })
                .map_err(|e| RpcError::internal(e.to_string()))?,
        )
        .await;
    }

    let action = Action::new("", p.command, ActionState::SelectingPane);
    let action = state.queue.lock().add(action);
    state.broadcaster.publish(Event::new(
        "action_added",
        serde_json::json!({"action_id": action.id, "target_id": "", "state": "SELECTING_PANE"}),
    ));
    Ok(serde_json::json!({"status": "selecting_pane", "action_id": action.id}))
}

/// Remove targets stuck in `DISCONNECTING`/`SUSPENDED` (the browser
/// analog of the terminal's dead-pane reaping against the live tmux list —
/// here there is no live external list to diff against beyond what the
/// lifecycle manager has already told us, so this sweeps state this
/// daemon itself marked terminal).
async fn cleanup(state: Arc<AppState>) -> Result<Value, RpcError> {
    use crate::target::ConnectionState;

    let dead_ids: Vec<String> = {
        let targets = state.targets.lock();
        targets
            .ids()
            .filter(|id| {
                matches!(
                    targets.get(id).map(|t| t.state),
                    Some(ConnectionState::Disconnecting) | Some(ConnectionState::Suspended)
                )
            })
            .cloned()
            .collect()
    };

    let mut removed = Vec::new();
    for id in dead_ids {
        if state.targets.lock().remove(&id).is_some() {
            let _ = state.eventlog.clear_target(&id);
            removed.push(id);
        }
    }
    Ok(serde_json::json!({"removed": removed}))
}

#[derive(Deserialize)]
struct DebugEvalParams {
    code: String,
}

async fn debug_eval(state: Arc<AppState>, params: Value) -> Result<Value, RpcError> {
    let p: DebugEvalParams = parse_params(params)?;
    let Some(view) = DebugView::parse(p.code.trim()) else {
        return Err(RpcError::invalid_params(format!(
            "unknown debug view: {} (expected one of queue, targets, health)",
            p.code
        )));
    };
    let value = match view {
        DebugView::Queue => state.queue.lock().snapshot(),
        DebugView::Targets => crate::events::targets_snapshot(&state.targets.lock()),
        DebugView::Health => {
            let uptime = state.started_at.elapsed().as_secs_f64();
            let target_count = state.targets.lock().len();
            let alive = state.transport().map(|t| t.is_alive()).unwrap_or(false);
            crate::events::health_snapshot(uptime, target_count, alive)
        }
    };
    Ok(value)
}

#[derive(Deserialize)]
struct CdpParams {
    target: String,
    method: String,
    #[serde(default)]
    params: Value,
}

async fn cdp(state: Arc<AppState>, params: Value) -> Result<Value, RpcError> {
    let p: CdpParams = parse_params(params)?;
    let session = session_for(&state, &p.target)?;
    let transport = require_transport(&state)?;
    let timeout = Duration::from_secs(state.config.call_timeout_secs);
    transport.call(&session, &p.method, p.params, timeout).await
}

#[derive(Deserialize)]
struct NavigateParams {
    target: String,
    url: String,
}

async fn navigate(state: Arc<AppState>, params: Value) -> Result<Value, RpcError> {
    let p: NavigateParams = parse_params(params)?;
    let session = session_for(&state, &p.target)?;
    let transport = require_transport(&state)?;
    let timeout = Duration::from_secs(state.config.call_timeout_secs);

    let action = {
        let mut queue = state.queue.lock();
        queue.add(Action::new(p.target.clone(), format!("navigate {}", p.url), ActionState::Watching))
    };
    if let Some(t) = state.targets.lock().get_mut(&p.target) {
        t.action_id = Some(action.id.clone());
    }

    transport.call(&session, "Page.navigate", serde_json::json!({"url": p.url}), timeout).await?;

    state.broadcaster.publish(Event::new(
        "action_watching",
        serde_json::json!({"action_id": action.id, "target_id": p.target}),
    ));
    Ok(serde_json::json!({"action_id": action.id, "status": "watching"}))
}

#[derive(Deserialize)]
struct JsParams {
    target: String,
    expression: String,
}

async fn js(state: Arc<AppState>, params: Value) -> Result<Value, RpcError> {
    let p: JsParams = parse_params(params)?;
    let session = session_for(&state, &p.target)?;
    let transport = require_transport(&state)?;
    let timeout = Duration::from_secs(state.config.call_timeout_secs);
    let result = transport
        .call(
            &session,
            "Runtime.evaluate",
            serde_json::json!({"expression": p.expression, "returnByValue": true}),
            timeout,
        )
        .await?;
    Ok(result["result"]["value"].clone())
}

#[derive(Deserialize)]
struct FetchParams {
    target: String,
    url: String,
}

async fn fetch(state: Arc<AppState>, params: Value) -> Result<Value, RpcError> {
    let p: FetchParams = parse_params(params)?;
    let session = session_for(&state, &p.target)?;
    let transport = require_transport(&state)?;
    let timeout = Duration::from_secs(state.config.call_timeout_secs);
    let expression = format!("fetch({:?}).then(r => r.text())", p.url);
    let result = transport
        .call(
            &session,
            "Runtime.evaluate",
            serde_json::json!({"expression": expression, "awaitPromise": true, "returnByValue": true}),
            timeout,
        )
        .await?;
    Ok(result["result"]["value"].clone())
}
