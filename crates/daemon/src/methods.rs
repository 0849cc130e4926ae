// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! RPC method handlers registered against the shared [`paneloop_core::rpc::Dispatcher`].

use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use paneloop_core::action::{Action, ActionState};
use paneloop_core::broadcaster::Event;
use paneloop_core::dsl::compile_dsl;
use paneloop_core::error::RpcError;
use paneloop_core::pattern_store::PatternState;
use paneloop_core::rpc::Dispatcher;

use crate::events::DebugView;
use crate::server::AppState;

fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    serde_json::from_value(params).map_err(|e| RpcError::invalid_params(e.to_string()))
}

fn resolve_target(state: &AppState, target: &str) -> Result<String, RpcError> {
    let panes = state.panes.lock();
    panes.tmux().resolve_pane_id(target).ok_or_else(|| RpcError::target_gone(target))
}

fn now_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

pub fn build_dispatcher() -> Dispatcher<Arc<AppState>> {
    let mut d = Dispatcher::new();
    d.register("ping", |_state, _params| async { Ok(serde_json::json!({"pong": true})) });
    d.register("execute", |state, params| async move { execute(state, params).await });
    d.register("send", |state, params| async move { execute(state, params).await });
    d.register("resolve", |state, params| async move { resolve(state, params).await });
    d.register("get_queue", |state, _params| async move { get_queue(state).await });
    d.register("get_status", |state, params| async move { get_status(state, params).await });
    d.register("learn_pattern", |state, params| async move { learn_pattern(state, params).await });
    d.register("remove_pattern", |state, params| async move { remove_pattern(state, params).await });
    d.register("get_patterns", |state, params| async move { get_patterns(state, params).await });
    d.register("interrupt", |state, params| async move { interrupt(state, params).await });
    d.register("ls", |state, _params| async move { ls(state).await });
    d.register("select_pane", |state, params| async move { select(state, params, false).await });
    d.register("select_panes", |state, params| async move { select(state, params, true).await });
    d.register("cleanup", |state, _params| async move { cleanup(state).await });
    d.register("debug_eval", |state, params| async move { debug_eval(state, params).await });
    d.register("check_ready", |state, params| async move { check_ready(state, params).await });
    d.register("get_pane_data", |state, params| async move { get_pane_data(state, params).await });
    d
}

#[derive(Deserialize)]
struct ExecuteParams {
    target: String,
    command: String,
    /// Accepted for wire compatibility; nothing in the terminal daemon
    /// currently distinguishes callers by their own pane.
    #[serde(default)]
    #[allow(dead_code)]
    client_pane: Option<String>,
}

/// Core of `execute`/`send`: resolve the target to a canonical pane id and
/// either fire immediately (target ready), park as a `READY_CHECK` (target
/// state unknown), or report busy.
async fn execute(state: Arc<AppState>, params: Value) -> Result<Value, RpcError> {
    let p: ExecuteParams = parse_params(params)?;
    let pane_id = resolve_target(&state, &p.target)?;
    execute_on_pane(&state, &pane_id, &p.command)
}

fn execute_on_pane(state: &AppState, pane_id: &str, command: &str) -> Result<Value, RpcError> {
    let mut queue = state.queue.lock();
    let mut panes = state.panes.lock();
    let patterns = state.patterns.read();

    if let Some(existing_id) = panes.get(pane_id).and_then(|pn| pn.action_id.clone()) {
        if let Some(existing) = queue.get(&existing_id) {
            if !existing.state.is_terminal() {
                return Ok(serde_json::json!({"status": "busy"}));
            }
        }
    }

    let match_state = panes.check_patterns(pane_id, &patterns);
    match match_state {
        Some(PatternState::Busy) => Ok(serde_json::json!({"status": "busy"})),
        Some(PatternState::Ready) => {
            let action = queue.add(Action::new(pane_id, command, ActionState::Watching));
            if let Some(pane) = panes.get_mut(pane_id) {
                pane.screen.clear();
                pane.action_id = Some(action.id.clone());
                pane.bytes_since_watching = 0;
            }
            let send = panes.tmux().send_keys(pane_id, command, true);
            drop(patterns);
            drop(panes);
            drop(queue);
            if let Err(e) = send {
                return Ok(serde_json::json!({"status": "error", "error": e.to_string()}));
            }
            state.broadcaster.publish(Event::new(
                "action_added",
                serde_json::json!({"action_id": action.id, "target_id": pane_id, "state": "WATCHING"}),
            ));
            Ok(serde_json::json!({"status": "watching", "action_id": action.id}))
        }
        None => {
            let action = queue.add(Action::new(pane_id, command, ActionState::ReadyCheck));
            if let Some(pane) = panes.get_mut(pane_id) {
                pane.action_id = Some(action.id.clone());
            }
            drop(patterns);
            drop(panes);
            drop(queue);
            state.broadcaster.publish(Event::new(
                "action_added",
                serde_json::json!({"action_id": action.id, "target_id": pane_id, "state": "READY_CHECK"}),
            ));
            Ok(serde_json::json!({"status": "ready_check", "action_id": action.id}))
        }
    }
}

#[derive(Deserialize)]
struct ResolveParams {
    action_id: String,
    #[serde(default)]
    result: serde_json::Map<String, Value>,
}

/// Human-driven counterpart to the auto-resolver: lets a caller manually
/// advance a `READY_CHECK` action (same transition as
/// [`crate::server::apply_feed_outcome`]'s `SignalReady` branch) or force a
/// `WATCHING` action straight to `COMPLETED` with a supplied result.
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

    let (current_state, pane_id, command) = {
        let mut queue = state.queue.lock();
        let Some(action) = queue.get_pending_mut(&p.action_id) else {
            return Err(RpcError::invalid_params(format!("unknown action id: {}", p.action_id)));
        };
        (action.state, action.target_id.clone(), action.command.clone())
    };

    match current_state {
        ActionState::ReadyCheck => {
            {
                let mut queue = state.queue.lock();
                if let Some(a) = queue.get_pending_mut(&p.action_id) {
                    a.state = ActionState::Watching;
                }
            }
            let mut panes = state.panes.lock();
            if let Some(pane) = panes.get_mut(&pane_id) {
                pane.screen.clear();
                pane.bytes_since_watching = 0;
            }
            let send = panes.tmux().send_keys(&pane_id, &command, true);
            drop(panes);
            if let Err(e) = send {
                return Err(RpcError::internal(e.to_string()));
            }
            state.broadcaster.publish(Event::new(
                "action_watching",
                serde_json::json!({"action_id": p.action_id, "target_id": pane_id}),
            ));
            Ok(serde_json::json!({"ok": true, "status": "watching"}))
        }
        ActionState::Watching | ActionState::SelectingPane => {
            let resolved = {
                let mut queue = state.queue.lock();
                queue.resolve(&p.action_id, p.result.clone())
            };
            let Some(resolved) = resolved else {
                return Err(RpcError::internal("action vanished mid-resolve"));
            };
            if let Some(pane) = state.panes.lock().get_mut(&resolved.target_id) {
                if pane.action_id.as_deref() == Some(p.action_id.as_str()) {
                    pane.action_id = None;
                }
            }
            state.broadcaster.publish(Event::new(
                "action_resolved",
                serde_json::json!({"action_id": p.action_id, "target_id": resolved.target_id, "result": resolved.result}),
            ));
            Ok(serde_json::json!({"ok": true, "status": "completed", "result": resolved.result}))
        }
        ActionState::Completed | ActionState::Cancelled => unreachable!("terminal actions handled above"),
    }
}

async fn get_queue(state: Arc<AppState>) -> Result<Value, RpcError> {
    Ok(state.queue.lock().snapshot())
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

#[derive(Deserialize)]
struct PatternParams {
    process: String,
    pattern: String,
    state: String,
}

fn validate_pattern_dsl(pattern: &str) -> Result<(), RpcError> {
    for line in pattern.trim_matches('\n').split('\n') {
        compile_dsl(line).map_err(|e| RpcError::invalid_params(format!("invalid pattern: {e}")))?;
    }
    Ok(())
}

async fn learn_pattern(state: Arc<AppState>, params: Value) -> Result<Value, RpcError> {
    let p: PatternParams = parse_params(params)?;
    let pattern_state: PatternState =
        p.state.parse().map_err(|_| RpcError::invalid_params(format!("unknown pattern state: {}", p.state)))?;
    validate_pattern_dsl(&p.pattern)?;
    state
        .patterns
        .write()
        .add(&p.process, &p.pattern, pattern_state)
        .map_err(|e| RpcError::internal(e.to_string()))?;
    Ok(serde_json::json!({"ok": true}))
}

async fn remove_pattern(state: Arc<AppState>, params: Value) -> Result<Value, RpcError> {
    let p: PatternParams = parse_params(params)?;
    let pattern_state: PatternState =
        p.state.parse().map_err(|_| RpcError::invalid_params(format!("unknown pattern state: {}", p.state)))?;
    state
        .patterns
        .write()
        .remove(&p.process, &p.pattern, pattern_state)
        .map_err(|e| RpcError::internal(e.to_string()))?;
    Ok(serde_json::json!({"ok": true}))
}

#[derive(Deserialize)]
struct GetPatternsParams {
    process: Option<String>,
}

async fn get_patterns(state: Arc<AppState>, params: Value) -> Result<Value, RpcError> {
    let p: GetPatternsParams = parse_params(params)?;
    let patterns = state.patterns.read();
    let value = match p.process {
        Some(process) => serde_json::to_value(patterns.get(&process)).unwrap_or(Value::Null),
        None => serde_json::to_value(patterns.all()).unwrap_or(Value::Null),
    };
    Ok(value)
}

#[derive(Deserialize)]
struct TargetParams {
    target: String,
}

async fn interrupt(state: Arc<AppState>, params: Value) -> Result<Value, RpcError> {
    let p: TargetParams = parse_params(params)?;
    let pane_id = resolve_target(&state, &p.target)?;
    state.panes.lock().tmux().interrupt(&pane_id).map_err(|e| RpcError::internal(e.to_string()))?;
    Ok(serde_json::json!({"ok": true}))
}

async fn ls(state: Arc<AppState>) -> Result<Value, RpcError> {
    let panes = state.panes.lock().tmux().list_panes().map_err(|e| RpcError::internal(e.to_string()))?;
    Ok(serde_json::to_value(panes).unwrap_or(Value::Null))
}

#[derive(Deserialize)]
struct SelectParams {
    command: String,
}

async fn select(state: Arc<AppState>, params: Value, multi_select: bool) -> Result<Value, RpcError> {
    let p: SelectParams = parse_params(params)?;
    let panes_list = state.panes.lock().tmux().list_panes().map_err(|e| RpcError::internal(e.to_string()))?;

    if panes_list.len() == 1 {
        return execute_on_pane(&state, &panes_list[0].pane_id, &p.command);
    }

    let mut action = Action::new("", p.command, ActionState::SelectingPane);
    action.multi_select = multi_select;
    let action = state.queue.lock().add(action);
    state.broadcaster.publish(Event::new(
        "action_added",
        serde_json::json!({"action_id": action.id, "target_id": "", "state": "SELECTING_PANE"}),
    ));
    Ok(serde_json::json!({"status": "selecting_pane", "action_id": action.id}))
}

async fn cleanup(state: Arc<AppState>) -> Result<Value, RpcError> {
    let removed = state.panes.lock().cleanup_dead();
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
            "unknown debug view: {} (expected one of queue, panes, patterns, health)",
            p.code
        )));
    };
    let now = now_secs();
    let value = match view {
        DebugView::Queue => crate::events::queue_snapshot(now, &state.queue.lock()),
        DebugView::Panes => {
            let queue = state.queue.lock();
            let panes = state.panes.lock();
            crate::events::panes_snapshot(now, &panes, &queue)
        }
        DebugView::Patterns => crate::events::patterns_snapshot(&state.patterns.read()),
        DebugView::Health => serde_json::json!({
            "uptime_seconds": state.started_at.elapsed().as_secs_f64(),
            "pane_count": state.panes.lock().len(),
            "subscriber_count": state.broadcaster.subscriber_count(),
        }),
    };
    Ok(value)
}

async fn check_ready(state: Arc<AppState>, params: Value) -> Result<Value, RpcError> {
    let p: TargetParams = parse_params(params)?;
    let pane_id = resolve_target(&state, &p.target)?;
    let mut panes = state.panes.lock();
    let patterns = state.patterns.read();
    let status = match panes.check_patterns(&pane_id, &patterns) {
        Some(PatternState::Ready) => "ready",
        Some(PatternState::Busy) => "busy",
        None => "unknown",
    };
    Ok(serde_json::json!({"status": status}))
}

#[derive(Deserialize)]
struct GetPaneDataParams {
    target: String,
    #[serde(default)]
    lines: Option<usize>,
}

async fn get_pane_data(state: Arc<AppState>, params: Value) -> Result<Value, RpcError> {
    let p: GetPaneDataParams = parse_params(params)?;
    let pane_id = resolve_target(&state, &p.target)?;
    let n = p.lines.unwrap_or(50);
    let mut panes = state.panes.lock();
    let pane = panes.get_or_create(&pane_id);
    Ok(serde_json::json!({
        "content": pane.screen.last_n_lines(n),
        "process": pane.process,
    }))
}
