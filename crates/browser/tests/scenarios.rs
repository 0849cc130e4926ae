// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! End-to-end scenario tests driven against in-process state with no live
//! Chrome DevTools Protocol connection, mirroring `paneloop-daemon`'s own
//! `tests/scenarios.rs` but scoped to the RPC paths that are deterministic
//! and transport-independent: target-registry lookups fail fast with
//! `TARGET_GONE`/`NOT_CONNECTED` before ever touching `require_transport`,
//! so a real CDP WebSocket (genuinely unavailable in this environment) is
//! never needed to exercise them.

use std::sync::Arc;

use paneloop_core::action::ActionQueue;
use paneloop_core::broadcaster::EventBroadcaster;

use paneloop_browser::config::Config;
use paneloop_browser::eventlog::EventLog;
use paneloop_browser::methods::build_dispatcher;
use paneloop_browser::server::AppState;
use paneloop_browser::target::TargetManager;

fn test_state() -> Arc<AppState> {
    Arc::new(AppState::assemble(
        Config::default(),
        ActionQueue::default(),
        TargetManager::new(vec![]),
        Arc::new(EventLog::open_in_memory().expect("open in-memory event log")),
        EventBroadcaster::new(16),
    ))
}

async fn call(
    dispatcher: &paneloop_core::rpc::Dispatcher<Arc<AppState>>,
    state: &Arc<AppState>,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let request = serde_json::json!({"id": 1, "method": method, "params": params});
    let mut line = serde_json::to_vec(&request).expect("serialize request");
    line.push(b'\n');
    let response_line = dispatcher.dispatch_line(Arc::clone(state), &line).await;
    serde_json::from_slice(&response_line).expect("parse response")
}

/// `execute` against a target never registered in the `TargetManager`
/// fails with `TARGET_GONE` before `require_transport` is ever consulted —
/// no live browser connection needed to observe this.
#[tokio::test]
async fn execute_against_unknown_target_is_target_gone() {
    let state = test_state();
    let dispatcher = build_dispatcher();

    let result =
        call(&dispatcher, &state, "execute", serde_json::json!({"target": "9222:abcdef", "command": "Page.enable"}))
            .await;
    assert_eq!(result["error"]["code"], -32002);
}

/// A target that exists but hasn't completed its CDP attach yet (empty
/// `session_id`) fails `execute` with `NOT_CONNECTED`, again without
/// needing `require_transport` to be reached.
#[tokio::test]
async fn execute_against_unattached_target_is_not_connected() {
    let state = test_state();
    let dispatcher = build_dispatcher();

    state.targets.lock().begin_attach("9222:abcdef");

    let result =
        call(&dispatcher, &state, "execute", serde_json::json!({"target": "9222:abcdef", "command": "Page.enable"}))
            .await;
    assert_eq!(result["error"]["code"], -32000);
}

/// `ls` reflects targets seeded directly into the `TargetManager`,
/// including ones mid-attach with no session id yet.
#[tokio::test]
async fn ls_reports_seeded_targets() {
    let state = test_state();
    let dispatcher = build_dispatcher();

    state.targets.lock().begin_attach("9222:abcdef");
    state.targets.lock().begin_attach("9222:123456");

    let result = call(&dispatcher, &state, "ls", serde_json::json!({})).await;
    assert_eq!(result["result"]["count"], 2);
    let ids: Vec<&str> =
        result["result"]["targets"].as_array().expect("targets array").iter().map(|t| t["id"].as_str().unwrap()).collect();
    assert!(ids.contains(&"9222:abcdef"));
    assert!(ids.contains(&"9222:123456"));
}

/// `select_pane` with exactly one known target auto-resolves against it
/// (falling through to the same `execute` path, and the same
/// `TARGET_GONE`/`NOT_CONNECTED` ordering applies since it isn't attached).
#[tokio::test]
async fn select_pane_with_single_target_delegates_to_execute() {
    let state = test_state();
    let dispatcher = build_dispatcher();
    state.targets.lock().begin_attach("9222:abcdef");

    let result = call(&dispatcher, &state, "select_pane", serde_json::json!({"command": "Page.enable"})).await;
    assert_eq!(result["error"]["code"], -32000);
}

/// `select_pane` with zero or multiple known targets instead parks a
/// `SELECTING_PANE` action for a human to `resolve`.
#[tokio::test]
async fn select_pane_with_no_targets_parks_for_resolution() {
    let state = test_state();
    let dispatcher = build_dispatcher();

    let selected = call(&dispatcher, &state, "select_pane", serde_json::json!({"command": "Page.enable"})).await;
    assert_eq!(selected["result"]["status"], "selecting_pane");
    let action_id = selected["result"]["action_id"].as_str().expect("action_id").to_owned();

    let status = call(&dispatcher, &state, "get_status", serde_json::json!({"action_id": action_id})).await;
    assert_eq!(status["result"]["status"], "selecting_pane");

    let resolved = call(
        &dispatcher,
        &state,
        "resolve",
        serde_json::json!({"action_id": action_id, "result": {"chosen": "9222:abcdef"}}),
    )
    .await;
    assert_eq!(resolved["result"]["status"], "completed");
}

/// `cleanup` only removes targets this daemon itself marked
/// `Disconnecting`/`Suspended`; an attaching-or-attached target survives.
#[tokio::test]
async fn cleanup_removes_only_disconnecting_targets() {
    let state = test_state();
    let dispatcher = build_dispatcher();

    state.targets.lock().begin_attach("9222:live");
    state.targets.lock().begin_attach("9222:dead");
    state.targets.lock().begin_disconnect("9222:dead");

    let result = call(&dispatcher, &state, "cleanup", serde_json::json!({})).await;
    let removed: Vec<&str> =
        result["result"]["removed"].as_array().expect("removed array").iter().map(|v| v.as_str().unwrap()).collect();
    assert_eq!(removed, vec!["9222:dead"]);

    let ls = call(&dispatcher, &state, "ls", serde_json::json!({})).await;
    assert_eq!(ls["result"]["count"], 1);
}

/// The terminal tool's pattern-store methods are deliberately absent from
/// the browser's method table (spec.md's component table scopes the
/// Pattern Store to the terminal tool).
#[tokio::test]
async fn pattern_store_methods_are_not_registered() {
    let state = test_state();
    let dispatcher = build_dispatcher();

    for method in ["learn_pattern", "remove_pattern", "get_patterns"] {
        let result = call(&dispatcher, &state, method, serde_json::json!({})).await;
        assert_eq!(result["error"]["code"], -32601, "{method} should be unregistered");
    }
}

/// `get_queue` reflects an action added via `select_pane`'s no-target path
/// without requiring a live connection.
#[tokio::test]
async fn get_queue_reports_pending_actions() {
    let state = test_state();
    let dispatcher = build_dispatcher();

    call(&dispatcher, &state, "select_pane", serde_json::json!({"command": "Page.enable"})).await;

    let queue = call(&dispatcher, &state, "get_queue", serde_json::json!({})).await;
    let pending = queue["result"]["pending"].as_array().expect("pending array");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["state"], "selecting_pane");
}
