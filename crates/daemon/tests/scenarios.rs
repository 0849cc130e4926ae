// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! End-to-end scenario tests driven against a real `tmux` server, mirroring
//! the host repository's preference for exercising a real external process
//! (there a spawned PTY child) over mocking it.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

use paneloop_core::action::ActionQueue;
use paneloop_core::broadcaster::EventBroadcaster;
use paneloop_core::pattern_store::PatternStore;

use paneloop_daemon::config::Config;
use paneloop_daemon::methods::build_dispatcher;
use paneloop_daemon::server::AppState;
use paneloop_daemon::target::PaneManager;
use paneloop_daemon::tmux::Tmux;

/// A detached tmux session created for one test, killed on drop regardless
/// of how the test exits.
struct Session {
    name: String,
    pane_id: String,
}

impl Session {
    fn spawn(name: &str) -> Self {
        let status = std::process::Command::new("tmux")
            .args(["new-session", "-d", "-s", name, "-x", "80", "-y", "24", "cat"])
            .status()
            .expect("spawn tmux new-session");
        assert!(status.success(), "tmux new-session failed");

        let out = std::process::Command::new("tmux")
            .args(["list-panes", "-t", name, "-F", "#{pane_id}"])
            .output()
            .expect("tmux list-panes");
        let pane_id = String::from_utf8_lossy(&out.stdout).lines().next().expect("pane id").to_owned();

        Self { name: name.to_owned(), pane_id }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = std::process::Command::new("tmux").args(["kill-session", "-t", &self.name]).status();
    }
}

fn test_state(pattern_path: std::path::PathBuf) -> Arc<AppState> {
    Arc::new(AppState {
        config: Config::default(),
        patterns: RwLock::new(PatternStore::load(pattern_path)),
        queue: Mutex::new(ActionQueue::default()),
        panes: Mutex::new(PaneManager::new(Tmux::new("tmux"), 5000)),
        broadcaster: EventBroadcaster::new(16),
        notices: Mutex::new(Vec::new()),
        started_at: Instant::now(),
    })
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

/// Scenario A — ready-check flow: a fresh pane with no patterns parks the
/// first `execute` as a `READY_CHECK`; feeding a byte stream that matches a
/// learned ready pattern advances it to `WATCHING` and injects keystrokes;
/// `resolve` (standing in for the auto-resolver's own completion path)
/// brings it to `COMPLETED`.
#[tokio::test]
async fn scenario_a_ready_check_to_completion() {
    let tmpdir = tempfile::tempdir().expect("tmpdir");
    let state = test_state(tmpdir.path().join("patterns.toml"));
    let dispatcher = build_dispatcher();
    let session = Session::spawn("paneloop-test-scenario-a");

    let learn = call(
        &dispatcher,
        &state,
        "learn_pattern",
        serde_json::json!({"process": "cat", "pattern": "[$ ]$", "state": "ready"}),
    )
    .await;
    assert_eq!(learn["result"]["ok"], true);

    let executed =
        call(&dispatcher, &state, "execute", serde_json::json!({"target": session.pane_id, "command": "ls"}))
            .await;
    assert_eq!(executed["result"]["status"], "ready_check");
    let action_id = executed["result"]["action_id"].as_str().expect("action_id").to_owned();

    {
        let mut panes = state.panes.lock();
        let mut queue = state.queue.lock();
        let patterns = state.patterns.read();
        let outcome = panes.feed(&session.pane_id, b"user@host $ ", &patterns, &mut queue);
        drop(patterns);
        drop(queue);
        drop(panes);
        paneloop_daemon::server::apply_feed_outcome(&state, &session.pane_id, outcome);
    }

    let status = call(&dispatcher, &state, "get_status", serde_json::json!({"action_id": action_id})).await;
    assert_eq!(status["result"]["status"], "watching");

    let resolved = call(
        &dispatcher,
        &state,
        "resolve",
        serde_json::json!({"action_id": action_id, "result": {"output": "total 0\n"}}),
    )
    .await;
    assert_eq!(resolved["result"]["status"], "completed");

    let status = call(&dispatcher, &state, "get_status", serde_json::json!({"action_id": action_id})).await;
    assert_eq!(status["result"]["status"], "completed");
    assert_eq!(status["result"]["result"]["output"], "total 0\n");
}

/// Scenario D — concurrent clients: a second `execute` against a target
/// with a non-terminal action in flight must not create a second one.
#[tokio::test]
async fn scenario_d_second_execute_on_busy_target_is_rejected() {
    let tmpdir = tempfile::tempdir().expect("tmpdir");
    let state = test_state(tmpdir.path().join("patterns.toml"));
    let dispatcher = build_dispatcher();
    let session = Session::spawn("paneloop-test-scenario-d");

    let first =
        call(&dispatcher, &state, "execute", serde_json::json!({"target": session.pane_id, "command": "ls"}))
            .await;
    assert_eq!(first["result"]["status"], "ready_check");

    let second =
        call(&dispatcher, &state, "execute", serde_json::json!({"target": session.pane_id, "command": "pwd"}))
            .await;
    assert_eq!(second["result"]["status"], "busy");
}

/// Scenario F — pattern DSL compilation error: an unterminated character
/// class is rejected with `INVALID_PARAMS` and the store is left
/// unchanged.
#[tokio::test]
async fn scenario_f_invalid_pattern_dsl_is_rejected() {
    let tmpdir = tempfile::tempdir().expect("tmpdir");
    let state = test_state(tmpdir.path().join("patterns.toml"));
    let dispatcher = build_dispatcher();

    let rejected = call(
        &dispatcher,
        &state,
        "learn_pattern",
        serde_json::json!({"process": "x", "pattern": "[unterminated", "state": "ready"}),
    )
    .await;
    assert_eq!(rejected["error"]["code"], -32602);

    let patterns = call(&dispatcher, &state, "get_patterns", serde_json::json!({"process": "x"})).await;
    assert_eq!(patterns["result"], serde_json::json!({}));
}

/// `cleanup` removes a pane whose tmux target no longer exists.
#[tokio::test]
async fn cleanup_sweeps_a_dead_pane() {
    let tmpdir = tempfile::tempdir().expect("tmpdir");
    let state = test_state(tmpdir.path().join("patterns.toml"));
    let dispatcher = build_dispatcher();
    let session = Session::spawn("paneloop-test-scenario-cleanup");
    let pane_id = session.pane_id.clone();

    {
        let mut panes = state.panes.lock();
        panes.get_or_create(&pane_id);
    }
    drop(session);

    let result = call(&dispatcher, &state, "cleanup", serde_json::json!({})).await;
    let removed = result["result"]["removed"].as_array().expect("removed array");
    assert!(removed.iter().any(|v| v.as_str() == Some(pane_id.as_str())));
}
