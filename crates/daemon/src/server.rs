// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! Daemon server wiring: shared state, socket bind order, and the signal-
//! driven shutdown sequence described in spec §4.12.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use paneloop_core::action::{ActionQueue, ActionState};
use paneloop_core::broadcaster::{Event, EventBroadcaster};
use paneloop_core::lifecycle::DaemonLifecycle;
use paneloop_core::pattern_store::PatternStore;

use crate::autoresolve::FeedOutcome;
use crate::config::Config;
use crate::events::Notice;
use crate::methods;
use crate::target::PaneManager;
use crate::tmux::Tmux;

/// Name this daemon registers under in the PID/socket runtime directory.
pub const TOOL_NAME: &str = "paneloopd";

/// All state shared across RPC, event, and collector connections.
pub struct AppState {
    pub config: Config,
    pub patterns: RwLock<PatternStore>,
    pub queue: Mutex<ActionQueue>,
    pub panes: Mutex<PaneManager>,
    pub broadcaster: EventBroadcaster,
    pub notices: Mutex<Vec<Notice>>,
    pub started_at: std::time::Instant,
}

/// React to a [`FeedOutcome`] returned by [`PaneManager::feed`]: this is the
/// one place that turns the pattern-match pass into tmux keystrokes, a
/// queue transition, and a broadcast — kept out of `target.rs` so the pane
/// manager never needs a back-reference into the daemon.
pub fn apply_feed_outcome(state: &AppState, pane_id: &str, outcome: FeedOutcome) {
    match outcome {
        FeedOutcome::None => {}
        FeedOutcome::SignalReady(action) => {
            let mut queue = state.queue.lock();
            let mut panes = state.panes.lock();

            if let Some(a) = queue.get_pending_mut(&action.id) {
                a.state = ActionState::Watching;
            }
            if let Some(pane) = panes.get_mut(pane_id) {
                pane.screen.clear();
                pane.bytes_since_watching = 0;
            }
            if let Err(e) = panes.tmux().send_keys(pane_id, &action.command, true) {
                error!(pane_id, err = %e, "failed to inject keystrokes after ready-check");
            }
            drop(panes);
            drop(queue);

            state.broadcaster.publish(Event::new(
                "action_watching",
                serde_json::json!({"action_id": action.id, "target_id": pane_id}),
            ));
        }
        FeedOutcome::Completed(action) => {
            state.broadcaster.publish(Event::new(
                "action_resolved",
                serde_json::json!({"action_id": action.id, "target_id": pane_id, "result": action.result}),
            ));
        }
    }
}

fn bind_socket(path: &Path) -> std::io::Result<UnixListener> {
    let _ = std::fs::remove_file(path);
    let listener = UnixListener::bind(path)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(listener)
}

async fn rpc_accept_loop(
    listener: UnixListener,
    dispatcher: Arc<paneloop_core::rpc::Dispatcher<Arc<AppState>>>,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) {
    loop {
        let (stream, _) = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => { warn!(err = %e, "rpc socket accept failed"); continue; }
            },
        };
        let dispatcher = Arc::clone(&dispatcher);
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = handle_rpc_connection(stream, dispatcher, state).await {
                tracing::debug!(err = %e, "rpc connection ended");
            }
        });
    }
}

async fn handle_rpc_connection(
    stream: UnixStream,
    dispatcher: Arc<paneloop_core::rpc::Dispatcher<Arc<AppState>>>,
    state: Arc<AppState>,
) -> std::io::Result<()> {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let mut first_request = true;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let mut response = dispatcher.dispatch_line(Arc::clone(&state), line.as_bytes()).await;
        if first_request {
            first_request = false;
            let notices = std::mem::take(&mut *state.notices.lock());
            if !notices.is_empty() {
                response = attach_notices(response, &notices);
            }
        }
        write_half.write_all(&response).await?;
    }
    Ok(())
}

/// Splice a `notices` field into an already-serialized response line.
/// Notices are purely additive (spec §3) and cleared as soon as a new
/// connection's first request picks them up, so this only ever fires once
/// per connection.
fn attach_notices(line: Vec<u8>, notices: &[Notice]) -> Vec<u8> {
    let body = line.strip_suffix(b"\n").unwrap_or(&line);
    let Ok(serde_json::Value::Object(mut map)) = serde_json::from_slice(body) else {
        return line;
    };
    map.insert("notices".to_owned(), serde_json::to_value(notices).unwrap_or_default());
    let mut out = serde_json::to_vec(&map).unwrap_or(line);
    out.push(b'\n');
    out
}

async fn events_accept_loop(listener: UnixListener, state: Arc<AppState>, shutdown: CancellationToken) {
    loop {
        let (stream, _) = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => { warn!(err = %e, "events socket accept failed"); continue; }
            },
        };
        let state = Arc::clone(&state);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = handle_event_connection(stream, state, shutdown).await;
        });
    }
}

async fn handle_event_connection(
    stream: UnixStream,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let (mut read_half, mut write_half) = stream.into_split();
    let mut sub = state.broadcaster.subscribe();

    // Subscribers never send anything meaningful; a read returning zero (or
    // any error) is our signal that they hung up. Racing that against
    // `sub.recv()` is how we notice disconnects without a second task.
    let mut discard = [0u8; 64];
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(()),
            n = tokio::io::AsyncReadExt::read(&mut read_half, &mut discard) => {
                if n.unwrap_or(0) == 0 {
                    return Ok(());
                }
            }
            event = sub.recv() => {
                let Some(event) = event else { return Ok(()) };
                let mut line = serde_json::to_vec(&event.to_wire()).unwrap_or_default();
                line.push(b'\n');
                write_half.write_all(&line).await?;
            }
        }
    }
}

async fn snapshot_loop(state: Arc<AppState>, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        let (queue_view, panes_view, patterns_view) = {
            let queue = state.queue.lock();
            let panes = state.panes.lock();
            let patterns = state.patterns.read();
            (
                crate::events::queue_snapshot(now, &queue),
                crate::events::panes_snapshot(now, &panes, &queue),
                crate::events::patterns_snapshot(&patterns),
            )
        };
        state.broadcaster.publish(Event::new(
            "snapshot",
            serde_json::json!({"queue": queue_view, "panes": panes_view, "patterns": patterns_view}),
        ));
    }
}

async fn wait_for_shutdown_signal(shutdown: CancellationToken) {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

    tokio::select! {
        _ = async { match &mut sigterm { Some(s) => s.recv().await, None => std::future::pending().await } } => {
            info!("received SIGTERM");
        }
        _ = async { match &mut sigint { Some(s) => s.recv().await, None => std::future::pending().await } } => {
            info!("received SIGINT");
        }
    }
    shutdown.cancel();
}

/// Bring up the daemon: claim the PID file, bind sockets, and run until a
/// shutdown signal arrives. Returns once shutdown is complete and sockets
/// are removed. If `ready` is given, it fires once sockets are bound and
/// accepting — `main.rs` uses this to print `started` without waiting for
/// the whole (long) server lifetime, since this crate never forks (the
/// workspace forbids `unsafe_code`, which double-fork daemonizing needs).
pub async fn run(config: Config, ready: Option<tokio::sync::oneshot::Sender<()>>) -> anyhow::Result<()> {
    let lifecycle = DaemonLifecycle::claim(TOOL_NAME)
        .map_err(|e| anyhow::anyhow!("failed to claim daemon lifecycle: {e}"))?;

    let tmux = Tmux::new(&config.tmux_bin);
    let mut startup_notices = Vec::new();
    if !tmux.is_available() {
        warn!("tmux does not appear to be available; pane operations will fail until it is");
        startup_notices.push(Notice::warn(format!(
            "tmux binary '{}' not found or not executable; pane operations will fail",
            config.tmux_bin
        )));
    }

    let patterns = PatternStore::load(config.pattern_store_path());
    let queue = ActionQueue::new(config.pending_cap, config.resolved_cap);
    let panes = PaneManager::new(tmux, config.max_lines);
    let broadcaster = EventBroadcaster::new(config.broadcast_capacity);

    let state = Arc::new(AppState {
        config: config.clone(),
        patterns: RwLock::new(patterns),
        queue: Mutex::new(queue),
        panes: Mutex::new(panes),
        broadcaster,
        notices: Mutex::new(startup_notices),
        started_at: std::time::Instant::now(),
    });

    let socket_dir = config.socket_dir();
    std::fs::create_dir_all(&socket_dir)?;
    #[cfg(unix)]
    std::fs::set_permissions(&socket_dir, std::fs::Permissions::from_mode(0o700))?;

    let rpc_path: PathBuf = socket_dir.join("rpc.sock");
    let events_path: PathBuf = socket_dir.join("events.sock");
    let collector_path: PathBuf = socket_dir.join("collector.sock");

    let rpc_listener = bind_socket(&rpc_path)?;
    let events_listener = bind_socket(&events_path)?;
    let collector_listener = bind_socket(&collector_path)?;

    let dispatcher = Arc::new(methods::build_dispatcher());
    let shutdown = CancellationToken::new();

    info!(dir = %socket_dir.display(), "paneloopd listening");
    if let Some(ready) = ready {
        let _ = ready.send(());
    }

    let mut tasks = tokio::task::JoinSet::new();
    tasks.spawn(rpc_accept_loop(rpc_listener, Arc::clone(&dispatcher), Arc::clone(&state), shutdown.clone()));
    tasks.spawn(events_accept_loop(events_listener, Arc::clone(&state), shutdown.clone()));
    tasks.spawn(crate::collector::run(collector_listener, Arc::clone(&state), shutdown.clone()));
    tasks.spawn(snapshot_loop(Arc::clone(&state), Duration::from_secs(5), shutdown.clone()));
    tasks.spawn(wait_for_shutdown_signal(shutdown.clone()));

    shutdown.cancelled().await;
    // Give in-flight connection tasks a moment to notice cancellation and
    // drain before we rip the sockets out from under them.
    tokio::time::sleep(Duration::from_millis(50)).await;
    tasks.abort_all();
    while tasks.join_next().await.is_some() {}

    let _ = std::fs::remove_file(&rpc_path);
    let _ = std::fs::remove_file(&events_path);
    let _ = std::fs::remove_file(&collector_path);
    lifecycle.release();
    info!("paneloopd shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use paneloop_core::rpc::Dispatcher;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState {
            config: Config::default(),
            patterns: RwLock::new(PatternStore::load("/nonexistent")),
            queue: Mutex::new(ActionQueue::default()),
            panes: Mutex::new(PaneManager::new(Tmux::new("tmux-not-actually-invoked"), 100)),
            broadcaster: EventBroadcaster::new(16),
            notices: Mutex::new(Vec::new()),
            started_at: std::time::Instant::now(),
        })
    }

    /// Scenario E (shutdown): cancelling the token stops the RPC accept
    /// loop promptly and a request racing the shutdown fails rather than
    /// hanging, without exercising the OS-signal wiring itself (driving a
    /// real SIGTERM in a shared test binary would affect every other test
    /// running in the same process).
    #[tokio::test]
    async fn rpc_accept_loop_returns_once_shutdown_is_cancelled() {
        let tmpdir = tempfile::tempdir().expect("tmpdir");
        let socket_path = tmpdir.path().join("rpc.sock");
        let listener = bind_socket(&socket_path).expect("bind rpc socket");
        let state = test_state();
        let dispatcher = Arc::new(Dispatcher::new());
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(rpc_accept_loop(listener, dispatcher, state, shutdown.clone()));
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle).await.expect("accept loop exited").expect("no panic");
    }
}
