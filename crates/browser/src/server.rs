// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! Browser daemon server wiring: shared state, socket bind order, the CDP
//! ingestion loop, and the signal-driven shutdown sequence (spec §4.12).
//! No collector socket here — that accept loop is terminal-only (spec
//! §4.6); the browser variant instead drains one persistent WebSocket.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use paneloop_core::action::ActionQueue;
use paneloop_core::broadcaster::{Event, EventBroadcaster};
use paneloop_core::lifecycle::DaemonLifecycle;
use paneloop_core::mux::SessionMux;

use crate::config::Config;
use crate::eventlog::EventLog;
use crate::events::Notice;
use crate::lifecycle_manager::{LifecycleManager, LifecycleOutcome};
use crate::methods;
use crate::target::{ConnectionState, TargetManager};
use crate::transport::{BrowserTransport, InboundFrame};

/// Name this daemon registers under in the PID/socket runtime directory.
pub const TOOL_NAME: &str = "paneloop-browserd";

/// All state shared across RPC and event connections. `queue` and
/// `targets` are each wrapped in their own `Arc` (on top of the already-
/// shared `Arc<AppState>`) so the lifecycle manager's attach worker tasks
/// (spec §4.9's "dedicated worker task per callback invocation") can hold
/// just the lock they need without an `Arc<AppState>` back-reference.
pub struct AppState {
    pub config: Config,
    pub queue: Arc<Mutex<ActionQueue>>,
    pub targets: Arc<Mutex<TargetManager>>,
    pub eventlog: Arc<EventLog>,
    pub broadcaster: EventBroadcaster,
    pub notices: Mutex<Vec<Notice>>,
    pub started_at: std::time::Instant,
    transport: Mutex<Option<Arc<BrowserTransport>>>,
}

impl AppState {
    /// Assemble from already-built components, with no live CDP connection
    /// attached yet. `run()`'s own construction path; also the only way
    /// for other code (including tests) to build one, since `transport`
    /// itself is private.
    pub fn assemble(
        config: Config,
        queue: ActionQueue,
        targets: TargetManager,
        eventlog: Arc<EventLog>,
        broadcaster: EventBroadcaster,
    ) -> Self {
        Self {
            config,
            queue: Arc::new(Mutex::new(queue)),
            targets: Arc::new(Mutex::new(targets)),
            eventlog,
            broadcaster,
            notices: Mutex::new(Vec::new()),
            started_at: std::time::Instant::now(),
            transport: Mutex::new(None),
        }
    }

    pub fn transport(&self) -> Option<Arc<BrowserTransport>> {
        self.transport.lock().clone()
    }

    fn set_transport(&self, transport: Arc<BrowserTransport>) {
        *self.transport.lock() = Some(transport);
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

/// Splice a `notices` field into an already-serialized response line, same
/// mechanism as `paneloop-daemon`'s `server.rs`.
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

/// Drain [`InboundFrame`]s off the transport's reader task, dispatching
/// each to the lifecycle manager and capping the event log per target
/// along the way (spec §4.11's per-target bound).
async fn ingest_loop(
    mut rx: mpsc::UnboundedReceiver<InboundFrame>,
    state: Arc<AppState>,
    lifecycle: Arc<LifecycleManager>,
    transport: Arc<BrowserTransport>,
    shutdown: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return,
            frame = rx.recv() => frame,
        };
        let Some(frame) = frame else {
            // Transport reader task exited (connection lost). Every
            // currently-attached target is unreachable; suspend them all
            // rather than leaving stale `ATTACHED` state around.
            warn!("cdp transport closed; suspending all targets");
            let ids: Vec<String> = state.targets.lock().ids().cloned().collect();
            for id in ids {
                state.targets.lock().suspend(&id);
                state.broadcaster.publish(Event::new("target_suspended", serde_json::json!({"target_id": id})));
            }
            return;
        };

        let ts = state.started_at.elapsed().as_millis() as i64;
        match frame {
            InboundFrame::EndpointEvent(event) => {
                let outcome = lifecycle
                    .handle_endpoint_event(&event, &state.targets, &transport, &state.eventlog, &state.broadcaster, ts)
                    .await;
                if let LifecycleOutcome::TargetAttached(id) = outcome {
                    info!(target_id = id, "target attached");
                }
            }
            InboundFrame::SessionEvent { session_id, payload } => {
                let target_id = state.targets.lock().target_id_for_session(&session_id);
                let Some(target_id) = target_id else { continue };
                let _ = lifecycle.handle_session_event(
                    &target_id,
                    &payload,
                    &state.eventlog,
                    &state.queue,
                    &state.broadcaster,
                    ts,
                );
                if let Ok(count) = state.eventlog.count(&target_id) {
                    if count as usize > state.config.max_events_per_target {
                        let _ = state.eventlog.enforce_cap(&target_id, state.config.max_events_per_target);
                    }
                }
            }
        }
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

/// Bring up the daemon: claim the PID file, connect to the browser's CDP
/// endpoint, bind sockets, and run until a shutdown signal arrives.
pub async fn run(config: Config, ready: Option<tokio::sync::oneshot::Sender<()>>) -> anyhow::Result<()> {
    let lifecycle = DaemonLifecycle::claim(TOOL_NAME)
        .map_err(|e| anyhow::anyhow!("failed to claim daemon lifecycle: {e}"))?;

    let queue = ActionQueue::new(config.pending_cap, config.resolved_cap);
    let targets = TargetManager::new(config.watch_urls.clone());
    let eventlog = Arc::new(EventLog::open_in_memory().map_err(|e| anyhow::anyhow!("event log init failed: {e}"))?);
    let broadcaster = EventBroadcaster::new(config.broadcast_capacity);

    let mut startup_notices = Vec::new();
    let mux = Arc::new(SessionMux::<ConnectionState>::new());
    let connected = BrowserTransport::connect(&config.version_url(), Arc::clone(&mux)).await;
    let (transport, rx) = match connected {
        Ok(pair) => pair,
        Err(e) => {
            warn!(err = %e, "could not connect to browser debugger at startup; will not retry automatically");
            startup_notices.push(Notice::warn(format!(
                "failed to connect to browser debugger at {}: {e}",
                config.version_url()
            )));
            return Err(anyhow::anyhow!("initial CDP connection failed: {e}"));
        }
    };

    let state = Arc::new(AppState::assemble(config.clone(), queue, targets, eventlog, broadcaster));
    *state.notices.lock() = startup_notices;
    state.set_transport(Arc::clone(&transport));

    let socket_dir = config.socket_dir();
    std::fs::create_dir_all(&socket_dir)?;
    #[cfg(unix)]
    std::fs::set_permissions(&socket_dir, std::fs::Permissions::from_mode(0o700))?;

    let rpc_path: PathBuf = socket_dir.join("rpc.sock");
    let events_path: PathBuf = socket_dir.join("events.sock");

    let rpc_listener = bind_socket(&rpc_path)?;
    let events_listener = bind_socket(&events_path)?;

    let dispatcher = Arc::new(methods::build_dispatcher());
    let lifecycle_manager = Arc::new(LifecycleManager::new(config.debug_port));
    let shutdown = CancellationToken::new();

    info!(dir = %socket_dir.display(), "paneloop-browserd listening");
    if let Some(ready) = ready {
        let _ = ready.send(());
    }

    let mut tasks = tokio::task::JoinSet::new();
    tasks.spawn(rpc_accept_loop(rpc_listener, Arc::clone(&dispatcher), Arc::clone(&state), shutdown.clone()));
    tasks.spawn(events_accept_loop(events_listener, Arc::clone(&state), shutdown.clone()));
    tasks.spawn(ingest_loop(rx, Arc::clone(&state), lifecycle_manager, transport, shutdown.clone()));
    tasks.spawn(wait_for_shutdown_signal(shutdown.clone()));

    shutdown.cancelled().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    tasks.abort_all();
    while tasks.join_next().await.is_some() {}

    let _ = std::fs::remove_file(&rpc_path);
    let _ = std::fs::remove_file(&events_path);
    lifecycle.release();
    info!("paneloop-browserd shut down");
    Ok(())
}

#[allow(dead_code)]
fn log_init_error(e: &anyhow::Error) {
    error!(err = %e, "browser daemon failed to start");
}
