// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! Per-pane collector accept loop (spec §4.6).
//!
//! Each pane is piped by tmux into a collector child process whose
//! standard output connects to this socket. The first line it writes
//! names the pane id; every byte after that is raw pane output routed to
//! that pane's feed.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::server::AppState;

/// Collector pane-id lines are short (`%123`); reject anything absurd
/// rather than buffer unbounded garbage from a misbehaving collector.
const MAX_PANE_ID_LINE: usize = 256;

pub async fn run(listener: UnixListener, state: Arc<AppState>, shutdown: CancellationToken) {
    loop {
        let (stream, _) = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => { warn!(err = %e, "collector socket accept failed"); continue; }
            },
        };
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, &state).await {
                debug!(err = %e, "collector connection ended");
            }
        });
    }
}

async fn handle_connection(stream: UnixStream, state: &AppState) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);

    let mut pane_id = String::new();
    let n = reader.read_line(&mut pane_id).await?;
    if n == 0 {
        return Ok(());
    }
    let pane_id = pane_id.trim_end_matches(['\n', '\r']).to_owned();
    if pane_id.is_empty() || pane_id.len() > MAX_PANE_ID_LINE {
        warn!(len = pane_id.len(), "collector sent an invalid pane id line, dropping connection");
        return Ok(());
    }
    debug!(pane_id, "collector attached");

    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let outcome = {
            // Lock order is queue, then panes, then patterns everywhere in
            // this crate, to avoid a cross-task deadlock.
            let mut queue = state.queue.lock();
            let mut panes = state.panes.lock();
            let patterns = state.patterns.read();
            panes.feed(&pane_id, &buf[..n], &patterns, &mut queue)
        };
        crate::server::apply_feed_outcome(state, &pane_id, outcome);
    }

    debug!(pane_id, "collector disconnected");
    state.panes.lock().on_collector_disconnect(&pane_id);
    Ok(())
}
