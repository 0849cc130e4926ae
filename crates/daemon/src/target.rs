// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! Per-pane state and the manager that owns every live pane plus collector
//! pipe bookkeeping.

use std::collections::{HashMap, HashSet};

use paneloop_core::action::ActionQueue;
use paneloop_core::pattern_store::{PatternState, PatternStore};
use paneloop_core::ring::RingScreenBuffer;

use crate::autoresolve::{self, FeedOutcome};
use crate::tmux::Tmux;

/// Live state for a single pane, created lazily on first byte or query.
pub struct PaneState {
    pub process: String,
    pub screen: RingScreenBuffer,
    /// Id of this pane's current non-terminal action in the shared queue,
    /// if any. The queue is the single source of truth for the action
    /// itself; this is a foreign key, not a second copy.
    pub action_id: Option<String>,
    pub bytes_fed: u64,
    pub bytes_since_watching: u64,
}

impl PaneState {
    fn new(max_lines: usize) -> Self {
        Self {
            process: String::new(),
            screen: RingScreenBuffer::new(max_lines),
            action_id: None,
            bytes_fed: 0,
            bytes_since_watching: 0,
        }
    }
}

/// Owns every live [`PaneState`] plus which panes currently have an active
/// collector pipe.
pub struct PaneManager {
    panes: HashMap<String, PaneState>,
    active_pipes: HashSet<String>,
    max_lines: usize,
    tmux: Tmux,
}

impl PaneManager {
    pub fn new(tmux: Tmux, max_lines: usize) -> Self {
        Self { panes: HashMap::new(), active_pipes: HashSet::new(), max_lines, tmux }
    }

    pub fn get_or_create(&mut self, pane_id: &str) -> &mut PaneState {
        self.panes.entry(pane_id.to_owned()).or_insert_with(|| PaneState::new(self.max_lines))
    }

    pub fn get(&self, pane_id: &str) -> Option<&PaneState> {
        self.panes.get(pane_id)
    }

    pub fn get_mut(&mut self, pane_id: &str) -> Option<&mut PaneState> {
        self.panes.get_mut(pane_id)
    }

    /// Feed bytes to a pane and run the auto-resolver. The caller is
    /// responsible for acting on the returned [`FeedOutcome`] (sending
    /// keystrokes, broadcasting events) — this keeps the pane manager from
    /// holding a back-reference into the daemon, per the no-cyclic-callback
    /// design guidance.
    pub fn feed(&mut self, pane_id: &str, data: &[u8], patterns: &PatternStore, queue: &mut ActionQueue) -> FeedOutcome {
        {
            let pane = self.get_or_create(pane_id);
            pane.screen.feed(data);
            pane.bytes_fed += data.len() as u64;
        }
        let needs_process = self.panes.get(pane_id).is_some_and(|p| p.process.is_empty());
        let current_command = if needs_process { self.tmux.current_command(pane_id) } else { None };

        match self.panes.get_mut(pane_id) {
            Some(pane) => {
                if let Some(cmd) = current_command {
                    pane.process = cmd;
                }
                autoresolve::check(pane, patterns, queue, data.len() as u64)
            }
            None => FeedOutcome::None,
        }
    }

    /// Match the current pattern state for a pane without requiring an
    /// in-flight action — falls back to a direct tmux capture when the
    /// ring buffer is still empty (first query before any bytes fed).
    pub fn check_patterns(&mut self, pane_id: &str, patterns: &PatternStore) -> Option<PatternState> {
        let pane = self.get_or_create(pane_id);
        if pane.bytes_fed == 0 {
            let captured = self.tmux.capture_pane(pane_id, Some(50)).ok()?;
            return patterns.match_output(&pane.process, &captured);
        }
        let content = pane.screen.all_content();
        patterns.match_output(&pane.process, &content)
    }

    /// Ensure a collector pipe is active for `pane_id`, verifying the pane
    /// still exists before (re-)issuing the pipe instruction. A no-op if
    /// already tracked as active.
    pub fn ensure_pipe_pane(&mut self, pane_id: &str, collector_cmd: &str) -> bool {
        if self.active_pipes.contains(pane_id) {
            if self.tmux.resolve_pane_id(pane_id).is_some() {
                return true;
            }
            self.active_pipes.remove(pane_id);
        }
        match self.tmux.pipe_pane(pane_id, collector_cmd) {
            Ok(()) => {
                self.active_pipes.insert(pane_id.to_owned());
                true
            }
            Err(e) => {
                tracing::error!(pane_id, err = %e, "failed to start pipe-pane collector");
                false
            }
        }
    }

    pub fn stop_pipe_pane(&mut self, pane_id: &str) {
        if !self.active_pipes.remove(pane_id) {
            return;
        }
        if let Err(e) = self.tmux.stop_pipe_pane(pane_id) {
            tracing::warn!(pane_id, err = %e, "failed to stop pipe-pane collector");
        }
    }

    /// Called when a collector connection disconnects: mark the pipe
    /// inactive and clear the cached process identity so the next access
    /// refreshes it.
    pub fn on_collector_disconnect(&mut self, pane_id: &str) {
        self.active_pipes.remove(pane_id);
        if let Some(pane) = self.panes.get_mut(pane_id) {
            pane.process.clear();
        }
    }

    pub fn is_piping(&self, pane_id: &str) -> bool {
        self.active_pipes.contains(pane_id)
    }

    pub fn cleanup(&mut self, pane_id: &str) {
        self.panes.remove(pane_id);
        self.active_pipes.remove(pane_id);
    }

    /// Remove panes that no longer exist in tmux; returns the removed ids.
    pub fn cleanup_dead(&mut self) -> Vec<String> {
        let Ok(live) = self.tmux.list_panes() else { return Vec::new() };
        let live_ids: HashSet<String> = live.into_iter().map(|p| p.pane_id).collect();
        let dead: Vec<String> =
            self.panes.keys().filter(|id| !live_ids.contains(id.as_str())).cloned().collect();
        for id in &dead {
            self.cleanup(id);
        }
        dead
    }

    pub fn tmux(&self) -> &Tmux {
        &self.tmux
    }

    pub fn pane_ids(&self) -> impl Iterator<Item = &String> {
        self.panes.keys()
    }

    pub fn len(&self) -> usize {
        self.panes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paneloop_core::action::{Action, ActionState};

    fn manager() -> PaneManager {
        PaneManager::new(Tmux::new("tmux-not-actually-invoked"), 100)
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let mut mgr = manager();
        mgr.get_or_create("%1");
        assert_eq!(mgr.len(), 1);
        mgr.get_or_create("%1");
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn feed_with_no_action_produces_no_outcome() {
        let mut mgr = manager();
        let patterns = PatternStore::load("/nonexistent");
        let mut queue = ActionQueue::default();
        let outcome = mgr.feed("%1", b"hello\n", &patterns, &mut queue);
        assert!(matches!(outcome, FeedOutcome::None));
    }

    #[test]
    fn cleanup_removes_pane_and_pipe_tracking() {
        let mut mgr = manager();
        mgr.get_or_create("%1");
        mgr.active_pipes.insert("%1".to_owned());
        mgr.cleanup("%1");
        assert_eq!(mgr.len(), 0);
        assert!(!mgr.is_piping("%1"));
    }

    #[test]
    fn watching_action_with_no_new_bytes_does_not_complete() {
        let mut mgr = manager();
        let mut queue = ActionQueue::default();
        let action = queue.add(Action::new("%1", "ls", ActionState::Watching));
        {
            let pane = mgr.get_or_create("%1");
            pane.action_id = Some(action.id.clone());
            pane.bytes_since_watching = 0;
        }
        // No patterns loaded, so even if bytes arrived it wouldn't match;
        // this specifically exercises the bytes_since_watching==0 guard.
        let patterns = PatternStore::load("/nonexistent");
        let outcome = mgr.feed("%1", b"", &patterns, &mut queue);
        assert!(matches!(outcome, FeedOutcome::None));
    }

    /// Scenario C — collector restart: disconnect drops the active pipe and
    /// clears the cached process name, but `bytes_fed` and ring buffer
    /// content survive so `all_content` is still visible until `clear`.
    #[test]
    fn collector_disconnect_drops_pipe_but_retains_fed_bytes() {
        let mut mgr = manager();
        let patterns = PatternStore::load("/nonexistent");
        let mut queue = ActionQueue::default();
        mgr.feed("%2", &[b'x'; 42 * 1024], &patterns, &mut queue);
        mgr.active_pipes.insert("%2".to_owned());
        mgr.get_or_create("%2").process = "bash".to_owned();

        mgr.on_collector_disconnect("%2");

        assert!(!mgr.is_piping("%2"));
        let pane = mgr.get("%2").expect("pane still tracked");
        assert_eq!(pane.process, "");
        assert_eq!(pane.bytes_fed, 42 * 1024);
        assert!(!pane.screen.all_content().is_empty());
    }
}
