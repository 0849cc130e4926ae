// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! Auto-resolution: re-evaluates pattern match state after every feed and
//! advances the action state machine per spec §4.8.

use paneloop_core::action::{Action, ActionQueue, ActionState};
use paneloop_core::pattern_store::{PatternState, PatternStore};

use crate::target::PaneState;

/// What the feed caller (the collector/server loop) must do in response to
/// this feed's auto-resolution pass. Returned instead of invoking a
/// callback directly, so the pane manager never needs a back-reference
/// into the daemon.
pub enum FeedOutcome {
    None,
    /// `READY_CHECK` matched ready. Caller must: clear the pane's screen,
    /// send the action's command via tmux, transition the action to
    /// `WATCHING` in the queue, reset `bytes_since_watching`, and
    /// broadcast `action_watching`.
    SignalReady(Action),
    /// `WATCHING` resolved to completion. The action has already been
    /// moved to the queue's resolved set; caller broadcasts
    /// `action_resolved`.
    Completed(Action),
}

/// Run one auto-resolve pass for `pane` after `fed_bytes` new bytes were
/// just appended to its screen.
pub fn check(pane: &mut PaneState, patterns: &PatternStore, queue: &mut ActionQueue, fed_bytes: u64) -> FeedOutcome {
    let Some(action_id) = pane.action_id.clone() else { return FeedOutcome::None };

    let was_watching = queue.get(&action_id).map(|a| a.state == ActionState::Watching).unwrap_or(false);
    if was_watching {
        pane.bytes_since_watching += fed_bytes;
    }

    let content = pane.screen.all_content();
    let state = patterns.match_output(&pane.process, &content);

    let Some(action) = queue.get_pending_mut(&action_id) else {
        // Action already resolved/cancelled out from under us (e.g. a
        // concurrent RPC resolve); nothing to do.
        pane.action_id = None;
        return FeedOutcome::None;
    };

    match (action.state, state) {
        (ActionState::Watching, Some(PatternState::Ready)) if pane.bytes_since_watching > 0 => {
            let mut result = serde_json::Map::new();
            result.insert("output".to_owned(), serde_json::Value::String(content));
            result.insert("truncated".to_owned(), serde_json::Value::Bool(false));
            let Some(resolved) = queue.resolve(&action_id, result) else {
                pane.action_id = None;
                return FeedOutcome::None;
            };
            pane.action_id = None;
            FeedOutcome::Completed(resolved)
        }
        (ActionState::ReadyCheck, Some(PatternState::Ready)) => {
            let mut result = serde_json::Map::new();
            result.insert("state".to_owned(), serde_json::Value::String("ready".to_owned()));
            result.insert("auto".to_owned(), serde_json::Value::Bool(true));
            action.result = Some(result);
            // Daemon transitions ReadyCheck -> Watching itself (see
            // server::apply_signal_ready); the action stays pending here.
            FeedOutcome::SignalReady(action.clone())
        }
        _ => FeedOutcome::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paneloop_core::ring::RingScreenBuffer;

    fn pane() -> PaneState {
        PaneState { process: "bash".to_owned(), screen: RingScreenBuffer::new(100), action_id: None, bytes_fed: 0, bytes_since_watching: 0 }
    }

    #[test]
    fn ready_check_signals_without_clearing_action() {
        let mut store = PatternStore::load("/nonexistent");
        store.add("bash", "[$ ]$", PatternState::Ready).unwrap();
        let mut queue = ActionQueue::default();
        let action = queue.add(Action::new("%1", "ls", ActionState::ReadyCheck));

        let mut pane = pane();
        pane.action_id = Some(action.id.clone());
        pane.screen.feed(b"user@host $ ");

        let outcome = check(&mut pane, &store, &mut queue, 12);
        assert!(matches!(outcome, FeedOutcome::SignalReady(_)));
        assert!(pane.action_id.is_some(), "action must stay attached until daemon transitions it");
        assert_eq!(queue.get(&action.id).unwrap().state, ActionState::ReadyCheck);
    }

    #[test]
    fn watching_completes_only_after_new_bytes() {
        let mut store = PatternStore::load("/nonexistent");
        store.add("bash", "[$ ]$", PatternState::Ready).unwrap();
        let mut queue = ActionQueue::default();
        let action = queue.add(Action::new("%1", "ls", ActionState::Watching));

        let mut pane = pane();
        pane.action_id = Some(action.id.clone());
        pane.screen.feed(b"user@host $ ");

        // bytes_since_watching starts at 0 and fed_bytes=0 here models the
        // "still showing the old prompt" case.
        let outcome = check(&mut pane, &store, &mut queue, 0);
        assert!(matches!(outcome, FeedOutcome::None));

        let outcome = check(&mut pane, &store, &mut queue, 5);
        assert!(matches!(outcome, FeedOutcome::Completed(_)));
        assert!(pane.action_id.is_none());
    }
}
