// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! Outstanding units of work against a target, and the queue that orders
//! and bounds them.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Generate a short printable id (8 lowercase base36 characters) suitable
/// for handing to RPC clients as an opaque token.
pub fn generate_id() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..8).map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char).collect()
}

fn now_unix() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

/// Lifecycle state of an [`Action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    ReadyCheck,
    Watching,
    SelectingPane,
    Completed,
    Cancelled,
}

impl ActionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Status string returned by `get_status`/`resolve` (spec §6).
    pub fn as_status_str(&self) -> &'static str {
        match self {
            Self::ReadyCheck => "ready_check",
            Self::Watching => "watching",
            Self::SelectingPane => "selecting_pane",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// An outstanding unit of work against a target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub target_id: String,
    pub command: String,
    pub timestamp: f64,
    pub state: ActionState,
    pub result: Option<serde_json::Map<String, serde_json::Value>>,
    pub multi_select: bool,
}

impl Action {
    pub fn new(target_id: impl Into<String>, command: impl Into<String>, state: ActionState) -> Self {
        Self {
            id: generate_id(),
            target_id: target_id.into(),
            command: command.into(),
            timestamp: now_unix(),
            state,
            result: None,
            multi_select: false,
        }
    }
}

/// Ordered set of in-flight actions plus a bounded map of recently
/// resolved ones. Enforces no invariant of its own about one-action-per-
/// target — that is a caller responsibility (see spec §3 Action invariant).
#[derive(Debug)]
pub struct ActionQueue {
    pending: VecDeque<Action>,
    resolved: VecDeque<Action>,
    pending_cap: usize,
    resolved_cap: usize,
}

impl Default for ActionQueue {
    fn default() -> Self {
        Self::new(256, 1024)
    }
}

impl ActionQueue {
    pub fn new(pending_cap: usize, resolved_cap: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            resolved: VecDeque::new(),
            pending_cap,
            resolved_cap,
        }
    }

    /// Append a new action. If the pending queue is at capacity, the
    /// oldest pending action is evicted without resolution (pending
    /// capacity is a backstop, not expected to be hit in practice).
    pub fn add(&mut self, action: Action) -> Action {
        if self.pending.len() >= self.pending_cap {
            self.pending.pop_front();
        }
        self.pending.push_back(action.clone());
        action
    }

    /// Look up an action by id in either the pending or resolved set.
    pub fn get(&self, id: &str) -> Option<&Action> {
        self.pending.iter().find(|a| a.id == id).or_else(|| self.resolved.iter().find(|a| a.id == id))
    }

    /// Mutable lookup restricted to the pending set (resolved actions are
    /// immutable once moved).
    pub fn get_pending_mut(&mut self, id: &str) -> Option<&mut Action> {
        self.pending.iter_mut().find(|a| a.id == id)
    }

    /// Move a pending action to resolved with `COMPLETED` state and the
    /// given result. Returns `None` if the action isn't pending (including
    /// if it's already resolved — callers should check [`Self::get`] for
    /// the "already resolved" case per spec idempotence law).
    pub fn resolve(
        &mut self,
        id: &str,
        result: serde_json::Map<String, serde_json::Value>,
    ) -> Option<Action> {
        self.finish(id, ActionState::Completed, result)
    }

    /// Move a pending action to resolved with `CANCELLED` state.
    pub fn cancel(&mut self, id: &str) -> Option<Action> {
        self.finish(id, ActionState::Cancelled, serde_json::Map::new())
    }

    fn finish(
        &mut self,
        id: &str,
        state: ActionState,
        result: serde_json::Map<String, serde_json::Value>,
    ) -> Option<Action> {
        let idx = self.pending.iter().position(|a| a.id == id)?;
        let mut action = self.pending.remove(idx)?;
        action.state = state;
        action.result = Some(result);
        if self.resolved.len() >= self.resolved_cap {
            self.resolved.pop_front();
        }
        self.resolved.push_back(action.clone());
        Some(action)
    }

    pub fn pending(&self) -> impl Iterator<Item = &Action> {
        self.pending.iter()
    }

    pub fn resolved_count(&self) -> usize {
        self.resolved.len()
    }

    /// Full queue snapshot for `get_queue` / debug-style callers.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "pending": self.pending.iter().collect::<Vec<_>>(),
            "resolved_count": self.resolved.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_moves_pending_to_resolved() {
        let mut queue = ActionQueue::default();
        let a = queue.add(Action::new("%1", "ls", ActionState::Watching));
        assert!(queue.pending().any(|x| x.id == a.id));

        let result = serde_json::json!({"output": "ok"}).as_object().unwrap().clone();
        let resolved = queue.resolve(&a.id, result).expect("resolves");
        assert_eq!(resolved.state, ActionState::Completed);
        assert!(queue.pending().all(|x| x.id != a.id));
        assert_eq!(queue.get(&a.id).unwrap().state, ActionState::Completed);
    }

    #[test]
    fn resolve_on_already_resolved_returns_none_without_clobbering() {
        let mut queue = ActionQueue::default();
        let a = queue.add(Action::new("%1", "ls", ActionState::Watching));
        let first = serde_json::json!({"output": "first"}).as_object().unwrap().clone();
        queue.resolve(&a.id, first).expect("resolves once");

        let second = serde_json::json!({"output": "second"}).as_object().unwrap().clone();
        assert!(queue.resolve(&a.id, second).is_none());

        let stored = queue.get(&a.id).unwrap();
        assert_eq!(stored.result.as_ref().unwrap()["output"], "first");
    }

    #[test]
    fn oldest_resolved_are_evicted_first() {
        let mut queue = ActionQueue::new(256, 2);
        for i in 0..3 {
            let a = queue.add(Action::new("%1", format!("cmd{i}"), ActionState::Watching));
            queue.resolve(&a.id, serde_json::Map::new());
        }
        assert_eq!(queue.resolved_count(), 2);
    }
}
