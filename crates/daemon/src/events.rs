// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! Notices and state-snapshot formatting for broadcast events and the
//! `debug_eval` diagnostic views.

use serde::Serialize;
use serde_json::Value;

/// A short user-visible advisory, purely additive, cleared on the next RPC
/// connection's first request (see DESIGN.md Open Questions).
#[derive(Debug, Clone, Serialize)]
pub struct Notice {
    pub text: String,
    pub level: &'static str,
}

impl Notice {
    pub fn warn(text: impl Into<String>) -> Self {
        Self { text: text.into(), level: "warn" }
    }
}

/// One view named by `debug_eval`'s curated namespace (spec §6's
/// `debug_eval`, realized here as fixed views rather than arbitrary code
/// execution — see DESIGN.md Open Questions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugView {
    Queue,
    Panes,
    Patterns,
    Health,
}

impl DebugView {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "queue" => Some(Self::Queue),
            "panes" => Some(Self::Panes),
            "patterns" => Some(Self::Patterns),
            "health" => Some(Self::Health),
            _ => None,
        }
    }
}

pub fn queue_snapshot(now: f64, queue: &paneloop_core::action::ActionQueue) -> Value {
    let pending: Vec<Value> = queue
        .pending()
        .map(|a| {
            serde_json::json!({
                "id": a.id,
                "target_id": a.target_id,
                "command": a.command.chars().take(50).collect::<String>(),
                "state": a.state,
                "age_seconds": now - a.timestamp,
            })
        })
        .collect();
    serde_json::json!({ "pending": pending, "resolved_count": queue.resolved_count() })
}

pub fn panes_snapshot(
    now: f64,
    panes: &crate::target::PaneManager,
    queue: &paneloop_core::action::ActionQueue,
) -> Value {
    let mut out = serde_json::Map::new();
    for pane_id in panes.pane_ids().cloned().collect::<Vec<_>>() {
        let Some(pane) = panes.get(&pane_id) else { continue };
        let action_info = pane.action_id.as_ref().and_then(|id| queue.get(id)).map(|a| {
            serde_json::json!({
                "id": a.id,
                "state": a.state,
                "age_seconds": now - a.timestamp,
            })
        });
        out.insert(
            pane_id.clone(),
            serde_json::json!({
                "process": pane.process,
                "collecting": panes.is_piping(&pane_id),
                "bytes_fed": pane.bytes_fed,
                "action": action_info,
                "buffer": {
                    "line_count": pane.screen.line_count(),
                    "base_idx": pane.screen.base_idx(),
                    "preserve_before": pane.screen.preserve_before(),
                },
            }),
        );
    }
    Value::Object(out)
}

pub fn patterns_snapshot(patterns: &paneloop_core::pattern_store::PatternStore) -> Value {
    let all = patterns.all();
    let mut process_counts = serde_json::Map::new();
    let mut total = 0usize;
    for (process, by_state) in &all {
        let mut counts = serde_json::Map::new();
        for (state, list) in by_state {
            total += list.len();
            counts.insert(state.clone(), Value::from(list.len()));
        }
        process_counts.insert(process.clone(), Value::Object(counts));
    }
    serde_json::json!({ "processes": process_counts, "total_patterns": total })
}
