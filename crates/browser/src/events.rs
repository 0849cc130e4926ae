// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! Notices and `debug_eval` diagnostic views, mirroring
//! `paneloop-daemon`'s `events.rs` with the browser variant's own curated
//! namespace (`queue`, `targets`, `health` — no pattern store here).

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

/// One view named by `debug_eval`'s curated namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugView {
    Queue,
    Targets,
    Health,
}

impl DebugView {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "queue" => Some(Self::Queue),
            "targets" => Some(Self::Targets),
            "health" => Some(Self::Health),
            _ => None,
        }
    }
}

pub fn targets_snapshot(targets: &crate::target::TargetManager) -> Value {
    let list: Vec<Value> = targets
        .ids()
        .filter_map(|id| targets.get(id))
        .map(crate::lifecycle_manager::describe)
        .collect();
    serde_json::json!({ "targets": list, "count": targets.len() })
}

pub fn health_snapshot(uptime_secs: f64, target_count: usize, transport_alive: bool) -> Value {
    serde_json::json!({
        "uptime_seconds": uptime_secs,
        "target_count": target_count,
        "transport_alive": transport_alive,
    })
}
