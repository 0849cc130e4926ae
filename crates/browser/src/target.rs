// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! Per-target state for an attached browser page (spec §3's browser
//! variant) and the manager that owns every attached target, mirroring
//! `paneloop-daemon::target`'s `PaneManager` shape.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde_json::Value;

/// Connection state for one target (spec §4.9/§5's per-target lock:
/// CONNECTING / ATTACHED / DISCONNECTING / SUSPENDED, with idempotent
/// double-disconnect and concurrent-connect).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Attached,
    Disconnecting,
    Suspended,
}

/// Outcome of a requested state transition, letting callers distinguish
/// "did something" from "no-op, already there" without treating the
/// latter as an error (spec §5: "return `already_in_state` instead of
/// erroring").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Transitioned,
    AlreadyInState,
    NotFound,
}

/// Build the `{port}:{short-id}` composite target id (spec §3: "6-character
/// hex prefix of the browser-assigned page id").
pub fn make_target_id(port: u16, page_id: &str) -> String {
    let short_id: String = page_id.chars().take(6).collect();
    format!("{port}:{short_id}")
}

#[derive(Debug, Clone, Serialize)]
pub struct BrowserTarget {
    pub id: String,
    /// CDP session id returned by `Target.attachToTarget`; empty until
    /// attached.
    pub session_id: String,
    /// Opaque page metadata snapshot (url, title, type) as last reported
    /// by `targetInfoChanged`/`targetCreated`.
    pub metadata: Value,
    pub state: ConnectionState,
    pub inspecting: bool,
    pub attach_epoch: u64,
    pub action_id: Option<String>,
}

impl BrowserTarget {
    fn new(id: String) -> Self {
        Self {
            id,
            session_id: String::new(),
            metadata: Value::Null,
            state: ConnectionState::Connecting,
            inspecting: false,
            attach_epoch: 0,
            action_id: None,
        }
    }
}

/// Owns every currently-known target plus the Watched Target Set (spec
/// §3) the lifecycle manager consults to decide whether a newly-appearing
/// target should be attached automatically.
#[derive(Default)]
pub struct TargetManager {
    targets: HashMap<String, BrowserTarget>,
    watched_ids: HashSet<String>,
    watched_urls: Vec<String>,
    next_epoch: u64,
}

impl TargetManager {
    pub fn new(watched_urls: Vec<String>) -> Self {
        Self { watched_urls, ..Default::default() }
    }

    pub fn get(&self, id: &str) -> Option<&BrowserTarget> {
        self.targets.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut BrowserTarget> {
        self.targets.get_mut(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.targets.keys()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// `true` if `id` or `url` names something this daemon should
    /// auto-attach when it appears.
    pub fn is_watched(&self, id: &str, url: &str) -> bool {
        self.watched_ids.contains(id) || self.watched_urls.iter().any(|prefix| url.starts_with(prefix))
    }

    pub fn watch_id(&mut self, id: impl Into<String>) {
        self.watched_ids.insert(id.into());
    }

    /// Begin attaching `id`: idempotent against a target already
    /// connecting or attached.
    pub fn begin_attach(&mut self, id: &str) -> TransitionOutcome {
        match self.targets.get(id) {
            Some(t) if matches!(t.state, ConnectionState::Connecting | ConnectionState::Attached) => {
                TransitionOutcome::AlreadyInState
            }
            _ => {
                self.targets.entry(id.to_owned()).or_insert_with(|| BrowserTarget::new(id.to_owned()));
                TransitionOutcome::Transitioned
            }
        }
    }

    /// Mark `id` attached once `Target.attachToTarget` returns a session
    /// id, bumping the attach epoch (spec §3's "attach epoch").
    pub fn mark_attached(&mut self, id: &str, session_id: String, metadata: Value) {
        self.next_epoch += 1;
        let epoch = self.next_epoch;
        if let Some(t) = self.targets.get_mut(id) {
            t.session_id = session_id;
            t.metadata = metadata;
            t.state = ConnectionState::Attached;
            t.attach_epoch = epoch;
        }
    }

    pub fn update_metadata(&mut self, id: &str, metadata: Value) {
        if let Some(t) = self.targets.get_mut(id) {
            t.metadata = metadata;
        }
    }

    /// Begin disconnecting `id`: idempotent against a target already
    /// disconnecting or suspended (spec §5: "double-disconnect ... is a
    /// no-op after the first").
    pub fn begin_disconnect(&mut self, id: &str) -> TransitionOutcome {
        let Some(t) = self.targets.get_mut(id) else { return TransitionOutcome::NotFound };
        if matches!(t.state, ConnectionState::Disconnecting | ConnectionState::Suspended) {
            return TransitionOutcome::AlreadyInState;
        }
        t.state = ConnectionState::Disconnecting;
        TransitionOutcome::Transitioned
    }

    pub fn suspend(&mut self, id: &str) -> TransitionOutcome {
        let Some(t) = self.targets.get_mut(id) else { return TransitionOutcome::NotFound };
        if t.state == ConnectionState::Suspended {
            return TransitionOutcome::AlreadyInState;
        }
        t.state = ConnectionState::Suspended;
        TransitionOutcome::Transitioned
    }

    /// Remove `id` from the registry entirely, returning it for cleanup
    /// (event log eviction, mux unregistration).
    pub fn remove(&mut self, id: &str) -> Option<BrowserTarget> {
        self.targets.remove(id)
    }

    pub fn session_id_for(&self, target_id: &str) -> Option<&str> {
        self.targets.get(target_id).map(|t| t.session_id.as_str())
    }

    pub fn target_id_for_session(&self, session_id: &str) -> Option<String> {
        self.targets.iter().find(|(_, t)| t.session_id == session_id).map(|(id, _)| id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_attach_then_mark_attached_transitions_state() {
        let mut mgr = TargetManager::new(vec![]);
        assert_eq!(mgr.begin_attach("9222:abc123"), TransitionOutcome::Transitioned);
        assert_eq!(mgr.get("9222:abc123").unwrap().state, ConnectionState::Connecting);
        mgr.mark_attached("9222:abc123", "sess-1".to_owned(), serde_json::json!({"url": "x"}));
        assert_eq!(mgr.get("9222:abc123").unwrap().state, ConnectionState::Attached);
        assert_eq!(mgr.get("9222:abc123").unwrap().attach_epoch, 1);
    }

    #[test]
    fn double_disconnect_is_idempotent() {
        let mut mgr = TargetManager::new(vec![]);
        mgr.begin_attach("t1");
        mgr.mark_attached("t1", "s1".to_owned(), Value::Null);
        assert_eq!(mgr.begin_disconnect("t1"), TransitionOutcome::Transitioned);
        assert_eq!(mgr.begin_disconnect("t1"), TransitionOutcome::AlreadyInState);
    }

    #[test]
    fn disconnect_of_unknown_target_is_not_found() {
        let mut mgr = TargetManager::new(vec![]);
        assert_eq!(mgr.begin_disconnect("ghost"), TransitionOutcome::NotFound);
    }

    #[test]
    fn watch_matches_id_or_url_prefix() {
        let mut mgr = TargetManager::new(vec!["https://app.example.com/".to_owned()]);
        mgr.watch_id("explicit-id");
        assert!(mgr.is_watched("explicit-id", "about:blank"));
        assert!(mgr.is_watched("other-id", "https://app.example.com/dashboard"));
        assert!(!mgr.is_watched("other-id", "https://unrelated.example.com/"));
    }

    #[test]
    fn make_target_id_truncates_to_six_hex_chars() {
        assert_eq!(make_target_id(9222, "ABCDEFGHIJK"), "9222:ABCDEF");
    }
}
