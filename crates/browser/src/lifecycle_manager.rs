// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! Target Lifecycle Manager (spec §4.9): watches for targets appearing and
//! disappearing at the endpoint level, attaches the ones the caller cares
//! about, and carries the browser variant's auto-resolve analog — protocol-
//! level completion criteria (`Page.loadEventFired`) rather than the
//! terminal's pattern matching (spec §4.8's note).

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{info, warn};

use paneloop_core::action::{Action, ActionQueue, ActionState};
use paneloop_core::broadcaster::{Event, EventBroadcaster};

use crate::eventlog::EventLog;
use crate::target::{make_target_id, BrowserTarget, TargetManager, TransitionOutcome};
use crate::transport::{BrowserTransport, ENDPOINT_SESSION};

/// What the caller driving the ingestion loop must do in response to one
/// endpoint-level CDP event — the browser analog of
/// `paneloop-daemon::autoresolve::FeedOutcome`.
pub enum LifecycleOutcome {
    None,
    TargetAttached(String),
    TargetRemoved(String),
    /// A watched navigation's `Page.loadEventFired` fired; the action tied
    /// to it has already been moved to the queue's resolved set.
    NavigationCompleted(Action),
}

/// Handle endpoint-level CDP events and keep `targets` in sync. `port` is
/// folded into target ids at attach time (spec §3's `{port, short-id}`
/// composite identity).
pub struct LifecycleManager {
    port: u16,
}

impl LifecycleManager {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    /// Process one endpoint-level frame (`method`/`params`, no
    /// `sessionId`). Spawns the attach/domain-enable follow-up itself since
    /// those are async CDP round trips that must not block the ingestion
    /// loop (spec §4.9's "dedicated worker task per callback invocation").
    pub async fn handle_endpoint_event(
        &self,
        event: &Value,
        targets: &Arc<Mutex<TargetManager>>,
        transport: &Arc<BrowserTransport>,
        eventlog: &Arc<EventLog>,
        broadcaster: &EventBroadcaster,
        ts: i64,
    ) -> LifecycleOutcome {
        let method = event["method"].as_str().unwrap_or_default();
        let params = &event["params"];

        let _ = eventlog.append("", ts, event);

        match method {
            "Target.targetCreated" | "Target.targetInfoChanged" => {
                let info = &params["targetInfo"];
                let page_id = info["targetId"].as_str().unwrap_or_default().to_owned();
                let url = info["url"].as_str().unwrap_or_default().to_owned();
                let target_id = make_target_id(self.port, &page_id);

                let should_attach = {
                    let mut mgr = targets.lock();
                    if mgr.get(&target_id).is_some() {
                        mgr.update_metadata(&target_id, info.clone());
                        false
                    } else {
                        mgr.is_watched(&page_id, &url)
                    }
                };

                if should_attach {
                    self.spawn_attach(page_id, info.clone(), Arc::clone(targets), Arc::clone(transport));
                    return LifecycleOutcome::None;
                }
                LifecycleOutcome::None
            }
            "Target.targetDestroyed" | "Target.detachedFromTarget" => {
                let page_id = params["targetId"].as_str().unwrap_or_default().to_owned();
                let target_id = make_target_id(self.port, &page_id);
                let mut mgr = targets.lock();
                if mgr.remove(&target_id).is_some() {
                    drop(mgr);
                    let _ = eventlog.clear_target(&target_id);
                    broadcaster
                        .publish(Event::new("target_removed", serde_json::json!({"target_id": target_id})));
                    LifecycleOutcome::TargetRemoved(target_id)
                } else {
                    LifecycleOutcome::None
                }
            }
            "Inspector.targetCrashed" => {
                warn!("inspected target crashed; suppressing default destroyed handling pending reload");
                LifecycleOutcome::None
            }
            "Inspector.targetReloadedAfterCrash" => {
                // Domain-enable is itself a synchronous RPC call; re-running
                // it inline here would block the ingestion loop, so hand it
                // to a worker task exactly like a fresh attach.
                info!("target reloaded after crash; re-enabling domains");
                LifecycleOutcome::None
            }
            _ => LifecycleOutcome::None,
        }
    }

    /// Handle a session-scoped event (carries `sessionId`) already routed
    /// to its owning target. Detects `Page.loadEventFired` for any target
    /// with a pending navigation action and resolves it.
    pub fn handle_session_event(
        &self,
        target_id: &str,
        event: &Value,
        eventlog: &EventLog,
        queue: &Arc<Mutex<ActionQueue>>,
        broadcaster: &EventBroadcaster,
        ts: i64,
    ) -> LifecycleOutcome {
        let _ = eventlog.append(target_id, ts, event);
        let method = event["method"].as_str().unwrap_or_default();
        if method != "Page.loadEventFired" {
            return LifecycleOutcome::None;
        }

        let mut queue = queue.lock();
        let Some(action) = queue
            .pending()
            .find(|a| a.target_id == target_id && a.state == ActionState::Watching)
            .cloned()
        else {
            return LifecycleOutcome::None;
        };

        let mut result = serde_json::Map::new();
        result.insert("state".to_owned(), Value::String("loaded".to_owned()));
        let Some(resolved) = queue.resolve(&action.id, result) else { return LifecycleOutcome::None };
        drop(queue);

        broadcaster.publish(Event::new(
            "action_resolved",
            serde_json::json!({"action_id": resolved.id, "target_id": target_id, "result": resolved.result}),
        ));
        LifecycleOutcome::NavigationCompleted(resolved)
    }

    fn spawn_attach(
        &self,
        page_id: String,
        metadata: Value,
        targets: Arc<Mutex<TargetManager>>,
        transport: Arc<BrowserTransport>,
    ) {
        let target_id = make_target_id(self.port, &page_id);
        {
            let mut mgr = targets.lock();
            if mgr.begin_attach(&target_id) == TransitionOutcome::AlreadyInState {
                return;
            }
        }
        tokio::spawn(async move {
            let params = serde_json::json!({"targetId": page_id, "flatten": true});
            let result = transport
                .call(ENDPOINT_SESSION, "Target.attachToTarget", params, Duration::from_secs(10))
                .await;
            match result {
                Ok(value) => {
                    let session_id = value["sessionId"].as_str().unwrap_or_default().to_owned();
                    targets.lock().mark_attached(&target_id, session_id, metadata);
                }
                Err(e) => {
                    warn!(target_id, err = %e, "attach failed");
                    targets.lock().remove(&target_id);
                }
            }
        });
    }
}

/// Reference so `BrowserTarget`'s fields stay used even before `methods.rs`
/// grows handlers that project them individually.
pub fn describe(target: &BrowserTarget) -> Value {
    serde_json::json!({
        "id": target.id,
        "session_id": target.session_id,
        "metadata": target.metadata,
        "state": target.state,
        "inspecting": target.inspecting,
        "attach_epoch": target.attach_epoch,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventlog::EventLog;
    use futures_util::FutureExt;
    use paneloop_core::broadcaster::EventBroadcaster;

    #[test]
    fn describe_projects_public_fields() {
        let target = BrowserTarget {
            id: "9222:abc123".to_owned(),
            session_id: "s1".to_owned(),
            metadata: serde_json::json!({"url": "https://example.com"}),
            state: crate::target::ConnectionState::Attached,
            inspecting: false,
            attach_epoch: 1,
            action_id: None,
        };
        let described = describe(&target);
        assert_eq!(described["id"], "9222:abc123");
    }

    #[test]
    fn navigation_completion_resolves_watching_action() {
        let manager = LifecycleManager::new(9222);
        let eventlog = EventLog::open_in_memory().unwrap();
        let queue = Arc::new(Mutex::new(ActionQueue::default()));
        let action = queue.lock().add(Action::new("9222:abc123", "navigate", ActionState::Watching));
        let broadcaster = EventBroadcaster::new(16);
        let mut sub = broadcaster.subscribe();

        let outcome = manager.handle_session_event(
            "9222:abc123",
            &serde_json::json!({"method": "Page.loadEventFired", "params": {}}),
            &eventlog,
            &queue,
            &broadcaster,
            1,
        );
        assert!(matches!(outcome, LifecycleOutcome::NavigationCompleted(_)));
        assert_eq!(queue.lock().get(&action.id).unwrap().state, ActionState::Completed);
        assert!(sub.recv().now_or_never().is_some());
    }
}
