// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! Bounded fan-out of structured events to any number of subscribers.
//!
//! Wraps [`tokio::sync::broadcast`]: each subscriber gets its own lagging
//! receiver, and a receiver that falls behind silently drops the oldest
//! buffered events rather than blocking the publisher or the other
//! subscribers.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// Default ring size for a newly created broadcaster (spec §4.2).
pub const DEFAULT_CAPACITY: usize = 1024;

/// A single published event: a `kind` discriminant plus an arbitrary JSON
/// payload. Serializes as `{"event": kind, ...payload fields}`.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: &'static str,
    pub payload: Value,
}

impl Event {
    pub fn new(kind: &'static str, payload: impl Serialize) -> Self {
        Self { kind, payload: serde_json::to_value(payload).unwrap_or(Value::Null) }
    }

    /// Flatten into a single JSON object with `event` merged alongside the
    /// payload's own fields (or nested under `"data"` if the payload isn't
    /// itself an object).
    pub fn to_wire(&self) -> Value {
        match &self.payload {
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len() + 1);
                out.insert("event".to_owned(), Value::String(self.kind.to_owned()));
                out.extend(map.clone());
                Value::Object(out)
            }
            other => serde_json::json!({"event": self.kind, "data": other}),
        }
    }
}

/// Publish side and subscription factory for a single event stream.
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<Event>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. A no-op (no error) if there are currently no
    /// subscribers — events are not buffered for subscribers that haven't
    /// connected yet.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription { rx: self.tx.subscribe() }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// A single subscriber's handle. Wraps the broadcast receiver so lag is
/// handled uniformly: a lagged receiver just skips ahead rather than
/// surfacing an error to the caller.
pub struct EventSubscription {
    rx: broadcast::Receiver<Event>,
}

impl EventSubscription {
    /// Wait for the next event, transparently skipping past any gap caused
    /// by falling behind the publisher. Returns `None` once the
    /// broadcaster itself has been dropped.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "event subscriber lagged, dropping oldest");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
