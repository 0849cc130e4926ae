// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! Append-only, in-memory relational event log (spec §4.11's "Event Log"
//! browser-variant component). Every inbound CDP event and outbound
//! command/response is appended verbatim as JSON; nothing is ever
//! mutated after insert. Query helpers answer the correlation questions
//! a caller actually asks (by request id, recent-by-target, summary)
//! without requiring the caller to understand the storage shape.

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

/// Errors from the event log's storage layer. Kept local to this module
/// and mapped to [`paneloop_core::error::RpcError`] at RPC call sites,
/// mirroring how `paneloop-daemon`'s `TmuxError` stays local to `tmux.rs`.
#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    #[error("event log storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("event encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

pub struct EventLog {
    conn: Connection,
}

impl EventLog {
    /// Open a fresh in-memory store. `rusqlite`'s `bundled` feature links
    /// SQLite with JSON1 compiled in, so `json_extract` is available
    /// without any runtime feature probing.
    pub fn open_in_memory() -> Result<Self, EventLogError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                target_id TEXT NOT NULL,
                ts INTEGER NOT NULL,
                event TEXT NOT NULL
            );
            CREATE INDEX idx_events_target ON events(target_id);
            CREATE INDEX idx_events_request_id
                ON events(target_id, json_extract(event, '$.params.requestId'));",
        )?;
        Ok(Self { conn })
    }

    /// Append one event, tagged with the target it belongs to (or the
    /// empty string for endpoint-level events with no owning target) and
    /// a caller-supplied monotonic timestamp (ms since daemon start, not
    /// wall-clock, so tests stay deterministic without faking the clock).
    pub fn append(&self, target_id: &str, ts: i64, event: &Value) -> Result<i64, EventLogError> {
        let body = serde_json::to_string(event)?;
        self.conn.execute(
            "INSERT INTO events (target_id, ts, event) VALUES (?1, ?2, ?3)",
            params![target_id, ts, body],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent `limit` events for `target_id`, newest first.
    pub fn recent(&self, target_id: &str, limit: usize) -> Result<Vec<Value>, EventLogError> {
        let mut stmt = self
            .conn
            .prepare("SELECT event FROM events WHERE target_id = ?1 ORDER BY id DESC LIMIT ?2")?;
        let rows = stmt.query_map(params![target_id, limit as i64], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    /// All events sharing `request_id` under `target_id`, oldest first —
    /// the request/response/body correlation spec §4.11 calls for (CDP's
    /// `Network.requestWillBeSent` / `responseReceived` / `loadingFinished`
    /// triplet, matched on `params.requestId`).
    pub fn by_request_id(&self, target_id: &str, request_id: &str) -> Result<Vec<Value>, EventLogError> {
        let mut stmt = self.conn.prepare(
            "SELECT event FROM events
             WHERE target_id = ?1
               AND json_extract(event, '$.params.requestId') = ?2
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![target_id, request_id], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    /// Per-method event counts for `target_id`, for a quick "what's been
    /// happening here" overview without pulling every row.
    pub fn summary(&self, target_id: &str) -> Result<Vec<(String, i64)>, EventLogError> {
        let mut stmt = self.conn.prepare(
            "SELECT COALESCE(json_extract(event, '$.method'), '(response)') AS method, COUNT(*)
             FROM events WHERE target_id = ?1
             GROUP BY method
             ORDER BY COUNT(*) DESC",
        )?;
        let rows =
            stmt.query_map(params![target_id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Drop every row for a target whose daemon-side state is being torn
    /// down (spec §4.11: the log is bounded per target, not global).
    pub fn clear_target(&self, target_id: &str) -> Result<usize, EventLogError> {
        Ok(self.conn.execute("DELETE FROM events WHERE target_id = ?1", params![target_id])?)
    }

    /// Trim `target_id` down to its newest `cap` rows, oldest dropped
    /// first, enforcing `max_events_per_target`.
    pub fn enforce_cap(&self, target_id: &str, cap: usize) -> Result<usize, EventLogError> {
        Ok(self.conn.execute(
            "DELETE FROM events WHERE target_id = ?1 AND id NOT IN (
                SELECT id FROM events WHERE target_id = ?1 ORDER BY id DESC LIMIT ?2
            )",
            params![target_id, cap as i64],
        )?)
    }

    pub fn count(&self, target_id: &str) -> Result<i64, EventLogError> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM events WHERE target_id = ?1", params![target_id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(count.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn append_and_recent_round_trip() {
        let log = EventLog::open_in_memory().unwrap();
        log.append("t1", 1, &json!({"method": "Page.loadEventFired"})).unwrap();
        log.append("t1", 2, &json!({"method": "Network.requestWillBeSent"})).unwrap();
        let recent = log.recent("t1", 10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0]["method"], "Network.requestWillBeSent");
    }

    #[test]
    fn by_request_id_correlates_across_events() {
        let log = EventLog::open_in_memory().unwrap();
        log.append("t1", 1, &json!({"method": "Network.requestWillBeSent", "params": {"requestId": "r1"}}))
            .unwrap();
        log.append("t1", 2, &json!({"method": "Network.responseReceived", "params": {"requestId": "r1"}}))
            .unwrap();
        log.append("t1", 3, &json!({"method": "Network.requestWillBeSent", "params": {"requestId": "r2"}}))
            .unwrap();
        let matched = log.by_request_id("t1", "r1").unwrap();
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn targets_are_isolated() {
        let log = EventLog::open_in_memory().unwrap();
        log.append("t1", 1, &json!({"method": "a"})).unwrap();
        log.append("t2", 1, &json!({"method": "b"})).unwrap();
        assert_eq!(log.recent("t1", 10).unwrap().len(), 1);
        assert_eq!(log.recent("t2", 10).unwrap().len(), 1);
    }

    #[test]
    fn enforce_cap_drops_oldest_first() {
        let log = EventLog::open_in_memory().unwrap();
        for i in 0..5 {
            log.append("t1", i, &json!({"n": i})).unwrap();
        }
        log.enforce_cap("t1", 2).unwrap();
        let remaining = log.recent("t1", 10).unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0]["n"], 4);
        assert_eq!(remaining[1]["n"], 3);
    }

    #[test]
    fn clear_target_removes_only_that_target() {
        let log = EventLog::open_in_memory().unwrap();
        log.append("t1", 1, &json!({"n": 1})).unwrap();
        log.append("t2", 1, &json!({"n": 1})).unwrap();
        log.clear_target("t1").unwrap();
        assert_eq!(log.count("t1").unwrap(), 0);
        assert_eq!(log.count("t2").unwrap(), 1);
    }
}
