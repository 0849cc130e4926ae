// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! Browser daemon configuration: loaded from an optional TOML file,
//! overridden by `PANELOOP_BROWSER_*` environment variables. Mirrors
//! `paneloop-daemon`'s `config.rs` in shape; fields differ where the
//! browser variant's state differs (no `max_lines`/`tmux_bin`, instead a
//! debug-port list and an event-log cap per target).

use std::path::PathBuf;

use serde::Deserialize;

fn default_pending_cap() -> usize {
    256
}
fn default_resolved_cap() -> usize {
    1024
}
fn default_broadcast_capacity() -> usize {
    1024
}
fn default_shutdown_timeout_secs() -> u64 {
    3
}
fn default_debug_port() -> u16 {
    9222
}
fn default_max_events_per_target() -> usize {
    20_000
}
fn default_call_timeout_secs() -> u64 {
    15
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pending_cap: usize,
    pub resolved_cap: usize,
    pub broadcast_capacity: usize,
    pub shutdown_timeout_secs: u64,
    pub socket_dir: Option<PathBuf>,
    /// Port the target browser's native debugging protocol listens on
    /// (e.g. Chrome's `--remote-debugging-port`).
    pub debug_port: u16,
    /// Host the debug port is reachable on; almost always loopback.
    pub debug_host: String,
    /// Per-target event log cap (spec §4.11's bounded-queue philosophy,
    /// applied here to the event log instead of the broadcast queue).
    pub max_events_per_target: usize,
    pub call_timeout_secs: u64,
    /// URL prefixes to auto-attach on `targetCreated`/`targetInfoChanged`
    /// (the Watched Target Set's by-url half, spec §3).
    #[serde(default)]
    pub watch_urls: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pending_cap: default_pending_cap(),
            resolved_cap: default_resolved_cap(),
            broadcast_capacity: default_broadcast_capacity(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            socket_dir: None,
            debug_port: default_debug_port(),
            debug_host: "127.0.0.1".to_owned(),
            max_events_per_target: default_max_events_per_target(),
            call_timeout_secs: default_call_timeout_secs(),
            watch_urls: Vec::new(),
        }
    }
}

impl Config {
    /// Load from `path` if given and present; apply `PANELOOP_BROWSER_*`
    /// env overrides on top. A missing file is not an error — defaults
    /// apply. A present-but-unparseable file is.
    pub fn load(path: Option<&PathBuf>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let text = std::fs::read_to_string(p)?;
                toml::from_str(&text)?
            }
            _ => Self::default(),
        };

        if let Ok(v) = std::env::var("PANELOOP_BROWSER_DEBUG_PORT") {
            config.debug_port = v.parse()?;
        }
        if let Ok(v) = std::env::var("PANELOOP_BROWSER_DEBUG_HOST") {
            config.debug_host = v;
        }
        if let Ok(v) = std::env::var("PANELOOP_BROWSER_SOCKET_DIR") {
            config.socket_dir = Some(PathBuf::from(v));
        }

        Ok(config)
    }

    pub fn socket_dir(&self) -> PathBuf {
        self.socket_dir
            .clone()
            .unwrap_or_else(|| paneloop_core::lifecycle::runtime_dir("paneloop-browserd"))
    }

    /// `http://host:port/json/version` endpoint the daemon queries at
    /// startup to discover the browser's WebSocket debugger URL.
    pub fn version_url(&self) -> String {
        format!("http://{}:{}/json/version", self.debug_host, self.debug_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load(Some(&PathBuf::from("/nonexistent/paneloop-browser.toml"))).unwrap();
        assert_eq!(config.debug_port, 9222);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paneloop-browser.toml");
        std::fs::write(&path, "not valid toml [[[").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn valid_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paneloop-browser.toml");
        std::fs::write(&path, "debug_port = 9333\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.debug_port, 9333);
    }
}
