// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! Daemon configuration: loaded from an optional TOML file, overridden by
//! `PANELOOP_*` environment variables. Unlike the pattern store, a
//! malformed config file is a startup error rather than a silent reset.

use std::path::PathBuf;

use serde::Deserialize;

fn default_max_lines() -> usize {
    5000
}
fn default_pending_cap() -> usize {
    256
}
fn default_resolved_cap() -> usize {
    1024
}
fn default_broadcast_capacity() -> usize {
    1024
}
fn default_worker_threads() -> usize {
    4
}
fn default_shutdown_timeout_secs() -> u64 {
    3
}
fn default_tmux_bin() -> String {
    "tmux".to_owned()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub max_lines: usize,
    pub pending_cap: usize,
    pub resolved_cap: usize,
    pub broadcast_capacity: usize,
    pub worker_threads: usize,
    pub shutdown_timeout_secs: u64,
    pub socket_dir: Option<PathBuf>,
    pub pattern_store_path: Option<PathBuf>,
    pub tmux_bin: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_lines: default_max_lines(),
            pending_cap: default_pending_cap(),
            resolved_cap: default_resolved_cap(),
            broadcast_capacity: default_broadcast_capacity(),
            worker_threads: default_worker_threads(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            socket_dir: None,
            pattern_store_path: None,
            tmux_bin: default_tmux_bin(),
        }
    }
}

impl Config {
    /// Load from `path` if given and present; apply `PANELOOP_*` env
    /// overrides on top. A missing file is not an error — defaults apply.
    /// A present-but-unparseable file is.
    pub fn load(path: Option<&PathBuf>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let text = std::fs::read_to_string(p)?;
                toml::from_str(&text)?
            }
            _ => Self::default(),
        };

        if let Ok(v) = std::env::var("PANELOOP_MAX_LINES") {
            config.max_lines = v.parse()?;
        }
        if let Ok(v) = std::env::var("PANELOOP_TMUX_BIN") {
            config.tmux_bin = v;
        }
        if let Ok(v) = std::env::var("PANELOOP_SOCKET_DIR") {
            config.socket_dir = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("PANELOOP_PATTERN_STORE_PATH") {
            config.pattern_store_path = Some(PathBuf::from(v));
        }

        Ok(config)
    }

    pub fn socket_dir(&self) -> PathBuf {
        self.socket_dir.clone().unwrap_or_else(|| paneloop_core::lifecycle::runtime_dir("paneloopd"))
    }

    pub fn pattern_store_path(&self) -> PathBuf {
        self.pattern_store_path.clone().unwrap_or_else(|| self.socket_dir().join("patterns.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load(Some(&PathBuf::from("/nonexistent/paneloop.toml"))).unwrap();
        assert_eq!(config.max_lines, 5000);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paneloop.toml");
        std::fs::write(&path, "not valid toml [[[").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn valid_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paneloop.toml");
        std::fs::write(&path, "max_lines = 999\ntmux_bin = \"/usr/bin/tmux\"\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.max_lines, 999);
        assert_eq!(config.tmux_bin, "/usr/bin/tmux");
    }
}
