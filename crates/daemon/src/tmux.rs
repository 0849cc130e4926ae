// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! Thin wrapper over the `tmux` binary. Per spec, the core makes no
//! attempt to abstract over the multiplexer protocol — this is the one
//! concrete multiplexer the daemon assumes, not a pluggable trait.

use std::process::Command;

use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum TmuxError {
    #[error("failed to spawn tmux: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("tmux exited with status {status}: {stderr}")]
    NonZero { status: i32, stderr: String },
}

/// A single pane as reported by `tmux list-panes`.
#[derive(Debug, Clone, Serialize)]
pub struct PaneInfo {
    pub pane_id: String,
    pub session: String,
    pub window_index: String,
    pub pane_index: String,
    pub current_command: String,
}

#[derive(Clone)]
pub struct Tmux {
    bin: String,
}

impl Tmux {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    fn run(&self, args: &[&str]) -> Result<String, TmuxError> {
        let output = Command::new(&self.bin).args(args).output()?;
        if !output.status.success() {
            return Err(TmuxError::NonZero {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    pub fn is_available(&self) -> bool {
        self.run(&["info"]).is_ok()
    }

    /// Resolve a user-supplied target (pane id, `session:window.pane`, or
    /// already-canonical `%N`) to a canonical pane id. Returns `None` if
    /// the pane doesn't exist.
    pub fn resolve_pane_id(&self, target: &str) -> Option<String> {
        if target.starts_with('%') {
            return self.pane_exists(target).then(|| target.to_owned());
        }
        let out = self
            .run(&["list-panes", "-t", target, "-F", "#{pane_id}"])
            .ok()?;
        out.lines().next().map(|l| l.trim().to_owned()).filter(|s| !s.is_empty())
    }

    fn pane_exists(&self, pane_id: &str) -> bool {
        self.run(&["list-panes", "-t", pane_id, "-F", "#{pane_id}"]).is_ok()
    }

    pub fn list_panes(&self) -> Result<Vec<PaneInfo>, TmuxError> {
        let out = self.run(&[
            "list-panes",
            "-a",
            "-F",
            "#{pane_id}\t#{session_name}\t#{window_index}\t#{pane_index}\t#{pane_current_command}",
        ])?;
        Ok(out
            .lines()
            .filter_map(|line| {
                let mut parts = line.splitn(5, '\t');
                Some(PaneInfo {
                    pane_id: parts.next()?.to_owned(),
                    session: parts.next()?.to_owned(),
                    window_index: parts.next()?.to_owned(),
                    pane_index: parts.next()?.to_owned(),
                    current_command: parts.next().unwrap_or_default().to_owned(),
                })
            })
            .collect())
    }

    pub fn current_command(&self, pane_id: &str) -> Option<String> {
        self.list_panes().ok()?.into_iter().find(|p| p.pane_id == pane_id).map(|p| p.current_command)
    }

    /// Send raw keys to a pane, pressing Enter unless `enter` is false.
    pub fn send_keys(&self, pane_id: &str, text: &str, enter: bool) -> Result<(), TmuxError> {
        if enter {
            self.run(&["send-keys", "-t", pane_id, text, "Enter"])?;
        } else {
            self.run(&["send-keys", "-t", pane_id, text])?;
        }
        Ok(())
    }

    pub fn interrupt(&self, pane_id: &str) -> Result<(), TmuxError> {
        self.run(&["send-keys", "-t", pane_id, "C-c"])?;
        Ok(())
    }

    /// Capture the last `lines` lines of a pane's visible output (or full
    /// scrollback when `lines` is `None`).
    pub fn capture_pane(&self, pane_id: &str, lines: Option<usize>) -> Result<String, TmuxError> {
        match lines {
            Some(n) => self.run(&["capture-pane", "-t", pane_id, "-p", "-S", &format!("-{n}")]),
            None => self.run(&["capture-pane", "-t", pane_id, "-p"]),
        }
    }

    /// Start piping a pane's output into `command` (the collector process
    /// invocation). Idempotent: a no-op from the caller's perspective if
    /// called twice, since `pipe-pane` with the same target just replaces
    /// the pipe command (the collector accept loop tracks active panes so
    /// callers don't issue this redundantly — see `PaneManager::ensure_pipe`).
    pub fn pipe_pane(&self, pane_id: &str, command: &str) -> Result<(), TmuxError> {
        self.run(&["pipe-pane", "-t", pane_id, command])?;
        Ok(())
    }

    /// Stop piping a pane (empty command argument).
    pub fn stop_pipe_pane(&self, pane_id: &str) -> Result<(), TmuxError> {
        self.run(&["pipe-pane", "-t", pane_id])?;
        Ok(())
    }
}
