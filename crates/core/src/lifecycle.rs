// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! Daemon process lifecycle: PID file discipline, socket path layout, and
//! start/stop/status against a previously-started instance.
//!
//! Both the terminal and browser daemons are single-instance-per-user
//! background processes that a short-lived CLI starts, queries, and stops.
//! This module owns the parts of that dance that are identical for both:
//! where the PID file and control socket live, how a stale PID file is
//! detected, and how a running daemon is asked (then told) to exit.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

/// Directory under `$XDG_RUNTIME_DIR` (falling back to `/tmp/<uid>`) that
/// holds `<tool>/daemon.pid` and `<tool>/control.sock`.
pub fn runtime_dir(tool: &str) -> PathBuf {
    let base = std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp").join(format!("paneloop-{}", nix::unistd::getuid())));
    base.join(tool)
}

pub fn socket_path(tool: &str) -> PathBuf {
    runtime_dir(tool).join("control.sock")
}

fn pid_path(tool: &str) -> PathBuf {
    runtime_dir(tool).join("daemon.pid")
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum LifecycleError {
    #[error("daemon already running (pid {0})")]
    AlreadyRunning(i32),
    #[error("no daemon running")]
    NotRunning,
    #[error("daemon did not exit within {0:?}")]
    ShutdownTimedOut(Duration),
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for LifecycleError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Status of a previously-recorded PID file.
pub enum Status {
    /// No PID file, or it pointed at a process that is no longer alive.
    NotRunning,
    /// A live process is holding this PID.
    Running { pid: i32 },
}

/// Handle to this daemon's own PID file and runtime directory. Created once
/// at daemon startup ([`DaemonLifecycle::claim`]) and by short-lived CLI
/// invocations that only need to read it ([`DaemonLifecycle::probe`]).
pub struct DaemonLifecycle {
    tool: String,
    dir: PathBuf,
}

impl DaemonLifecycle {
    fn new(tool: &str) -> Self {
        Self { tool: tool.to_owned(), dir: runtime_dir(tool) }
    }

    pub fn socket_path(&self) -> PathBuf {
        socket_path(&self.tool)
    }

    fn pid_path(&self) -> PathBuf {
        pid_path(&self.tool)
    }

    /// Read the PID file (if any) and determine whether it still names a
    /// live process.
    pub fn probe(tool: &str) -> Status {
        let lifecycle = Self::new(tool);
        let Ok(contents) = std::fs::read_to_string(lifecycle.pid_path()) else {
            return Status::NotRunning;
        };
        let Ok(pid) = contents.trim().parse::<i32>() else {
            return Status::NotRunning;
        };
        if process_is_alive(pid) {
            Status::Running { pid }
        } else {
            Status::NotRunning
        }
    }

    /// Claim ownership of the PID file for a fresh daemon process,
    /// refusing if another instance is already alive. Creates the runtime
    /// directory (mode 0700) if needed and writes the PID file atomically.
    pub fn claim(tool: &str) -> Result<Self, LifecycleError> {
        if let Status::Running { pid } = Self::probe(tool) {
            return Err(LifecycleError::AlreadyRunning(pid));
        }
        let lifecycle = Self::new(tool);
        std::fs::create_dir_all(&lifecycle.dir)?;
        set_private_mode(&lifecycle.dir)?;

        let pid = std::process::id();
        let tmp_path = lifecycle.dir.join(format!(".daemon.pid.{pid}.tmp"));
        let mut tmp = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)?;
        write!(tmp, "{pid}")?;
        tmp.flush()?;
        drop(tmp);
        std::fs::rename(&tmp_path, lifecycle.pid_path())?;
        Ok(lifecycle)
    }

    /// Remove the PID file. Called once on clean shutdown; a daemon killed
    /// by `SIGKILL` leaves a stale file that the next [`Self::probe`] call
    /// will detect and discard.
    pub fn release(&self) {
        let _ = std::fs::remove_file(self.pid_path());
    }

    /// Ask a running daemon to stop: `SIGTERM`, then `SIGKILL` after
    /// `timeout` if it hasn't exited.
    pub async fn stop(tool: &str, timeout: Duration) -> Result<(), LifecycleError> {
        let Status::Running { pid } = Self::probe(tool) else {
            return Err(LifecycleError::NotRunning);
        };
        let nix_pid = Pid::from_raw(pid);
        kill(nix_pid, Signal::SIGTERM).map_err(|e| LifecycleError::Io(e.to_string()))?;

        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if !process_is_alive(pid) {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        if process_is_alive(pid) {
            tracing::warn!(pid, "daemon did not exit within {:?}, sending SIGKILL", timeout);
            let _ = kill(nix_pid, Signal::SIGKILL);
            tokio::time::sleep(Duration::from_millis(100)).await;
            if process_is_alive(pid) {
                return Err(LifecycleError::ShutdownTimedOut(timeout));
            }
        }
        Ok(())
    }
}

fn process_is_alive(pid: i32) -> bool {
    // Signal 0 performs no-op permission/existence checks only.
    kill(Pid::from_raw(pid), None).is_ok()
}

#[cfg(unix)]
fn set_private_mode(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn set_private_mode(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
