// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! CLI entry point: `paneloopd start|stop|status`. The daemon itself never
//! forks (the workspace forbids `unsafe_code`, which double-fork
//! daemonizing needs) — `start` runs the server in the foreground and is
//! expected to be launched already backgrounded by the caller (`&`, a
//! supervisor, or a unit file).

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::error;

use paneloop_core::lifecycle::{DaemonLifecycle, Status};
use paneloop_daemon::config::Config;
use paneloop_daemon::server::{self, TOOL_NAME};

#[derive(Parser)]
#[command(name = "paneloopd", version, about = "Terminal pane controller daemon.")]
struct Cli {
    /// Path to a `paneloop.toml` config file (defaults apply if absent).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the daemon in the foreground.
    Start,
    /// Stop a running daemon (SIGTERM, then SIGKILL after a timeout).
    Stop {
        #[arg(long, default_value_t = 3)]
        timeout_secs: u64,
    },
    /// Report whether a daemon is currently running.
    Status,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let code = match cli.command {
        Command::Start => run_start(cli.config).await,
        Command::Stop { timeout_secs } => run_stop(timeout_secs).await,
        Command::Status => run_status(),
    };
    std::process::exit(code);
}

async fn run_start(config_path: Option<PathBuf>) -> i32 {
    if let Status::Running { pid } = DaemonLifecycle::probe(TOOL_NAME) {
        println!("already_running (pid {pid})");
        return 0;
    }

    let config = match Config::load(config_path.as_ref()) {
        Ok(c) => c,
        Err(e) => {
            error!("invalid configuration: {e:#}");
            println!("failed");
            return 1;
        }
    };

    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
    let server = tokio::spawn(server::run(config, Some(ready_tx)));

    // Resolves as soon as the server either signals readiness or exits
    // (dropping the sender) without ever getting there.
    let became_ready = ready_rx.await.is_ok();
    if became_ready {
        println!("started");
    }

    match server.await {
        Ok(Ok(())) => 0,
        Ok(Err(e)) => {
            error!("daemon failed: {e:#}");
            if !became_ready {
                println!("failed");
            }
            1
        }
        Err(e) => {
            error!("daemon task panicked: {e}");
            if !became_ready {
                println!("failed");
            }
            1
        }
    }
}

async fn run_stop(timeout_secs: u64) -> i32 {
    match DaemonLifecycle::stop(TOOL_NAME, Duration::from_secs(timeout_secs)).await {
        Ok(()) => {
            println!("stopped");
            0
        }
        Err(paneloop_core::lifecycle::LifecycleError::NotRunning) => {
            println!("not_running");
            0
        }
        Err(paneloop_core::lifecycle::LifecycleError::ShutdownTimedOut(_)) => {
            println!("killed");
            0
        }
        Err(e) => {
            error!("stop failed: {e}");
            1
        }
    }
}

fn run_status() -> i32 {
    match DaemonLifecycle::probe(TOOL_NAME) {
        Status::Running { pid } => {
            println!("running (pid {pid})");
            0
        }
        Status::NotRunning => {
            println!("not_running");
            0
        }
    }
}
