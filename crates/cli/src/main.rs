// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! `paneloop <subcommand>` — see each subcommand module's doc comment for
//! the RPC method it wraps.

use clap::{Parser, Subcommand};

use paneloop_cli::{cleanup, execute, interrupt, ls, ping, queue, resolve, select, status, watch};

#[derive(Parser)]
#[command(name = "paneloop", version, about = "Front end for a paneloopd or paneloop-browserd daemon.")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Liveness check against the daemon's RPC socket.
    Ping(ping::PingArgs),
    /// List every pane/target the daemon currently tracks.
    Ls(ls::LsArgs),
    /// Run a command against a pane or target.
    Execute(execute::ExecuteArgs),
    /// Advance a pending action per its state machine.
    Resolve(resolve::ResolveArgs),
    /// Poll one action's current state.
    Status(status::StatusArgs),
    /// Dump the full action queue snapshot.
    Queue(queue::QueueArgs),
    /// Interrupt a running command and cancel its pending action.
    Interrupt(interrupt::InterruptArgs),
    /// Run a command without naming a target.
    Select(select::SelectArgs),
    /// Sweep dead panes/targets from the daemon's state.
    Cleanup(cleanup::CleanupArgs),
    /// Stream the daemon's event socket to stdout.
    Watch(watch::WatchArgs),
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let code = match cli.command {
        Command::Ping(args) => ping::run(args).await,
        Command::Ls(args) => ls::run(args).await,
        Command::Execute(args) => execute::run(args).await,
        Command::Resolve(args) => resolve::run(args).await,
        Command::Status(args) => status::run(args).await,
        Command::Queue(args) => queue::run(args).await,
        Command::Interrupt(args) => interrupt::run(args).await,
        Command::Select(args) => select::run(args).await,
        Command::Cleanup(args) => cleanup::run(args).await,
        Command::Watch(args) => watch::run(args).await,
    };
    std::process::exit(code);
}
