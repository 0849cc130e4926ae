// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! Which daemon a subcommand talks to. Both `paneloopd` and
//! `paneloop-browserd` speak the same wire format over the same
//! `$XDG_RUNTIME_DIR/<tool>/{rpc,events}.sock` layout (`paneloop-client`
//! serves both), so every subcommand only needs to know which tool name
//! to connect under.

use clap::ValueEnum;
use tracing::{debug, warn};

use paneloop_browser::server::TOOL_NAME as BROWSER_TOOL_NAME;
use paneloop_client::Client;
use paneloop_core::error::RpcError;
use paneloop_daemon::server::TOOL_NAME as DAEMON_TOOL_NAME;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Tool {
    /// Terminal Pane Controller (`paneloopd`).
    Terminal,
    /// Browser Debug Gateway (`paneloop-browserd`).
    Browser,
}

impl Tool {
    pub fn tool_name(self) -> &'static str {
        match self {
            Self::Terminal => DAEMON_TOOL_NAME,
            Self::Browser => BROWSER_TOOL_NAME,
        }
    }

    pub async fn connect(self) -> Result<Client, RpcError> {
        let tool_name = self.tool_name();
        let client = Client::connect_tool(tool_name).await?;
        debug!(tool = tool_name, "connected");
        Ok(client)
    }

    /// Connect, printing `error: ...` and returning an exit code on
    /// failure rather than a `Result` every subcommand would otherwise
    /// have to unwrap the same way.
    pub async fn connect_or_exit(self) -> Result<Client, i32> {
        self.connect().await.map_err(|e| {
            warn!(tool = self.tool_name(), error = %e, "connect failed");
            eprintln!("error: {e}");
            1
        })
    }
}

/// Shared by every subcommand that talks to exactly one daemon.
#[derive(Debug, clap::Args)]
pub struct ToolArgs {
    /// Which daemon to connect to.
    #[arg(long, value_enum, env = "PANELOOP_TOOL", default_value = "terminal")]
    pub tool: Tool,
}
