// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! `paneloop execute` — run a command against a pane or target
//! (`execute`/`send` in the core RPC table).

use crate::output::emit;
use crate::tool::ToolArgs;

#[derive(Debug, clap::Args)]
pub struct ExecuteArgs {
    #[command(flatten)]
    pub tool: ToolArgs,

    /// Pane id (terminal) or target id (browser).
    pub target: String,

    /// Shell command text (terminal) or bare CDP method name (browser).
    pub command: String,

    /// Pane id to echo back to a collaborating client; terminal-only.
    #[arg(long)]
    pub client_pane: Option<String>,
}

pub async fn run(args: ExecuteArgs) -> i32 {
    let client = match args.tool.tool.connect_or_exit().await {
        Ok(c) => c,
        Err(code) => return code,
    };
    let params = serde_json::json!({
        "target": args.target,
        "command": args.command,
        "client_pane": args.client_pane,
    });
    emit(client.call("execute", params).await)
}
