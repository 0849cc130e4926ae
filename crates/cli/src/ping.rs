// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! `paneloop ping` — liveness check against a daemon's RPC socket.

use crate::output::emit;
use crate::tool::ToolArgs;

#[derive(Debug, clap::Args)]
pub struct PingArgs {
    #[command(flatten)]
    pub tool: ToolArgs,
}

pub async fn run(args: PingArgs) -> i32 {
    let client = match args.tool.tool.connect_or_exit().await {
        Ok(c) => c,
        Err(code) => return code,
    };
    emit(client.call("ping", serde_json::json!({})).await)
}
