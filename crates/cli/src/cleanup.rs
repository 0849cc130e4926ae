// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! `paneloop cleanup` — sweep dead panes/targets from the daemon's state.

use crate::output::emit;
use crate::tool::ToolArgs;

#[derive(Debug, clap::Args)]
pub struct CleanupArgs {
    #[command(flatten)]
    pub tool: ToolArgs,
}

pub async fn run(args: CleanupArgs) -> i32 {
    let client = match args.tool.tool.connect_or_exit().await {
        Ok(c) => c,
        Err(code) => return code,
    };
    emit(client.call("cleanup", serde_json::json!({})).await)
}
