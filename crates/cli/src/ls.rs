// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! `paneloop ls` — list every pane/target the daemon currently tracks.

use crate::output::emit;
use crate::tool::ToolArgs;

#[derive(Debug, clap::Args)]
pub struct LsArgs {
    #[command(flatten)]
    pub tool: ToolArgs,
}

pub async fn run(args: LsArgs) -> i32 {
    let client = match args.tool.tool.connect_or_exit().await {
        Ok(c) => c,
        Err(code) => return code,
    };
    emit(client.call("ls", serde_json::json!({})).await)
}
