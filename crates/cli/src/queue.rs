// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! `paneloop queue` — dump the full pending/resolved-count snapshot
//! (`get_queue`).

use crate::output::emit;
use crate::tool::ToolArgs;

#[derive(Debug, clap::Args)]
pub struct QueueArgs {
    #[command(flatten)]
    pub tool: ToolArgs,
}

pub async fn run(args: QueueArgs) -> i32 {
    let client = match args.tool.tool.connect_or_exit().await {
        Ok(c) => c,
        Err(code) => return code,
    };
    emit(client.call("get_queue", serde_json::json!({})).await)
}
