// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! `paneloop status` — poll one action's current state (`get_status`).

use crate::output::emit;
use crate::tool::ToolArgs;

#[derive(Debug, clap::Args)]
pub struct StatusArgs {
    #[command(flatten)]
    pub tool: ToolArgs,

    pub action_id: String,
}

pub async fn run(args: StatusArgs) -> i32 {
    let client = match args.tool.tool.connect_or_exit().await {
        Ok(c) => c,
        Err(code) => return code,
    };
    emit(client.call("get_status", serde_json::json!({"action_id": args.action_id})).await)
}
