// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! `paneloop resolve` — advance a pending action per its state machine.

use crate::output::emit;
use crate::tool::ToolArgs;

#[derive(Debug, clap::Args)]
pub struct ResolveArgs {
    #[command(flatten)]
    pub tool: ToolArgs,

    /// Id returned by `execute`/`select`.
    pub action_id: String,

    /// JSON object to attach as the action's result (default `{}`).
    #[arg(long)]
    pub result: Option<String>,
}

pub async fn run(args: ResolveArgs) -> i32 {
    let client = match args.tool.tool.connect_or_exit().await {
        Ok(c) => c,
        Err(code) => return code,
    };
    let result = match args.result {
        Some(raw) => match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                eprintln!("error: invalid JSON for --result: {e}");
                return 2;
            }
        },
        None => serde_json::json!({}),
    };
    let params = serde_json::json!({"action_id": args.action_id, "result": result});
    emit(client.call("resolve", params).await)
}
