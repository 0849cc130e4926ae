// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! `paneloop interrupt` — send an interrupt (Ctrl-C, or `Page.stopLoading`
//! for the browser variant) and cancel the target's pending action.

use crate::output::emit;
use crate::tool::ToolArgs;

#[derive(Debug, clap::Args)]
pub struct InterruptArgs {
    #[command(flatten)]
    pub tool: ToolArgs,

    pub target: String,
}

pub async fn run(args: InterruptArgs) -> i32 {
    let client = match args.tool.tool.connect_or_exit().await {
        Ok(c) => c,
        Err(code) => return code,
    };
    emit(client.call("interrupt", serde_json::json!({"target": args.target})).await)
}
