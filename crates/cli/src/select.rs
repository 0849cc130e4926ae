// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! `paneloop select` — run a command without naming a target; auto-resolves
//! against the lone pane/target if exactly one exists, otherwise parks a
//! `SELECTING_PANE` action (`select_pane`/`select_panes`).

use crate::output::emit;
use crate::tool::ToolArgs;

#[derive(Debug, clap::Args)]
pub struct SelectArgs {
    #[command(flatten)]
    pub tool: ToolArgs,

    pub command: String,
}

pub async fn run(args: SelectArgs) -> i32 {
    let client = match args.tool.tool.connect_or_exit().await {
        Ok(c) => c,
        Err(code) => return code,
    };
    emit(client.call("select_pane", serde_json::json!({"command": args.command})).await)
}
