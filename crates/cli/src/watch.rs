// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! `paneloop watch` — stream a daemon's event socket to stdout, one JSON
//! object per line, until the daemon hangs up.

use crate::tool::ToolArgs;

#[derive(Debug, clap::Args)]
pub struct WatchArgs {
    #[command(flatten)]
    pub tool: ToolArgs,
}

pub async fn run(args: WatchArgs) -> i32 {
    let mut stream = match paneloop_client::Client::subscribe_tool(args.tool.tool.tool_name()).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    };

    loop {
        match stream.next_event().await {
            Ok(Some(event)) => println!("{event}"),
            Ok(None) => return 0,
            Err(e) => {
                eprintln!("error: {e}");
                return 1;
            }
        }
    }
}
