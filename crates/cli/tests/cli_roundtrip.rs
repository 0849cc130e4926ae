// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! End-to-end check that each subcommand's RPC round trip reaches a fake
//! in-process daemon over the real socket layout, mirroring the host
//! repository's preference for in-process client/server pairs over mocks.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;

use paneloop_cli::tool::{Tool, ToolArgs};
use paneloop_cli::{cleanup, execute, ls, ping, queue};
use paneloop_core::rpc::Dispatcher;

async fn serve(listener: UnixListener, dispatcher: Arc<Dispatcher<()>>) {
    loop {
        let Ok((stream, _)) = listener.accept().await else { return };
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let response = dispatcher.dispatch_line((), line.as_bytes()).await;
                if write_half.write_all(&response).await.is_err() {
                    return;
                }
            }
        });
    }
}

/// One test function, one `XDG_RUNTIME_DIR` mutation: both the success
/// and no-daemon-running paths are exercised here rather than in separate
/// `#[tokio::test]` functions, since tests in the same binary run on
/// different threads and a second function racing the same env var would
/// be flaky.
#[tokio::test]
async fn subcommands_round_trip_through_a_fake_daemon() {
    let dir = tempfile::tempdir().expect("tmpdir");
    std::env::set_var("XDG_RUNTIME_DIR", dir.path());

    let tool_name = Tool::Terminal.tool_name();
    let socket_dir = dir.path().join(tool_name);
    std::fs::create_dir_all(&socket_dir).expect("mkdir");

    let mut dispatcher: Dispatcher<()> = Dispatcher::new();
    dispatcher.register("ping", |_ctx, _params| async { Ok(serde_json::json!({"pong": true})) });
    dispatcher.register("ls", |_ctx, _params| async { Ok(serde_json::json!({"targets": [], "count": 0})) });
    dispatcher.register("execute", |_ctx, _params| async {
        Ok(serde_json::json!({"status": "watching", "action_id": "abc12345"}))
    });
    dispatcher.register("get_queue", |_ctx, _params| async {
        Ok(serde_json::json!({"pending": [], "resolved_count": 0}))
    });
    dispatcher.register("cleanup", |_ctx, _params| async { Ok(serde_json::json!({"removed": []})) });

    let listener = UnixListener::bind(socket_dir.join("rpc.sock")).expect("bind");
    let server = tokio::spawn(serve(listener, Arc::new(dispatcher)));

    let tool = Tool::Terminal;
    assert_eq!(ping::run(ping::PingArgs { tool: ToolArgs { tool } }).await, 0);
    assert_eq!(ls::run(ls::LsArgs { tool: ToolArgs { tool } }).await, 0);
    assert_eq!(
        execute::run(execute::ExecuteArgs {
            tool: ToolArgs { tool },
            target: "%1".to_owned(),
            command: "echo hi".to_owned(),
            client_pane: None,
        })
        .await,
        0
    );
    assert_eq!(queue::run(queue::QueueArgs { tool: ToolArgs { tool } }).await, 0);
    assert_eq!(cleanup::run(cleanup::CleanupArgs { tool: ToolArgs { tool } }).await, 0);

    server.abort();

    // No daemon registered for the browser tool under the same runtime
    // dir: connecting should fail cleanly rather than hang or panic.
    let code = ping::run(ping::PingArgs { tool: ToolArgs { tool: Tool::Browser } }).await;
    assert_eq!(code, 1);
}
