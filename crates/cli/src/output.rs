// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! Shared result-to-exit-code rendering for every subcommand.

use paneloop_core::error::RpcError;

/// Print an RPC result as pretty JSON on success, or `error: ...` on
/// stderr on failure. Returns the process exit code.
pub fn emit(result: Result<serde_json::Value, RpcError>) -> i32 {
    match result {
        Ok(value) => {
            match serde_json::to_string_pretty(&value) {
                Ok(text) => println!("{text}"),
                Err(_) => println!("{value}"),
            }
            0
        }
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    }
}
