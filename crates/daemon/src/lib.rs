// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

//! Terminal Pane Controller daemon library: tmux attachment, per-pane
//! state, the collector accept loop, and the RPC method surface. `main.rs`
//! is a thin CLI wrapper around [`server::run`] plus
//! [`paneloop_core::lifecycle`] start/stop/status.

pub mod autoresolve;
pub mod collector;
pub mod config;
pub mod events;
pub mod methods;
pub mod server;
pub mod target;
pub mod tmux;
