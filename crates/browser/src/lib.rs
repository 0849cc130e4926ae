// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

//! Browser Debug Gateway daemon library: CDP session transport, per-target
//! lifecycle tracking, the protocol event log, and the RPC method
//! surface. `main.rs` is a thin CLI wrapper around [`server::run`] plus
//! [`paneloop_core::lifecycle`] start/stop/status.

pub mod config;
pub mod events;
pub mod eventlog;
pub mod lifecycle_manager;
pub mod methods;
pub mod server;
pub mod target;
pub mod transport;
