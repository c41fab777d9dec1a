// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fleetd Core - AGV Fleet Control Server
//!
//! Core is responsible for:
//! - Connection engine (accept loop, framed TCP sessions, idle eviction)
//! - Session layer (login/preemption, RPC correlation, timeouts)
//! - World manager (grid map, online-vehicle registry, path planning)
//! - Task manager (pending queue, running map, scheduling, dispatch pipeline)
//!
//! Note: order injection (the WMS driver) and the vehicle simulator live
//! outside this crate; they drive [`task_manager::TaskManager::add_task`] and
//! the `fleetd-protocol` client respectively.

pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod map;
pub mod planner;
pub mod scheduler;
pub mod server;
pub mod session;
pub mod session_manager;
pub mod state;
pub mod task_manager;
pub mod worker;
pub mod world;

pub use config::Config;
pub use error::CoreError;
pub use server::FleetServer;
pub use state::{ServerState, SharedState};
