// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared server state: the wiring between the managers.
//!
//! One `Arc<ServerState>` travels through every handler. Components hold no
//! references to each other; anything that needs a collaborator receives the
//! shared state, which keeps construction cycle-free.

use std::sync::Arc;

use crate::config::Config;
use crate::map::GridMap;
use crate::session_manager::SessionManager;
use crate::task_manager::TaskManager;
use crate::worker::WorkerPool;
use crate::world::WorldManager;

pub struct ServerState {
    pub config: Config,
    pub world: WorldManager,
    pub sessions: SessionManager,
    pub tasks: TaskManager,
    pub workers: WorkerPool,
}

pub type SharedState = Arc<ServerState>;

impl ServerState {
    pub fn new(config: Config, map: GridMap) -> SharedState {
        let workers = WorkerPool::new(config.worker_threads);
        Arc::new(Self {
            world: WorldManager::new(map),
            sessions: SessionManager::new(),
            tasks: TaskManager::new(),
            workers,
            config,
        })
    }
}
