// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The authoritative world picture: the static grid plus every online
//! vehicle.
//!
//! Concurrency discipline is read-mostly: the map is immutable after load
//! and read lock-free; the vehicle registry sits behind a reader-writer lock
//! whose writers are the login/heartbeat/report/logout paths and whose
//! readers are planners, occupancy checks and snapshots. Planning never
//! holds the lock over the computation - it snapshots the planner handle and
//! runs against the immutable map.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use fleetd_protocol::messages::{AgvId, AgvStatus, Heartbeat, LoginRequest, Point, TaskReport};

use crate::clock::now_ms;
use crate::map::GridMap;
use crate::planner::{AStarPlanner, PathPlanner};

/// Server-side mirror of one vehicle.
///
/// Created on login, mutated only by the world manager, destroyed on logout.
#[derive(Debug, Clone)]
pub struct AgvInfo {
    pub uid: AgvId,
    pub version: String,
    pub current_pos: Point,
    /// 0.0 - 100.0
    pub battery: f64,
    pub status: AgvStatus,
    /// Empty when the vehicle is idle.
    pub current_task_id: String,
    /// 0.0 - 1.0
    pub task_progress: f64,
    /// Monotonically non-decreasing per vehicle.
    pub last_heartbeat_ms: i64,
}

pub struct WorldManager {
    map: GridMap,
    agvs: RwLock<HashMap<AgvId, AgvInfo>>,
    planner: RwLock<Arc<dyn PathPlanner>>,
}

impl WorldManager {
    pub fn new(map: GridMap) -> Self {
        Self {
            map,
            agvs: RwLock::new(HashMap::new()),
            planner: RwLock::new(Arc::new(AStarPlanner)),
        }
    }

    /// The static grid. Immutable for the process lifetime.
    pub fn map(&self) -> &GridMap {
        &self.map
    }

    /// Swap the planning strategy. In-flight plans keep the old strategy
    /// alive through their snapshot handle until they finish.
    pub fn set_planner(&self, planner: Arc<dyn PathPlanner>) {
        let name = planner.name();
        *self.planner.write() = planner;
        info!(planner = name, "path planner switched");
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Plan a route for `agv_id` from `start` to `end`.
    ///
    /// Static obstacle endpoints and a start cell currently occupied by
    /// another vehicle fail fast with an empty path; the occupancy check is
    /// advisory only (the vehicle replans if the world moved underneath it).
    pub fn plan_path(&self, agv_id: AgvId, start: Point, end: Point) -> Vec<Point> {
        if self.map.is_obstacle_at(start) || self.map.is_obstacle_at(end) {
            return Vec::new();
        }
        if self.is_occupied(start, agv_id) {
            return Vec::new();
        }

        // Snapshot the strategy handle under the read lock, then compute
        // without any lock held.
        let planner = { Arc::clone(&self.planner.read()) };
        planner.plan(&self.map, start, end)
    }

    /// True iff a vehicle other than `self_id` currently stands on `point`.
    pub fn is_occupied(&self, point: Point, self_id: AgvId) -> bool {
        let agvs = self.agvs.read();
        agvs.iter()
            .any(|(&id, info)| id != self_id && info.current_pos == point)
    }

    /// Status of one vehicle; `Unknown` when it is offline.
    pub fn get_agv_status(&self, agv_id: AgvId) -> AgvStatus {
        self.agvs
            .read()
            .get(&agv_id)
            .map(|info| info.status)
            .unwrap_or(AgvStatus::Unknown)
    }

    /// Copied snapshot of every online vehicle, safe to use after the lock
    /// is gone.
    pub fn get_all_agvs(&self) -> Vec<AgvInfo> {
        let agvs = self.agvs.read();
        agvs.values().cloned().collect()
    }

    pub fn online_count(&self) -> usize {
        self.agvs.read().len()
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Register a vehicle at login. A re-login overwrites the previous entry.
    pub fn on_agv_login(&self, req: &LoginRequest) {
        let info = AgvInfo {
            uid: req.agv_id,
            version: req.version.clone(),
            current_pos: req.initial_pos,
            battery: 100.0,
            status: AgvStatus::Idle,
            current_task_id: String::new(),
            task_progress: 0.0,
            last_heartbeat_ms: now_ms(),
        };
        let pos = info.current_pos;
        {
            let mut agvs = self.agvs.write();
            agvs.insert(info.uid, info);
        }
        info!(agv_id = req.agv_id, pos = %pos, "AGV logged in to world");
    }

    /// Heartbeat: physical state plus liveness stamp.
    pub fn on_heartbeat(&self, msg: &Heartbeat) {
        let now = now_ms();
        let mut unknown = false;
        {
            let mut agvs = self.agvs.write();
            match agvs.get_mut(&msg.agv_id) {
                Some(info) => {
                    info.current_pos = msg.current_pos;
                    info.battery = msg.battery;
                    info.status = msg.status;
                    info.last_heartbeat_ms = info.last_heartbeat_ms.max(now);
                }
                None => unknown = true,
            }
        }
        if unknown {
            warn!(agv_id = msg.agv_id, "heartbeat from unknown AGV");
        }
    }

    /// Task report: logical state plus position, and it counts as liveness.
    pub fn on_task_report(&self, msg: &TaskReport) {
        let now = now_ms();
        let mut agvs = self.agvs.write();
        if let Some(info) = agvs.get_mut(&msg.agv_id) {
            info.status = msg.status;
            info.current_task_id = msg.task_id.clone();
            info.task_progress = msg.progress;
            info.current_pos = msg.current_pos;
            info.last_heartbeat_ms = info.last_heartbeat_ms.max(now);
        }
    }

    pub fn on_agv_logout(&self, agv_id: AgvId) {
        {
            let mut agvs = self.agvs.write();
            agvs.remove(&agv_id);
        }
        info!(agv_id, "AGV logged out of world");
    }
}
