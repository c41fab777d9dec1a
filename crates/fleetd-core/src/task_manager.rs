// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The dispatcher: order admission, scheduling, assignment and rollback.
//!
//! State is two collections under one mutex: the pending queue (unassigned
//! orders, FIFO, rollbacks cut to the front) and the running map (one task
//! per vehicle). A task is always in exactly one of pending, running, or
//! gone.
//!
//! Dispatch runs in three phases so the mutex is held for microseconds even
//! when the scheduling computation is heavy:
//!
//! 1. snapshot - copy the world picture and, under the lock, the pending
//!    requests and the strategy handle;
//! 2. compute - on the worker pool, filter candidates and let the strategy
//!    propose assignments against the (now stale) snapshots;
//! 3. apply - re-lock and re-validate every decision (vehicle still idle,
//!    vehicle not already running a task, task still unassigned, session
//!    still there), then reserve and send. The reservation makes the
//!    assignment visible to concurrent dispatch rounds before the network
//!    ever sees the frame.
//!
//! Failures after the reserve (refused send, nack, RPC timeout) roll the
//! task back to the front of the pending queue.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{error, info, warn};

use fleetd_protocol::messages::{ActionType, AgvId, AgvStatus, Point, TaskReport, TaskRequest};

use crate::clock::{elapsed_secs, now_ms};
use crate::scheduler::{Decision, GreedyScheduler, Scheduler};
use crate::session::RpcCallback;
use crate::state::SharedState;

/// One order as the dispatcher tracks it.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub request: TaskRequest,
    pub create_time_ms: i64,
    pub status: AgvStatus,
    pub progress: f64,
    pub update_time_ms: i64,
}

impl TaskContext {
    fn new(request: TaskRequest) -> Self {
        let now = now_ms();
        Self {
            request,
            create_time_ms: now,
            status: AgvStatus::Idle,
            progress: 0.0,
            update_time_ms: now,
        }
    }
}

#[derive(Default)]
struct TaskState {
    pending: VecDeque<TaskContext>,
    running: HashMap<AgvId, TaskContext>,
}

pub struct TaskManager {
    state: Mutex<TaskState>,
    scheduler: Mutex<Arc<dyn Scheduler>>,
    task_seq: AtomicU64,
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Log entries accumulated inside the apply phase and emitted after the
/// lock is released.
enum DispatchLog {
    Success {
        task_id: String,
        agv_id: AgvId,
        distance: i32,
    },
    DoubleCheckFailed {
        task_id: String,
        agv_id: AgvId,
        status: AgvStatus,
    },
    SessionLost {
        task_id: String,
        agv_id: AgvId,
    },
    SendRefused {
        task_id: String,
        agv_id: AgvId,
    },
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TaskState::default()),
            scheduler: Mutex::new(Arc::new(GreedyScheduler)),
            task_seq: AtomicU64::new(0),
        }
    }

    /// Swap the scheduling strategy. In-flight dispatch rounds finish on the
    /// handle they snapshotted.
    pub fn set_scheduler(&self, scheduler: Arc<dyn Scheduler>) {
        let name = scheduler.name();
        *self.scheduler.lock() = scheduler;
        info!(scheduler = name, "scheduler switched");
    }

    /// `"T-<epochMillis>-<monotonicSeq>"`: unique across restarts thanks to
    /// the timestamp, readable in logs and dashboards.
    fn generate_task_id(&self) -> String {
        let seq = self.task_seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("T-{}-{}", now_ms(), seq)
    }

    // ========================================================================
    // Order admission
    // ========================================================================

    /// Admit a new order and immediately try to place it.
    pub fn add_task(
        &self,
        state: &SharedState,
        target_pos: Point,
        target_act: ActionType,
    ) -> String {
        let request = TaskRequest {
            task_id: self.generate_task_id(),
            target_agv_id: -1,
            target_pos,
            target_act,
            priority: 1,
        };
        let task_id = request.task_id.clone();
        let task = TaskContext::new(request);

        {
            let mut st = self.state.lock();
            st.pending.push_back(task);
        }

        info!(task_id = %task_id, target = %target_pos, "new task admitted");
        self.try_dispatch(state);
        task_id
    }

    // ========================================================================
    // Dispatch pipeline
    // ========================================================================

    /// Phase 1: snapshots. Called on task arrival, task completion and
    /// rollback-by-error; cheap enough to call speculatively.
    pub fn try_dispatch(&self, state: &SharedState) {
        let agvs = state.world.get_all_agvs();
        if agvs.is_empty() {
            return;
        }

        let (tasks, scheduler) = {
            let st = self.state.lock();
            if st.pending.is_empty() {
                return;
            }
            let tasks: Vec<TaskRequest> =
                st.pending.iter().map(|t| t.request.clone()).collect();
            (tasks, Arc::clone(&self.scheduler.lock()))
        };

        let shared = Arc::clone(state);
        state.workers.spawn("task-dispatch", move || {
            shared
                .tasks
                .execute_dispatch(&shared, &tasks, &agvs, scheduler.as_ref());
        });
    }

    /// Phases 2 and 3, on a worker thread.
    fn execute_dispatch(
        &self,
        state: &SharedState,
        tasks: &[TaskRequest],
        agvs: &[crate::world::AgvInfo],
        scheduler: &dyn Scheduler,
    ) {
        // Candidate filter: physically able to take a task. Occupancy by a
        // running task is a lock-guarded fact checked in the apply phase.
        let candidates: Vec<crate::world::AgvInfo> = agvs
            .iter()
            .filter(|agv| agv.status == AgvStatus::Idle && agv.battery >= 20.0)
            .cloned()
            .collect();

        if candidates.is_empty() {
            warn!(online = agvs.len(), "no candidate AGVs available for dispatch");
            return;
        }

        info!(
            tasks = tasks.len(),
            candidates = candidates.len(),
            scheduler = scheduler.name(),
            "dispatch round"
        );
        let decisions = scheduler.dispatch(tasks, &candidates);
        if decisions.is_empty() {
            return;
        }

        self.apply_decisions(state, decisions);
    }

    /// Phase 3: re-validate and commit under the lock, log outside it.
    fn apply_decisions(&self, state: &SharedState, decisions: Vec<Decision>) {
        let mut logs: Vec<DispatchLog> = Vec::with_capacity(decisions.len());
        {
            let mut st = self.state.lock();
            let mut has_assignment = false;

            for decision in decisions {
                let agv_id = decision.agv_id;

                // Physical double-check: the vehicle may have stopped being
                // idle while the scheduler was thinking.
                let status = state.world.get_agv_status(agv_id);
                if status != AgvStatus::Idle {
                    logs.push(DispatchLog::DoubleCheckFailed {
                        task_id: decision.task_id,
                        agv_id,
                        status,
                    });
                    continue;
                }

                // Logical double-check: a parallel round may have claimed it.
                if st.running.contains_key(&agv_id) {
                    continue;
                }

                // Task freshness: still pending, still unassigned.
                let Some(idx) = st
                    .pending
                    .iter()
                    .position(|t| t.request.task_id == decision.task_id)
                else {
                    continue;
                };
                if st.pending[idx].request.target_agv_id != -1 {
                    continue;
                }

                let Some(session) = state.sessions.get_session(agv_id) else {
                    logs.push(DispatchLog::SessionLost {
                        task_id: decision.task_id,
                        agv_id,
                    });
                    continue;
                };

                // Reserve first, then send: the in-memory claim must beat
                // the network so no other round hands this vehicle a task.
                st.pending[idx].request.target_agv_id = agv_id;
                let reserved = st.pending[idx].clone();
                st.running.insert(agv_id, reserved);

                let cb_state = Arc::clone(state);
                let cb_task_id = decision.task_id.clone();
                let cb: RpcCallback = Box::new(move |success, reason| {
                    cb_state
                        .tasks
                        .on_dispatch_result(agv_id, &cb_task_id, success, reason);
                });

                if !session.dispatch_task(&st.pending[idx].request, cb) {
                    // Undo the reservation; nothing reached the wire.
                    st.running.remove(&agv_id);
                    st.pending[idx].request.target_agv_id = -1;
                    logs.push(DispatchLog::SendRefused {
                        task_id: decision.task_id,
                        agv_id,
                    });
                    continue;
                }

                logs.push(DispatchLog::Success {
                    task_id: decision.task_id,
                    agv_id,
                    distance: decision.distance,
                });
                has_assignment = true;
            }

            if has_assignment {
                st.pending.retain(|t| t.request.target_agv_id == -1);
            }
        }

        for log in logs {
            match log {
                DispatchLog::Success {
                    task_id,
                    agv_id,
                    distance,
                } => info!(%task_id, agv_id, distance, "task dispatched"),
                DispatchLog::DoubleCheckFailed {
                    task_id,
                    agv_id,
                    status,
                } => warn!(
                    %task_id,
                    agv_id,
                    status = status.as_str(),
                    "dispatch skipped: AGV status changed during compute"
                ),
                DispatchLog::SessionLost { task_id, agv_id } => {
                    warn!(%task_id, agv_id, "dispatch skipped: session lost")
                }
                DispatchLog::SendRefused { task_id, agv_id } => {
                    error!(%task_id, agv_id, "dispatch refused by session, reservation undone")
                }
            }
        }
    }

    // ========================================================================
    // RPC results and vehicle reports
    // ========================================================================

    /// Called from the session RPC machinery on ack or timeout.
    ///
    /// On failure the task returns to the front of the pending queue, but
    /// re-dispatch is not triggered from here: the failed vehicle is usually
    /// still the best candidate and would be picked again immediately. The
    /// next external event (new order, report, completion) re-runs the
    /// pipeline.
    pub fn on_dispatch_result(&self, agv_id: AgvId, task_id: &str, success: bool, reason: &str) {
        if success {
            info!(agv_id, %task_id, "dispatch confirmed by AGV");
            return;
        }

        warn!(agv_id, %task_id, reason, "dispatch failed, rolling back");
        let rolled_back = {
            let mut st = self.state.lock();
            // The vehicle may have moved on to a different task since.
            let matches = st
                .running
                .get(&agv_id)
                .map(|t| t.request.task_id == task_id)
                .unwrap_or(false);
            if matches {
                if let Some(mut task) = st.running.remove(&agv_id) {
                    task.request.target_agv_id = -1;
                    task.status = AgvStatus::Idle;
                    task.progress = 0.0;
                    st.pending.push_front(task);
                }
                true
            } else {
                false
            }
        };

        if rolled_back {
            warn!(agv_id, %task_id, "rollback complete, task re-queued at front");
        } else {
            error!(agv_id, %task_id, "rollback failed: task not found or mismatched");
        }
    }

    /// Vehicle progress report against the running map.
    pub fn on_task_report(&self, state: &SharedState, msg: &TaskReport) {
        enum Outcome {
            NotFound,
            Rejected,
            Progress { elapsed: f64 },
            Completed { elapsed: f64 },
        }

        let now = now_ms();
        let outcome = {
            let mut st = self.state.lock();
            match st.running.remove(&msg.agv_id) {
                Some(mut task) if task.request.task_id == msg.task_id => {
                    if msg.status == AgvStatus::Error {
                        // The vehicle rejected or failed the task: back to
                        // the front of the queue for another vehicle.
                        task.request.target_agv_id = -1;
                        task.status = AgvStatus::Idle;
                        task.progress = 0.0;
                        st.pending.push_front(task);
                        Outcome::Rejected
                    } else {
                        task.status = msg.status;
                        task.progress = msg.progress;
                        task.update_time_ms = now;
                        let elapsed = elapsed_secs(task.create_time_ms, now);
                        if msg.status == AgvStatus::Idle && msg.progress >= 1.0 {
                            Outcome::Completed { elapsed }
                        } else {
                            st.running.insert(msg.agv_id, task);
                            Outcome::Progress { elapsed }
                        }
                    }
                }
                Some(task) => {
                    // Report for some other task; put the current one back.
                    st.running.insert(msg.agv_id, task);
                    Outcome::NotFound
                }
                None => Outcome::NotFound,
            }
        };

        match outcome {
            Outcome::NotFound => {
                warn!(
                    agv_id = msg.agv_id,
                    task_id = %msg.task_id,
                    "report ignored: no matching running task"
                );
            }
            Outcome::Rejected => {
                warn!(
                    agv_id = msg.agv_id,
                    task_id = %msg.task_id,
                    "task rejected by AGV, rolled back to queue front"
                );
                self.try_dispatch(state);
            }
            Outcome::Progress { elapsed } => {
                info!(
                    agv_id = msg.agv_id,
                    task_id = %msg.task_id,
                    progress = msg.progress,
                    elapsed_s = elapsed,
                    "task progress"
                );
            }
            Outcome::Completed { elapsed } => {
                info!(
                    agv_id = msg.agv_id,
                    task_id = %msg.task_id,
                    elapsed_s = elapsed,
                    "task completed"
                );
                // A vehicle just went idle; see if the queue has work for it.
                self.try_dispatch(state);
            }
        }
    }

    // ========================================================================
    // Introspection (monitoring and tests)
    // ========================================================================

    /// Snapshot of the pending queue, front first.
    pub fn pending_tasks(&self) -> Vec<TaskRequest> {
        self.state
            .lock()
            .pending
            .iter()
            .map(|t| t.request.clone())
            .collect()
    }

    /// Snapshot of the running map.
    pub fn running_tasks(&self) -> HashMap<AgvId, TaskRequest> {
        self.state
            .lock()
            .running
            .iter()
            .map(|(&id, t)| (id, t.request.clone()))
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn running_count(&self) -> usize {
        self.state.lock().running.len()
    }
}
