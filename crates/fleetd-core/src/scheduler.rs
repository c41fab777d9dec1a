// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scheduling strategies: which idle vehicle takes which pending task.
//!
//! Strategies run on the compute pool against snapshots, so a `dispatch`
//! implementation may be arbitrarily heavy without stalling I/O. The task
//! manager re-validates every decision under its own lock before committing
//! (the scheduler's view of the world is already stale by the time the
//! decisions come back).

use std::collections::HashSet;

use fleetd_protocol::messages::{AgvId, TaskRequest};

use crate::world::AgvInfo;

/// One assignment proposed by a strategy.
#[derive(Debug, Clone)]
pub struct Decision {
    pub task_id: String,
    pub agv_id: AgvId,
    /// Manhattan distance from the vehicle to the task target.
    pub distance: i32,
}

/// Strategy contract: every returned `agv_id` is unique within the batch and
/// drawn from `candidates`; every `task_id` is drawn from `tasks`.
pub trait Scheduler: Send + Sync {
    fn name(&self) -> &'static str;
    fn dispatch(&self, tasks: &[TaskRequest], candidates: &[AgvInfo]) -> Vec<Decision>;
}

/// Default strategy: for each task in input order, the nearest candidate not
/// yet claimed in this batch; ties go to the lowest uid.
#[derive(Debug, Default)]
pub struct GreedyScheduler;

impl Scheduler for GreedyScheduler {
    fn name(&self) -> &'static str {
        "Greedy"
    }

    fn dispatch(&self, tasks: &[TaskRequest], candidates: &[AgvInfo]) -> Vec<Decision> {
        // Ascending uid makes the strict `<` comparison below resolve
        // distance ties toward the lowest uid.
        let mut order: Vec<&AgvInfo> = candidates.iter().collect();
        order.sort_by_key(|agv| agv.uid);

        let mut claimed: HashSet<AgvId> = HashSet::new();
        let mut decisions = Vec::new();

        for task in tasks {
            let mut best: Option<(AgvId, i32)> = None;
            for agv in &order {
                if claimed.contains(&agv.uid) {
                    continue;
                }
                let distance = agv.current_pos.manhattan(task.target_pos);
                if best.map(|(_, d)| distance < d).unwrap_or(true) {
                    best = Some((agv.uid, distance));
                }
            }
            if let Some((agv_id, distance)) = best {
                claimed.insert(agv_id);
                decisions.push(Decision {
                    task_id: task.task_id.clone(),
                    agv_id,
                    distance,
                });
            }
        }

        decisions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetd_protocol::messages::{ActionType, AgvStatus, Point};

    fn agv(uid: AgvId, pos: Point) -> AgvInfo {
        AgvInfo {
            uid,
            version: "1.0.0".to_string(),
            current_pos: pos,
            battery: 100.0,
            status: AgvStatus::Idle,
            current_task_id: String::new(),
            task_progress: 0.0,
            last_heartbeat_ms: 0,
        }
    }

    fn task(id: &str, target: Point) -> TaskRequest {
        TaskRequest {
            task_id: id.to_string(),
            target_agv_id: -1,
            target_pos: target,
            target_act: ActionType::None,
            priority: 1,
        }
    }

    #[test]
    fn test_picks_nearest() {
        let tasks = vec![task("T-1", Point::new(10, 0))];
        let candidates = vec![agv(101, Point::new(1, 1)), agv(102, Point::new(8, 1))];

        let decisions = GreedyScheduler.dispatch(&tasks, &candidates);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].agv_id, 102);
        assert_eq!(decisions[0].distance, 3);
    }

    #[test]
    fn test_no_vehicle_claimed_twice() {
        let tasks = vec![
            task("T-1", Point::new(2, 2)),
            task("T-2", Point::new(2, 3)),
            task("T-3", Point::new(3, 2)),
        ];
        let candidates = vec![agv(101, Point::new(2, 2)), agv(102, Point::new(2, 3))];

        let decisions = GreedyScheduler.dispatch(&tasks, &candidates);
        // Two vehicles, three tasks: exactly two assignments.
        assert_eq!(decisions.len(), 2);
        let ids: HashSet<AgvId> = decisions.iter().map(|d| d.agv_id).collect();
        assert_eq!(ids.len(), decisions.len());
        for d in &decisions {
            assert!(candidates.iter().any(|c| c.uid == d.agv_id));
            assert!(tasks.iter().any(|t| t.task_id == d.task_id));
        }
    }

    #[test]
    fn test_tie_goes_to_lowest_uid() {
        let tasks = vec![task("T-1", Point::new(5, 5))];
        // Same distance, shuffled input order.
        let candidates = vec![agv(202, Point::new(5, 7)), agv(201, Point::new(7, 5))];

        let decisions = GreedyScheduler.dispatch(&tasks, &candidates);
        assert_eq!(decisions[0].agv_id, 201);
    }

    #[test]
    fn test_tasks_in_input_order_get_first_pick() {
        let tasks = vec![
            task("T-near", Point::new(1, 2)),
            task("T-far", Point::new(1, 3)),
        ];
        let candidates = vec![agv(101, Point::new(1, 1))];

        let decisions = GreedyScheduler.dispatch(&tasks, &candidates);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].task_id, "T-near");
    }

    #[test]
    fn test_empty_inputs() {
        assert!(GreedyScheduler.dispatch(&[], &[agv(1, Point::new(0, 0))]).is_empty());
        assert!(
            GreedyScheduler
                .dispatch(&[task("T-1", Point::new(0, 0))], &[])
                .is_empty()
        );
    }
}
