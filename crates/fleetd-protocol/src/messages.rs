// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Payload schemas carried in frame bodies.
//!
//! Field names on the wire are camelCase and must match the protocol exactly
//! (`agvId`, `initialPos`, `refSeq`, ...). Status and action enums serialize
//! as SCREAMING_SNAKE strings (`IDLE`, `LIFT_UP`, ...).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Vehicle identifier. `-1` means "unassigned" in task requests.
pub type AgvId = i32;

/// One cell on the warehouse grid. Ordering is lexicographic `(x, y)`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Manhattan distance to `other`.
    pub fn manhattan(self, other: Point) -> i32 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Vehicle status as reported over the wire.
///
/// `Unknown` doubles as the answer for offline/unregistered vehicles and as
/// the fallback for status strings this build does not recognize.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgvStatus {
    #[default]
    Idle,
    Moving,
    Paused,
    Error,
    Charging,
    #[serde(other)]
    Unknown,
}

impl AgvStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AgvStatus::Idle => "IDLE",
            AgvStatus::Moving => "MOVING",
            AgvStatus::Paused => "PAUSED",
            AgvStatus::Error => "ERROR",
            AgvStatus::Charging => "CHARGING",
            AgvStatus::Unknown => "UNKNOWN",
        }
    }
}

/// What the vehicle should do once it reaches the task target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    #[default]
    None,
    LiftUp,
    PutDown,
    Charge,
}

// ============================================================================
// Payloads (one per MessageType)
// ============================================================================

/// [`MessageType::LoginReq`](crate::frame::MessageType::LoginReq)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub agv_id: AgvId,
    pub password: String,
    pub version: String,
    pub initial_pos: Point,
}

/// [`MessageType::LoginResp`](crate::frame::MessageType::LoginResp)
///
/// `token` is an opaque credential reserved for reconnect support; today's
/// sessions are purely connection-scoped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
    pub message: String,
}

/// [`MessageType::Heartbeat`](crate::frame::MessageType::Heartbeat)
///
/// `timestamp` is the vehicle's send time in epoch milliseconds; comparing it
/// against server receive time gives a cheap latency probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub agv_id: AgvId,
    pub status: AgvStatus,
    pub current_pos: Point,
    pub battery: f64,
    pub timestamp: i64,
}

/// [`MessageType::TaskRequest`](crate::frame::MessageType::TaskRequest)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub task_id: String,
    /// `-1` while the task is unassigned.
    pub target_agv_id: AgvId,
    pub target_pos: Point,
    pub target_act: ActionType,
    pub priority: i32,
}

/// [`MessageType::TaskReport`](crate::frame::MessageType::TaskReport)
///
/// A report with `ref_seq > 0` acknowledges the server-originated
/// `TaskRequest` that carried that seq; unsolicited progress reports leave it
/// at the default 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReport {
    pub task_id: String,
    pub agv_id: AgvId,
    pub status: AgvStatus,
    pub current_pos: Point,
    /// 0.0 - 1.0
    pub progress: f64,
    #[serde(default)]
    pub ref_seq: i32,
}

/// [`MessageType::PathReq`](crate::frame::MessageType::PathReq)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathRequest {
    /// Reserved for multi-map deployments; single-map servers ignore it.
    pub map_id: i32,
    pub start: Point,
    pub end: Point,
    pub allow_replan: bool,
}

/// [`MessageType::PathResp`](crate::frame::MessageType::PathResp)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathResponse {
    pub success: bool,
    pub path_points: Vec<Point>,
    pub fail_reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_ordering_is_lexicographic() {
        assert!(Point::new(1, 9) < Point::new(2, 0));
        assert!(Point::new(1, 1) < Point::new(1, 2));
        assert_eq!(Point::new(3, 4), Point::new(3, 4));
    }

    #[test]
    fn test_point_manhattan() {
        assert_eq!(Point::new(1, 1).manhattan(Point::new(8, 8)), 14);
        assert_eq!(Point::new(5, 5).manhattan(Point::new(5, 5)), 0);
        assert_eq!(Point::new(-2, 3).manhattan(Point::new(2, -3)), 10);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(serde_json::to_string(&AgvStatus::Idle).unwrap(), "\"IDLE\"");
        assert_eq!(
            serde_json::to_string(&AgvStatus::Charging).unwrap(),
            "\"CHARGING\""
        );
        let parsed: AgvStatus = serde_json::from_str("\"MOVING\"").unwrap();
        assert_eq!(parsed, AgvStatus::Moving);
    }

    #[test]
    fn test_unknown_status_string_falls_back() {
        let parsed: AgvStatus = serde_json::from_str("\"TELEPORTING\"").unwrap();
        assert_eq!(parsed, AgvStatus::Unknown);
    }

    #[test]
    fn test_action_strings() {
        assert_eq!(
            serde_json::to_string(&ActionType::LiftUp).unwrap(),
            "\"LIFT_UP\""
        );
        let parsed: ActionType = serde_json::from_str("\"PUT_DOWN\"").unwrap();
        assert_eq!(parsed, ActionType::PutDown);
    }

    #[test]
    fn test_report_ref_seq_defaults_to_zero() {
        let json = r#"{
            "taskId": "T-1-1",
            "agvId": 101,
            "status": "MOVING",
            "currentPos": {"x": 1, "y": 2},
            "progress": 0.5
        }"#;
        let report: TaskReport = serde_json::from_str(json).unwrap();
        assert_eq!(report.ref_seq, 0);
        assert_eq!(report.agv_id, 101);
    }
}
