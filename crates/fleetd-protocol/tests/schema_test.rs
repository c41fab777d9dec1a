// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire schema tests: JSON field names and enum strings are load-bearing,
//! vehicles from other codebases parse these bodies byte-for-byte.

use fleetd_protocol::messages::{
    ActionType, AgvStatus, Heartbeat, LoginRequest, LoginResponse, PathRequest, PathResponse,
    Point, TaskReport, TaskRequest,
};
use serde_json::{Value, json};

fn to_value<T: serde::Serialize>(v: &T) -> Value {
    serde_json::to_value(v).unwrap()
}

#[test]
fn test_login_request_field_names() {
    let req = LoginRequest {
        agv_id: 101,
        password: "123456".to_string(),
        version: "1.0.0".to_string(),
        initial_pos: Point::new(1, 1),
    };
    assert_eq!(
        to_value(&req),
        json!({
            "agvId": 101,
            "password": "123456",
            "version": "1.0.0",
            "initialPos": {"x": 1, "y": 1}
        })
    );
}

#[test]
fn test_login_response_field_names() {
    let resp = LoginResponse {
        success: true,
        token: "TOKEN_101".to_string(),
        message: "Login OK".to_string(),
    };
    assert_eq!(
        to_value(&resp),
        json!({"success": true, "token": "TOKEN_101", "message": "Login OK"})
    );
}

#[test]
fn test_heartbeat_field_names() {
    let hb = Heartbeat {
        agv_id: 7,
        status: AgvStatus::Moving,
        current_pos: Point::new(3, 4),
        battery: 87.5,
        timestamp: 1700000000000,
    };
    assert_eq!(
        to_value(&hb),
        json!({
            "agvId": 7,
            "status": "MOVING",
            "currentPos": {"x": 3, "y": 4},
            "battery": 87.5,
            "timestamp": 1700000000000i64
        })
    );
}

#[test]
fn test_task_request_field_names() {
    let req = TaskRequest {
        task_id: "T-1700000000000-1".to_string(),
        target_agv_id: -1,
        target_pos: Point::new(10, 0),
        target_act: ActionType::LiftUp,
        priority: 1,
    };
    assert_eq!(
        to_value(&req),
        json!({
            "taskId": "T-1700000000000-1",
            "targetAgvId": -1,
            "targetPos": {"x": 10, "y": 0},
            "targetAct": "LIFT_UP",
            "priority": 1
        })
    );
}

#[test]
fn test_task_report_field_names() {
    let report = TaskReport {
        task_id: "T-1-1".to_string(),
        agv_id: 102,
        status: AgvStatus::Idle,
        current_pos: Point::new(10, 0),
        progress: 1.0,
        ref_seq: 3,
    };
    assert_eq!(
        to_value(&report),
        json!({
            "taskId": "T-1-1",
            "agvId": 102,
            "status": "IDLE",
            "currentPos": {"x": 10, "y": 0},
            "progress": 1.0,
            "refSeq": 3
        })
    );
}

#[test]
fn test_path_request_field_names() {
    let req = PathRequest {
        map_id: 1,
        start: Point::new(1, 1),
        end: Point::new(1, 3),
        allow_replan: true,
    };
    assert_eq!(
        to_value(&req),
        json!({
            "mapId": 1,
            "start": {"x": 1, "y": 1},
            "end": {"x": 1, "y": 3},
            "allowReplan": true
        })
    );
}

#[test]
fn test_path_response_field_names() {
    let resp = PathResponse {
        success: false,
        path_points: vec![],
        fail_reason: "Unreachable or already at target".to_string(),
    };
    assert_eq!(
        to_value(&resp),
        json!({
            "success": false,
            "pathPoints": [],
            "failReason": "Unreachable or already at target"
        })
    );
}

#[test]
fn test_foreign_payload_parses() {
    // A body produced by a non-Rust vehicle stack: extra whitespace, field
    // order shuffled, refSeq omitted.
    let body = r#"{
        "progress": 0.25,
        "currentPos": {"y": 2, "x": 1},
        "status": "MOVING",
        "agvId": 101,
        "taskId": "T-5-9"
    }"#;
    let report: TaskReport = serde_json::from_str(body).unwrap();
    assert_eq!(report.agv_id, 101);
    assert_eq!(report.current_pos, Point::new(1, 2));
    assert_eq!(report.ref_seq, 0);
}
