// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-connection protocol state machine.
//!
//! A session is anonymous until a successful login, logged-in until the
//! connection dies, and never comes back: a vehicle that reconnects gets a
//! fresh session and preempts the stale one. Business handlers either run
//! inline on the connection's reader task (login, heartbeat, task report) or
//! are offloaded to the compute pool with a strong handle keeping the
//! session alive (path planning).
//!
//! Server-originated task dispatches are correlated RPCs: each carries a
//! session-monotonic wrapping seq, and the vehicle's next `TaskReport` with
//! `refSeq` set resolves it. A 1 Hz scan fails whatever the vehicle never
//! acknowledged.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info, warn};

use fleetd_protocol::frame::{Frame, MessageType};
use fleetd_protocol::messages::{
    AgvId, Heartbeat, LoginRequest, LoginResponse, PathRequest, PathResponse, TaskReport,
    TaskRequest,
};

use crate::clock::now_ms;
use crate::connection::{ConnId, ConnectionHandle};
use crate::state::SharedState;

/// Stub credential every vehicle shares until real authentication lands.
const MOCK_PASSWORD: &str = "123456";

/// Outcome callback for a server-originated RPC: `(success, reason)`.
pub type RpcCallback = Box<dyn FnOnce(bool, &str) + Send + 'static>;

struct PendingRequest {
    send_time_ms: i64,
    cb: RpcCallback,
}

pub struct AgvSession {
    conn: ConnectionHandle,
    /// `-1` until login.
    agv_id: AtomicI32,
    logged_in: AtomicBool,
    next_seq: AtomicI32,
    /// Outstanding server-originated requests, keyed by seq. Inserted from
    /// compute-pool tasks, resolved from the reader task, so it needs its
    /// own lock.
    pending: Mutex<HashMap<i32, PendingRequest>>,
}

impl AgvSession {
    pub fn new(conn: ConnectionHandle) -> Self {
        Self {
            conn,
            agv_id: AtomicI32::new(-1),
            logged_in: AtomicBool::new(false),
            next_seq: AtomicI32::new(0),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> AgvId {
        self.agv_id.load(Ordering::Relaxed)
    }

    pub fn is_login(&self) -> bool {
        self.logged_in.load(Ordering::Relaxed)
    }

    pub fn conn_id(&self) -> ConnId {
        self.conn.id()
    }

    pub fn conn(&self) -> &ConnectionHandle {
        &self.conn
    }

    pub fn force_close(&self) {
        self.conn.force_close();
    }

    fn next_seq(&self) -> i32 {
        self.next_seq.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Frame and enqueue a payload. Send failures on a dying connection are
    /// dropped silently; encode failures are a server bug worth a log line.
    fn send<T: Serialize>(&self, msg_type: MessageType, payload: &T, seq: i32) {
        match Frame::new(msg_type, seq, payload) {
            Ok(frame) => self.conn.send(frame.encode()),
            Err(e) => error!(msg_type = msg_type.as_str(), error = %e, "failed to encode frame"),
        }
    }

    // ========================================================================
    // Inbound handlers (called from the connection's reader task)
    // ========================================================================

    /// Login: authenticate, preempt any older session for the same uid,
    /// register, reply.
    pub fn handle_login(self: &Arc<Self>, state: &SharedState, req: LoginRequest, seq: i32) {
        if self.is_login() {
            warn!(agv_id = self.id(), "duplicate login request ignored");
            return;
        }

        if req.password != MOCK_PASSWORD {
            warn!(agv_id = req.agv_id, "login failed: wrong password");
            self.send(
                MessageType::LoginResp,
                &LoginResponse {
                    success: false,
                    token: String::new(),
                    message: "Invalid Password".to_string(),
                },
                seq,
            );
            self.conn.force_close();
            return;
        }

        // Newest login wins: a stale session for this uid gets kicked and
        // cleans itself up through the normal close path.
        if state.sessions.get_session(req.agv_id).is_some() {
            warn!(
                agv_id = req.agv_id,
                "AGV logged in from a new connection, kicking old session"
            );
            state.sessions.kick_agv(req.agv_id);
        }

        self.agv_id.store(req.agv_id, Ordering::Relaxed);
        self.logged_in.store(true, Ordering::Relaxed);

        state.sessions.register_agv_id(req.agv_id, Arc::clone(self));
        state.world.on_agv_login(&req);

        self.send(
            MessageType::LoginResp,
            &LoginResponse {
                success: true,
                token: format!("TOKEN_{}", req.agv_id),
                message: "Login OK".to_string(),
            },
            seq,
        );
        info!(agv_id = req.agv_id, conn_id = self.conn_id(), "AGV logged in");
    }

    /// Heartbeat: light enough to run inline on the reader task.
    pub fn handle_heartbeat(&self, state: &SharedState, msg: &Heartbeat) {
        if !self.is_login() {
            return;
        }
        if msg.agv_id != self.id() {
            warn!(
                session_agv = self.id(),
                reported_agv = msg.agv_id,
                "heartbeat id mismatch, dropped"
            );
            return;
        }
        state.world.on_heartbeat(msg);
    }

    /// Task report: resolves a pending RPC when `refSeq` is set, then feeds
    /// the world picture and the task pipeline.
    pub fn handle_task_report(&self, state: &SharedState, msg: &TaskReport) {
        if !self.is_login() {
            return;
        }

        if msg.ref_seq > 0 {
            self.handle_ack(msg.ref_seq);
        }

        state.world.on_task_report(msg);
        state.tasks.on_task_report(state, msg);
    }

    /// Path planning is CPU-heavy: offload to the compute pool. The closure
    /// holds a strong session handle, so a session preempted mid-computation
    /// still has somewhere to (no-op) send its reply.
    pub fn handle_path_request(self: &Arc<Self>, state: &SharedState, req: PathRequest, seq: i32) {
        if !self.is_login() {
            return;
        }

        let session = Arc::clone(self);
        let world_state = Arc::clone(state);
        state.workers.spawn("path-plan", move || {
            let path = world_state
                .world
                .plan_path(session.id(), req.start, req.end);

            info!(
                agv_id = session.id(),
                start = %req.start,
                end = %req.end,
                steps = path.len(),
                "path planned"
            );

            let resp = PathResponse {
                success: !path.is_empty(),
                fail_reason: if path.is_empty() {
                    "Unreachable or already at target".to_string()
                } else {
                    String::new()
                },
                path_points: path,
            };
            session.send(MessageType::PathResp, &resp, seq);
        });
    }

    // ========================================================================
    // Server-originated RPC
    // ========================================================================

    /// Push a task to the vehicle. Returns false without side effects when
    /// the session cannot carry the request.
    ///
    /// The seq handed to the wire is recorded with `cb`; either a matching
    /// ack ([`Self::handle_ack`]) or the timeout scan resolves it, exactly
    /// once.
    pub fn dispatch_task(&self, req: &TaskRequest, cb: RpcCallback) -> bool {
        if !self.is_login() {
            return false;
        }

        let seq = self.next_seq();
        {
            let mut pending = self.pending.lock();
            pending.insert(
                seq,
                PendingRequest {
                    send_time_ms: now_ms(),
                    cb,
                },
            );
        }

        self.send(MessageType::TaskRequest, req, seq);
        true
    }

    /// Resolve the pending request matching `reply_seq`, if any. Unmatched
    /// acks are ignored: the request either already succeeded or already
    /// timed out.
    fn handle_ack(&self, reply_seq: i32) {
        let pending = { self.pending.lock().remove(&reply_seq) };
        if let Some(entry) = pending {
            info!(seq = reply_seq, "RPC confirmed");
            (entry.cb)(true, "");
        }
    }

    /// Fail every pending request older than `timeout_ms`. Callbacks run
    /// after the lock is released; they may re-enter the task manager.
    pub fn check_rpc_timeout(&self, timeout_ms: i64) {
        let now = now_ms();
        let mut expired: Vec<(i32, RpcCallback)> = Vec::new();
        {
            let mut pending = self.pending.lock();
            let stale: Vec<i32> = pending
                .iter()
                .filter(|(_, p)| now - p.send_time_ms > timeout_ms)
                .map(|(&seq, _)| seq)
                .collect();
            for seq in stale {
                if let Some(p) = pending.remove(&seq) {
                    expired.push((seq, p.cb));
                }
            }
        }

        for (seq, cb) in expired {
            warn!(seq, agv_id = self.id(), "RPC timed out");
            cb(false, "Timeout");
        }
    }

    /// Number of unresolved server-originated requests.
    pub fn pending_rpc_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Drop for AgvSession {
    fn drop(&mut self) {
        info!(agv_id = self.id(), "session destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use bytes::BytesMut;
    use fleetd_protocol::frame::{FrameDecode, try_parse};
    use fleetd_protocol::messages::{ActionType, Point};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn logged_in_session() -> (Arc<AgvSession>, UnboundedReceiver<bytes::Bytes>) {
        let (conn, rx) = ConnectionHandle::test_pair();
        let session = Arc::new(AgvSession::new(conn));
        session.agv_id.store(101, Ordering::Relaxed);
        session.logged_in.store(true, Ordering::Relaxed);
        (session, rx)
    }

    fn task_request() -> TaskRequest {
        TaskRequest {
            task_id: "T-1-1".to_string(),
            target_agv_id: 101,
            target_pos: Point::new(5, 5),
            target_act: ActionType::None,
            priority: 1,
        }
    }

    fn counting_cb(counter: &Arc<AtomicUsize>, expect_success: bool) -> RpcCallback {
        let counter = Arc::clone(counter);
        Box::new(move |success, reason| {
            assert_eq!(success, expect_success, "unexpected RPC outcome: {reason}");
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_dispatch_refused_before_login() {
        let (conn, _rx) = ConnectionHandle::test_pair();
        let session = AgvSession::new(conn);
        let fired = Arc::new(AtomicUsize::new(0));
        assert!(!session.dispatch_task(&task_request(), counting_cb(&fired, true)));
        assert_eq!(session.pending_rpc_count(), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dispatch_frames_and_records_pending() {
        let (session, mut rx) = logged_in_session();
        let fired = Arc::new(AtomicUsize::new(0));

        assert!(session.dispatch_task(&task_request(), counting_cb(&fired, true)));
        assert_eq!(session.pending_rpc_count(), 1);

        // The enqueued bytes are one well-formed TaskRequest frame with the
        // session-assigned seq.
        let mut buf = BytesMut::from(rx.try_recv().unwrap().as_ref());
        let frame = match try_parse(&mut buf).unwrap() {
            FrameDecode::Frame(f) => f,
            FrameDecode::NeedMore => panic!("partial frame enqueued"),
        };
        assert_eq!(frame.head.msg_type, MessageType::TaskRequest as i32);
        assert_eq!(frame.head.seq, 1);
        let req: TaskRequest = frame.decode().unwrap();
        assert_eq!(req.task_id, "T-1-1");
    }

    #[test]
    fn test_ack_resolves_pending_exactly_once() {
        let (session, _rx) = logged_in_session();
        let fired = Arc::new(AtomicUsize::new(0));

        session.dispatch_task(&task_request(), counting_cb(&fired, true));

        session.handle_ack(1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(session.pending_rpc_count(), 0);

        // Duplicate and unmatched acks are no-ops.
        session.handle_ack(1);
        session.handle_ack(99);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_timeout_scan_fails_stale_requests_once() {
        let (session, _rx) = logged_in_session();
        let fired = Arc::new(AtomicUsize::new(0));

        session.dispatch_task(&task_request(), counting_cb(&fired, false));
        // Backdate the request so a 100ms budget has long expired.
        {
            let mut pending = session.pending.lock();
            for entry in pending.values_mut() {
                entry.send_time_ms -= 10_000;
            }
        }

        session.check_rpc_timeout(100);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(session.pending_rpc_count(), 0);

        // A later ack for the already-failed seq does nothing.
        session.handle_ack(1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_timeout_scan_spares_fresh_requests() {
        let (session, _rx) = logged_in_session();
        let fired = Arc::new(AtomicUsize::new(0));

        session.dispatch_task(&task_request(), counting_cb(&fired, false));
        session.check_rpc_timeout(5_000);

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(session.pending_rpc_count(), 1);
    }

    #[test]
    fn test_seqs_are_session_monotonic() {
        let (session, mut rx) = logged_in_session();
        for expected in 1..=5 {
            session.dispatch_task(&task_request(), Box::new(|_, _| {}));
            let mut buf = BytesMut::from(rx.try_recv().unwrap().as_ref());
            let frame = match try_parse(&mut buf).unwrap() {
                FrameDecode::Frame(f) => f,
                FrameDecode::NeedMore => panic!("partial frame"),
            };
            assert_eq!(frame.head.seq, expected);
        }
    }
}
