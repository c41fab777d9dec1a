// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-connection I/O engine.
//!
//! Each accepted socket gets a reader task and a writer task. The reader
//! accumulates bytes in a `BytesMut`, peels off complete frames and routes
//! them to the session; the writer drains an unbounded channel of
//! pre-encoded frames, which is what makes sends from any task arrive in
//! enqueue order. A `CancellationToken` ties the pair together: closing
//! either side (or a `force_close` from business logic) tears down both,
//! after the writer flushes what was already queued.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use fleetd_protocol::frame::{Frame, FrameDecode, MessageType, try_parse};
use fleetd_protocol::messages::{Heartbeat, LoginRequest, PathRequest, TaskReport};

use crate::clock::now_ms;
use crate::session::AgvSession;
use crate::state::SharedState;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Connection identifier, unique for the process lifetime.
pub type ConnId = u64;

/// Session-facing view of one live connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnId,
    peer: SocketAddr,
    tx: mpsc::UnboundedSender<Bytes>,
    cancel: CancellationToken,
    last_activity_ms: Arc<AtomicI64>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queue encoded bytes for the writer task. Sends on a closed or closing
    /// connection are silently dropped.
    pub fn send(&self, bytes: Bytes) {
        if self.cancel.is_cancelled() {
            debug!(conn_id = self.id, "send on closed connection dropped");
            return;
        }
        // A send racing the writer's exit loses the frame, same as above.
        let _ = self.tx.send(bytes);
    }

    /// Tear the connection down from any task. The actual cleanup happens on
    /// the reader task's exit path.
    pub fn force_close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn last_activity_ms(&self) -> i64 {
        self.last_activity_ms.load(Ordering::Relaxed)
    }

    fn touch(&self) {
        self.last_activity_ms.store(now_ms(), Ordering::Relaxed);
    }
}

#[cfg(test)]
impl ConnectionHandle {
    /// Detached handle for session-level unit tests: frames land in the
    /// returned receiver instead of a socket.
    pub(crate) fn test_pair() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            peer: "127.0.0.1:0".parse().unwrap(),
            tx,
            cancel: CancellationToken::new(),
            last_activity_ms: Arc::new(AtomicI64::new(now_ms())),
        };
        (handle, rx)
    }
}

/// Drive one accepted connection to completion.
pub async fn serve_connection(state: SharedState, stream: TcpStream, peer: SocketAddr) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%peer, error = %e, "failed to set TCP_NODELAY");
    }
    let (mut reader, mut writer) = stream.into_split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    let cancel = CancellationToken::new();
    let handle = ConnectionHandle {
        id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
        peer,
        tx,
        cancel: cancel.clone(),
        last_activity_ms: Arc::new(AtomicI64::new(now_ms())),
    };
    let conn_id = handle.id();

    let session = state.sessions.on_new_connection(handle.clone());

    // Writer task: serializes all outbound traffic for this connection.
    let writer_cancel = cancel.clone();
    let writer_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                maybe = rx.recv() => match maybe {
                    Some(bytes) => {
                        if writer.write_all(&bytes).await.is_err() {
                            writer_cancel.cancel();
                            break;
                        }
                    }
                    None => break,
                },

                _ = writer_cancel.cancelled() => {
                    // Flush frames queued before the close was requested so a
                    // terminal response still reaches the peer.
                    while let Ok(bytes) = rx.try_recv() {
                        if writer.write_all(&bytes).await.is_err() {
                            break;
                        }
                    }
                    break;
                }
            }
        }
        let _ = writer.shutdown().await;
    });

    // Reader loop on the current task.
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(conn_id, %peer, "connection cancelled");
                break;
            }

            result = reader.read_buf(&mut buf) => match result {
                Ok(0) => {
                    debug!(conn_id, %peer, "peer closed connection");
                    break;
                }
                Ok(_) => {
                    handle.touch();
                    if !drain_frames(&state, &session, &mut buf) {
                        // Fatal protocol error: close, never resync.
                        break;
                    }
                }
                Err(e) => {
                    warn!(conn_id, %peer, error = %e, "read error");
                    break;
                }
            }
        }
    }

    handle.force_close();
    let _ = writer_task.await;
    state.sessions.on_close(&state.world, conn_id);
}

/// Parse and route every complete frame in `buf`. Returns false on a fatal
/// protocol error.
fn drain_frames(state: &SharedState, session: &Arc<AgvSession>, buf: &mut BytesMut) -> bool {
    loop {
        match try_parse(buf) {
            Ok(FrameDecode::Frame(frame)) => route_frame(state, session, frame),
            Ok(FrameDecode::NeedMore) => return true,
            Err(e) => {
                error!(error = %e, "protocol error, closing connection");
                return false;
            }
        }
    }
}

/// The routing table: message type -> session handler, with the JSON decode
/// step folded in. Malformed payloads are logged and dropped without killing
/// the connection; unknown types are logged and skipped.
fn route_frame(state: &SharedState, session: &Arc<AgvSession>, frame: Frame) {
    let seq = frame.head.seq;
    let msg_type = match frame.message_type() {
        Ok(t) => t,
        Err(_) => {
            warn!(msg_type = frame.head.msg_type, "unknown message type, frame dropped");
            return;
        }
    };

    match msg_type {
        MessageType::LoginReq => match frame.decode::<LoginRequest>() {
            Ok(req) => session.handle_login(state, req, seq),
            Err(e) => error!(error = %e, "malformed LoginReq dropped"),
        },
        MessageType::Heartbeat => match frame.decode::<Heartbeat>() {
            Ok(msg) => session.handle_heartbeat(state, &msg),
            Err(e) => error!(error = %e, "malformed Heartbeat dropped"),
        },
        MessageType::TaskReport => match frame.decode::<TaskReport>() {
            Ok(msg) => session.handle_task_report(state, &msg),
            Err(e) => error!(error = %e, "malformed TaskReport dropped"),
        },
        MessageType::PathReq => match frame.decode::<PathRequest>() {
            Ok(req) => session.handle_path_request(state, req, seq),
            Err(e) => error!(error = %e, "malformed PathReq dropped"),
        },
        MessageType::Unknown
        | MessageType::LoginResp
        | MessageType::TaskRequest
        | MessageType::PathResp => {
            warn!(
                msg_type = msg_type.as_str(),
                "unexpected client-to-server message type, frame dropped"
            );
        }
    }
}
