// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! TCP client helpers for connecting to fleetd.
//!
//! This is the surface the vehicle simulator drives, and what the E2E tests
//! use to act as an AGV. One client owns one long-lived connection.

use std::net::SocketAddr;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::debug;

use crate::frame::{Frame, FrameError, MessageType, read_frame, write_frame};
use crate::messages::{
    AgvStatus, Heartbeat, LoginRequest, LoginResponse, PathRequest, PathResponse, Point,
    TaskReport,
};

/// Errors that can occur in the TCP client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connect error: {0}")]
    Connect(std::io::Error),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {0}ms waiting for a frame")]
    Timeout(u64),

    #[error("unexpected message type: {0}")]
    UnexpectedType(i32),
}

/// Configuration for the TCP client.
#[derive(Debug, Clone)]
pub struct FleetClientConfig {
    /// Server address to connect to
    pub server_addr: SocketAddr,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Default receive timeout in milliseconds
    pub recv_timeout_ms: u64,
}

impl Default for FleetClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8888".parse().unwrap(),
            connect_timeout_ms: 5_000,
            recv_timeout_ms: 5_000,
        }
    }
}

/// TCP client for communicating with the fleetd server.
pub struct FleetClient {
    stream: TcpStream,
    config: FleetClientConfig,
    next_seq: i32,
}

impl FleetClient {
    /// Connect to the server.
    pub async fn connect(config: FleetClientConfig) -> Result<Self, ClientError> {
        let timeout = Duration::from_millis(config.connect_timeout_ms);
        let stream = tokio::time::timeout(timeout, TcpStream::connect(config.server_addr))
            .await
            .map_err(|_| ClientError::Timeout(config.connect_timeout_ms))?
            .map_err(ClientError::Connect)?;
        stream.set_nodelay(true).map_err(ClientError::Connect)?;

        debug!(addr = %config.server_addr, "connected to fleetd");
        Ok(Self {
            stream,
            config,
            next_seq: 0,
        })
    }

    /// Connect to a local server on the given port.
    pub async fn localhost(port: u16) -> Result<Self, ClientError> {
        Self::connect(FleetClientConfig {
            server_addr: SocketAddr::from(([127, 0, 0, 1], port)),
            ..Default::default()
        })
        .await
    }

    fn alloc_seq(&mut self) -> i32 {
        self.next_seq = self.next_seq.wrapping_add(1);
        self.next_seq
    }

    /// Send a payload with a freshly assigned client-side seq; returns the seq.
    pub async fn send<T: Serialize>(
        &mut self,
        msg_type: MessageType,
        payload: &T,
    ) -> Result<i32, ClientError> {
        let seq = self.alloc_seq();
        self.send_with_seq(msg_type, seq, payload).await?;
        Ok(seq)
    }

    /// Send a payload with an explicit seq (for acks and replay tests).
    pub async fn send_with_seq<T: Serialize>(
        &mut self,
        msg_type: MessageType,
        seq: i32,
        payload: &T,
    ) -> Result<(), ClientError> {
        let frame = Frame::new(msg_type, seq, payload)?;
        write_frame(&mut self.stream, &frame).await?;
        Ok(())
    }

    /// Push raw pre-encoded bytes onto the wire. Test hook for malformed input.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        use tokio::io::AsyncWriteExt;
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    /// Receive the next frame, bounded by the configured receive timeout.
    pub async fn recv(&mut self) -> Result<Frame, ClientError> {
        let timeout_ms = self.config.recv_timeout_ms;
        self.recv_within(timeout_ms).await
    }

    /// Receive the next frame within `timeout_ms`.
    pub async fn recv_within(&mut self, timeout_ms: u64) -> Result<Frame, ClientError> {
        let timeout = Duration::from_millis(timeout_ms);
        let frame = tokio::time::timeout(timeout, read_frame(&mut self.stream))
            .await
            .map_err(|_| ClientError::Timeout(timeout_ms))??;
        Ok(frame)
    }

    /// Receive a frame and decode it, checking the message type.
    async fn recv_expect<T: serde::de::DeserializeOwned>(
        &mut self,
        expected: MessageType,
    ) -> Result<(T, i32), ClientError> {
        let frame = self.recv().await?;
        if frame.head.msg_type != expected as i32 {
            return Err(ClientError::UnexpectedType(frame.head.msg_type));
        }
        Ok((frame.decode()?, frame.head.seq))
    }

    // ========================================================================
    // Typed calls
    // ========================================================================

    /// Log in and wait for the response.
    pub async fn login(
        &mut self,
        agv_id: i32,
        password: &str,
        initial_pos: Point,
    ) -> Result<LoginResponse, ClientError> {
        let req = LoginRequest {
            agv_id,
            password: password.to_string(),
            version: "1.0.0".to_string(),
            initial_pos,
        };
        self.send(MessageType::LoginReq, &req).await?;
        let (resp, _seq) = self.recv_expect::<LoginResponse>(MessageType::LoginResp).await?;
        Ok(resp)
    }

    /// Fire-and-forget heartbeat.
    pub async fn send_heartbeat(
        &mut self,
        agv_id: i32,
        status: AgvStatus,
        current_pos: Point,
        battery: f64,
    ) -> Result<(), ClientError> {
        let hb = Heartbeat {
            agv_id,
            status,
            current_pos,
            battery,
            timestamp: now_ms(),
        };
        self.send(MessageType::Heartbeat, &hb).await?;
        Ok(())
    }

    /// Request a path and wait for the response. Returns the response and
    /// verifies the echoed seq matches the request.
    pub async fn request_path(
        &mut self,
        start: Point,
        end: Point,
    ) -> Result<PathResponse, ClientError> {
        let req = PathRequest {
            map_id: 1,
            start,
            end,
            allow_replan: true,
        };
        let sent_seq = self.send(MessageType::PathReq, &req).await?;
        let (resp, seq) = self.recv_expect::<PathResponse>(MessageType::PathResp).await?;
        debug_assert_eq!(seq, sent_seq);
        Ok(resp)
    }

    /// Fire-and-forget task report (set `ref_seq` to acknowledge a dispatch).
    pub async fn send_report(&mut self, report: &TaskReport) -> Result<(), ClientError> {
        self.send(MessageType::TaskReport, report).await?;
        Ok(())
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
