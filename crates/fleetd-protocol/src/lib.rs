// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fleetd Protocol - TCP + JSON communication layer
//!
//! This crate provides the wire protocol spoken between AGVs (automated
//! guided vehicles) and the fleetd fleet-control server.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     fleetd-protocol                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RPC Layer: Request/Response + seq/refSeq correlation       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Serialization: JSON (serde_json)                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Transport: TCP, length-prefixed frames                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Wire format
//!
//! Every message is one frame:
//!
//! ```text
//! [bodyLen: i32 BE][type: i32 BE][seq: i32 BE][body: bodyLen bytes of UTF-8 JSON]
//! ```
//!
//! `bodyLen` must be in `[0, 65535]`; anything else is a fatal protocol
//! error and the connection is closed without resync.
//!
//! # Seq semantics
//!
//! - Client-originated requests (`LoginReq`, `PathReq`): the client assigns
//!   `seq` and the server echoes it in the immediate response.
//! - Server-originated requests (`TaskRequest`): the server assigns `seq`;
//!   the vehicle acknowledges by setting `refSeq` on its next `TaskReport`.
//!   Subsequent progress reports carry `refSeq = 0`.
//!
//! # Usage
//!
//! ```ignore
//! use fleetd_protocol::client::{FleetClient, FleetClientConfig};
//! use fleetd_protocol::messages::Point;
//!
//! let mut client = FleetClient::connect(FleetClientConfig {
//!     server_addr: "127.0.0.1:8888".parse().unwrap(),
//!     ..Default::default()
//! }).await?;
//!
//! let resp = client.login(101, "123456", Point { x: 1, y: 1 }).await?;
//! assert!(resp.success);
//! ```

pub mod client;
pub mod frame;
pub mod messages;

// Re-export main types
pub use client::{ClientError, FleetClient, FleetClientConfig};
pub use frame::{Frame, FrameDecode, FrameError, MessageType, MsgHead};
pub use messages::{
    ActionType, AgvId, AgvStatus, Heartbeat, LoginRequest, LoginResponse, PathRequest,
    PathResponse, Point, TaskReport, TaskRequest,
};
