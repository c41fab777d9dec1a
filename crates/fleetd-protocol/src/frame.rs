// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire format for TCP stream framing.
//!
//! Each frame on the wire looks like:
//! - 4 bytes: body length (big-endian i32)
//! - 4 bytes: message type (big-endian i32)
//! - 4 bytes: sequence number (big-endian i32)
//! - N bytes: UTF-8 JSON body
//!
//! The incremental decoder ([`try_parse`]) never consumes a partial frame:
//! it either returns [`FrameDecode::NeedMore`], a complete frame, or a fatal
//! protocol error. On a fatal error the input buffer is cleared; the caller
//! must close the connection, there is no resync.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame body size in bytes.
pub const MAX_BODY_LEN: usize = 65535;

/// Frame header size (4 bytes length + 4 bytes type + 4 bytes seq).
pub const HEADER_SIZE: usize = 12;

/// Message types for the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum MessageType {
    /// Reserved / unrecognized
    Unknown = 0,
    /// AGV login request (client -> server)
    LoginReq = 1,
    /// Login response (server -> client)
    LoginResp = 2,
    /// Keep-alive heartbeat (client -> server)
    Heartbeat = 3,
    /// Task dispatch (server -> client)
    TaskRequest = 4,
    /// Task progress / acknowledgment (client -> server)
    TaskReport = 5,
    /// Path planning request (client -> server)
    PathReq = 10,
    /// Path planning response (server -> client)
    PathResp = 11,
}

impl MessageType {
    /// Human-readable name for logging.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Unknown => "UNKNOWN",
            MessageType::LoginReq => "LOGIN_REQ",
            MessageType::LoginResp => "LOGIN_RESP",
            MessageType::Heartbeat => "HEARTBEAT",
            MessageType::TaskRequest => "TASK_REQUEST",
            MessageType::TaskReport => "TASK_REPORT",
            MessageType::PathReq => "PATH_REQ",
            MessageType::PathResp => "PATH_RESP",
        }
    }
}

impl TryFrom<i32> for MessageType {
    type Error = FrameError;

    fn try_from(value: i32) -> Result<Self, <Self as TryFrom<i32>>::Error> {
        match value {
            0 => Ok(MessageType::Unknown),
            1 => Ok(MessageType::LoginReq),
            2 => Ok(MessageType::LoginResp),
            3 => Ok(MessageType::Heartbeat),
            4 => Ok(MessageType::TaskRequest),
            5 => Ok(MessageType::TaskReport),
            10 => Ok(MessageType::PathReq),
            11 => Ok(MessageType::PathResp),
            _ => Err(FrameError::InvalidMessageType(value)),
        }
    }
}

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame body too large: {0} bytes (max: {MAX_BODY_LEN})")]
    BodyTooLarge(usize),

    #[error("invalid frame body length: {0}")]
    InvalidLength(i32),

    #[error("invalid message type: {0}")]
    InvalidMessageType(i32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection closed")]
    ConnectionClosed,
}

/// Frame header: `(bodyLen, type, seq)`, each a big-endian i32 on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgHead {
    pub body_len: i32,
    pub msg_type: i32,
    pub seq: i32,
}

/// A framed message: header plus JSON body.
#[derive(Debug, Clone)]
pub struct Frame {
    pub head: MsgHead,
    pub body: Bytes,
}

/// Result of one incremental decode step.
#[derive(Debug)]
pub enum FrameDecode {
    /// Not enough buffered bytes for a complete frame; wait for more input.
    NeedMore,
    /// One complete frame was consumed from the buffer.
    Frame(Frame),
}

impl Frame {
    /// Create a new frame by serializing `payload` to JSON.
    pub fn new<T: Serialize>(
        msg_type: MessageType,
        seq: i32,
        payload: &T,
    ) -> Result<Self, FrameError> {
        let body = serde_json::to_vec(payload)?;
        if body.len() > MAX_BODY_LEN {
            return Err(FrameError::BodyTooLarge(body.len()));
        }
        Ok(Self {
            head: MsgHead {
                body_len: body.len() as i32,
                msg_type: msg_type as i32,
                seq,
            },
            body: Bytes::from(body),
        })
    }

    /// The frame's message type, if it is one we know.
    pub fn message_type(&self) -> Result<MessageType, FrameError> {
        MessageType::try_from(self.head.msg_type)
    }

    /// Deserialize the JSON body into a payload struct.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, FrameError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Encode the frame to bytes for wire transmission.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.body.len());
        buf.put_i32(self.head.body_len);
        buf.put_i32(self.head.msg_type);
        buf.put_i32(self.head.seq);
        buf.put(self.body.clone());
        buf.freeze()
    }
}

/// Try to decode one frame from the front of `buf`.
///
/// Semantics:
/// - fewer than [`HEADER_SIZE`] buffered bytes: `NeedMore`;
/// - `bodyLen` outside `[0, MAX_BODY_LEN]`: the buffer is cleared and
///   [`FrameError::InvalidLength`] is returned (the connection is beyond
///   recovery);
/// - fewer than `HEADER_SIZE + bodyLen` bytes: `NeedMore`;
/// - otherwise the header and body are consumed and returned.
pub fn try_parse(buf: &mut BytesMut) -> Result<FrameDecode, FrameError> {
    if buf.len() < HEADER_SIZE {
        return Ok(FrameDecode::NeedMore);
    }

    // Peek the length without consuming.
    let body_len = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if body_len < 0 || body_len as usize > MAX_BODY_LEN {
        buf.clear();
        return Err(FrameError::InvalidLength(body_len));
    }

    let body_len_usize = body_len as usize;
    if buf.len() < HEADER_SIZE + body_len_usize {
        return Ok(FrameDecode::NeedMore);
    }

    let mut header = buf.split_to(HEADER_SIZE);
    header.advance(4); // body_len, already peeked
    let msg_type = header.get_i32();
    let seq = header.get_i32();
    let body = buf.split_to(body_len_usize).freeze();

    Ok(FrameDecode::Frame(Frame {
        head: MsgHead {
            body_len,
            msg_type,
            seq,
        },
        body,
    }))
}

/// Write a frame to an async writer.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), FrameError> {
    let encoded = frame.encode();
    writer.write_all(&encoded).await?;
    Ok(())
}

/// Read a frame from an async reader.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, FrameError> {
    let mut header = [0u8; HEADER_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::ConnectionClosed);
        }
        Err(e) => return Err(e.into()),
    }

    let body_len = i32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let msg_type = i32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    let seq = i32::from_be_bytes([header[8], header[9], header[10], header[11]]);

    if body_len < 0 || body_len as usize > MAX_BODY_LEN {
        return Err(FrameError::InvalidLength(body_len));
    }

    let mut body = vec![0u8; body_len as usize];
    reader.read_exact(&mut body).await?;

    Ok(Frame {
        head: MsgHead {
            body_len,
            msg_type,
            seq,
        },
        body: Bytes::from(body),
    })
}
