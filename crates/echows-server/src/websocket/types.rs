//! Shared WebSocket types: connection identity, messages, close frames,
//! connection state and errors.

use super::frame::FrameError;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for WebSocket connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A complete application message, reassembled from one or more data frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebSocketMessage {
    /// Text message (always valid UTF-8)
    Text(String),
    /// Binary message
    Binary(Vec<u8>),
}

impl WebSocketMessage {
    pub fn text<T: Into<String>>(content: T) -> Self {
        Self::Text(content.into())
    }

    pub fn binary<T: Into<Vec<u8>>>(data: T) -> Self {
        Self::Binary(data.into())
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    /// Text content, if this is a text message
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for WebSocketMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => write!(f, "{}", text),
            Self::Binary(data) => write!(f, "<{} bytes>", data.len()),
        }
    }
}

/// Close status codes from RFC 6455 section 7.4.1
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const PROTOCOL_ERROR: u16 = 1002;
    pub const UNSUPPORTED_DATA: u16 = 1003;
    pub const INVALID_PAYLOAD: u16 = 1007;
    pub const POLICY_VIOLATION: u16 = 1008;
    pub const MESSAGE_TOO_BIG: u16 = 1009;

    /// Whether `code` may appear on the wire in a close frame.
    ///
    /// 1004-1006 and 1015 are reserved for local use, 1012-2999 are unassigned.
    pub fn is_valid(code: u16) -> bool {
        matches!(code, 1000..=1003 | 1007..=1011 | 3000..=4999)
    }
}

/// Close frame information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

impl CloseFrame {
    pub fn new<T: Into<String>>(code: u16, reason: T) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Normal closure with an empty reason
    pub fn normal() -> Self {
        Self::new(close_code::NORMAL, "")
    }

    /// Parse a close frame payload.
    ///
    /// An empty payload carries no status and yields `None`. Otherwise the
    /// payload must hold a valid 2-byte status code followed by UTF-8 text.
    pub fn from_payload(payload: &[u8]) -> Result<Option<Self>, FrameError> {
        match payload.len() {
            0 => Ok(None),
            1 => Err(FrameError::InvalidClosePayload("truncated status code")),
            _ => {
                let code = u16::from_be_bytes([payload[0], payload[1]]);
                if !close_code::is_valid(code) {
                    return Err(FrameError::InvalidCloseCode(code));
                }
                let reason = std::str::from_utf8(&payload[2..])
                    .map_err(|_| FrameError::InvalidClosePayload("reason is not valid UTF-8"))?;
                Ok(Some(Self::new(code, reason)))
            }
        }
    }

    /// Serialize into a close frame payload
    pub fn to_payload(&self) -> Bytes {
        // Control payloads are capped at 125 bytes, 2 of which hold the code.
        let mut reason_len = self.reason.len().min(123);
        while !self.reason.is_char_boundary(reason_len) {
            reason_len -= 1;
        }

        let mut buf = BytesMut::with_capacity(2 + reason_len);
        buf.put_u16(self.code);
        buf.put_slice(&self.reason.as_bytes()[..reason_len]);
        buf.freeze()
    }
}

impl fmt::Display for CloseFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} ({})", self.code, self.reason)
        }
    }
}

/// Connection state tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Waiting for the HTTP upgrade request
    Handshaking,
    /// Handshake completed, frames are flowing
    Open,
    /// A close frame has been sent or received
    Closing,
    /// Socket is done
    Closed,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Why a connection left the registry, passed to `on_disconnect`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer started the close handshake; its close frame, if it had a status
    Remote(Option<CloseFrame>),
    /// The server started the close handshake with this frame
    Local(CloseFrame),
    /// The peer broke the protocol and the connection was failed with `code`
    ProtocolViolation { code: u16, message: String },
    /// The socket reached EOF without a close handshake
    ConnectionLost,
    /// Socket-level failure
    Io(String),
}

impl DisconnectReason {
    /// Whether the close handshake completed in either direction
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Remote(_) | Self::Local(_))
    }

    /// Close code associated with the disconnect, if one was exchanged
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::Remote(frame) => frame.as_ref().map(|f| f.code),
            Self::Local(frame) => Some(frame.code),
            Self::ProtocolViolation { code, .. } => Some(*code),
            Self::ConnectionLost | Self::Io(_) => None,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(Some(frame)) => write!(f, "closed by peer: {}", frame),
            Self::Remote(None) => write!(f, "closed by peer"),
            Self::Local(frame) => write!(f, "closed by server: {}", frame),
            Self::ProtocolViolation { code, message } => {
                write!(f, "protocol violation ({}): {}", code, message)
            }
            Self::ConnectionLost => write!(f, "connection lost"),
            Self::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

/// WebSocket connection errors
#[derive(Debug, Error)]
pub enum WebSocketError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] FrameError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Send queue full")]
    SendQueueFull,

    #[error("Connection not found: {0}")]
    ConnectionNotFound(ConnectionId),
}

/// Result type for WebSocket operations
pub type WebSocketResult<T> = Result<T, WebSocketError>;
