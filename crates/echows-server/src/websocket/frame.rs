//! WebSocket frame codec according to RFC 6455.
//!
//! # Frame Format (RFC 6455 Section 5.2)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```
//!
//! Decoding is stateless: [`FrameCodec::decode`] looks at the front of a
//! buffer and either returns one complete frame together with the number of
//! bytes it used, or [`Decoded::Incomplete`] without consuming anything. The
//! caller keeps the buffer and retries once more bytes arrive.

use super::types::{close_code, CloseFrame};
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Largest payload a control frame may carry
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// WebSocket frame opcode (4 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    /// Returns true for Close, Ping and Pong
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    /// Returns true for Continuation, Text and Binary
    pub const fn is_data(self) -> bool {
        matches!(self, Self::Continuation | Self::Text | Self::Binary)
    }

    pub fn from_u8(value: u8) -> Result<Self, FrameError> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(FrameError::InvalidOpcode(other)),
        }
    }
}

/// A single WebSocket frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag
    pub fin: bool,
    pub opcode: Opcode,
    /// Whether the frame arrived masked. Payloads are always stored unmasked.
    pub masked: bool,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode,
            masked: false,
            payload: payload.into(),
        }
    }

    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Text, payload)
    }

    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Binary, payload)
    }

    pub fn continuation(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Continuation, payload)
    }

    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Ping, payload)
    }

    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Pong, payload)
    }

    /// Close frame carrying `close`'s status code and reason
    pub fn close(close: &CloseFrame) -> Self {
        Self::new(Opcode::Close, close.to_payload())
    }

    /// Close frame without a status code
    pub fn empty_close() -> Self {
        Self::new(Opcode::Close, Bytes::new())
    }

    /// Set the FIN bit
    pub fn with_fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }
}

/// Outcome of a decode attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame and the number of bytes it occupied
    Frame { frame: Frame, consumed: usize },
    /// The buffer does not yet hold a whole frame; nothing was consumed
    Incomplete,
}

/// Protocol errors raised while decoding frames or close payloads
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("reserved bits set without a negotiated extension")]
    ReservedBitsSet,

    #[error("invalid opcode: 0x{0:X}")]
    InvalidOpcode(u8),

    #[error("control frame payload too large: {0} bytes (max 125)")]
    ControlFrameTooLarge(u64),

    #[error("control frame cannot be fragmented")]
    FragmentedControlFrame,

    #[error("non-minimal length encoding: {len} bytes in a {width}-bit length field")]
    NonMinimalLength { len: u64, width: u8 },

    #[error("64-bit payload length has its most significant bit set")]
    LengthOverflow,

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: u64, max: usize },

    #[error("invalid close payload: {0}")]
    InvalidClosePayload(&'static str),

    #[error("invalid close code: {0}")]
    InvalidCloseCode(u16),
}

impl FrameError {
    /// Status code used when failing a connection because of this error
    pub fn close_code(&self) -> u16 {
        match self {
            Self::PayloadTooLarge { .. } => close_code::MESSAGE_TOO_BIG,
            Self::InvalidOpcode(_) => close_code::UNSUPPORTED_DATA,
            _ => close_code::PROTOCOL_ERROR,
        }
    }
}

/// Frame encoder/decoder
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_payload_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Default maximum payload size (16 MiB)
    pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

    pub fn new() -> Self {
        Self {
            max_payload_size: Self::DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }

    pub fn with_max_payload_size(max_payload_size: usize) -> Self {
        Self { max_payload_size }
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    /// Decode the frame at the front of `src`.
    pub fn decode(&self, src: &[u8]) -> Result<Decoded, FrameError> {
        if src.len() < 2 {
            return Ok(Decoded::Incomplete);
        }

        let first = src[0];
        let second = src[1];

        if first & 0x70 != 0 {
            return Err(FrameError::ReservedBitsSet);
        }

        let fin = first & 0x80 != 0;
        let opcode = Opcode::from_u8(first & 0x0F)?;
        let masked = second & 0x80 != 0;
        let len7 = second & 0x7F;

        if opcode.is_control() {
            if !fin {
                return Err(FrameError::FragmentedControlFrame);
            }
            if usize::from(len7) > MAX_CONTROL_PAYLOAD {
                return Err(FrameError::ControlFrameTooLarge(u64::from(len7)));
            }
        }

        let mut offset = 2;
        let payload_len = match len7 {
            126 => {
                if src.len() < 4 {
                    return Ok(Decoded::Incomplete);
                }
                let len = u64::from(u16::from_be_bytes([src[2], src[3]]));
                if len <= MAX_CONTROL_PAYLOAD as u64 {
                    return Err(FrameError::NonMinimalLength { len, width: 16 });
                }
                offset = 4;
                len
            }
            127 => {
                if src.len() < 10 {
                    return Ok(Decoded::Incomplete);
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&src[2..10]);
                let len = u64::from_be_bytes(raw);
                if len & (1 << 63) != 0 {
                    return Err(FrameError::LengthOverflow);
                }
                if len <= u64::from(u16::MAX) {
                    return Err(FrameError::NonMinimalLength { len, width: 64 });
                }
                offset = 10;
                len
            }
            n => u64::from(n),
        };

        if payload_len > self.max_payload_size as u64 {
            return Err(FrameError::PayloadTooLarge {
                size: payload_len,
                max: self.max_payload_size,
            });
        }

        let mask_key = if masked {
            if src.len() < offset + 4 {
                return Ok(Decoded::Incomplete);
            }
            let mut key = [0u8; 4];
            key.copy_from_slice(&src[offset..offset + 4]);
            offset += 4;
            Some(key)
        } else {
            None
        };

        // Bounded by max_payload_size, so it fits in usize.
        let payload_len = payload_len as usize;
        let end = offset + payload_len;
        if src.len() < end {
            return Ok(Decoded::Incomplete);
        }

        let mut payload = BytesMut::from(&src[offset..end]);
        if let Some(key) = mask_key {
            apply_mask(&mut payload, key);
        }

        Ok(Decoded::Frame {
            frame: Frame {
                fin,
                opcode,
                masked,
                payload: payload.freeze(),
            },
            consumed: end,
        })
    }

    /// Encode a server-to-client frame. Servers never mask.
    pub fn encode(&self, frame: &Frame) -> Bytes {
        encode_frame(frame, None)
    }

    /// Encode a client-to-server frame masked with `key`
    pub fn encode_masked(&self, frame: &Frame, key: [u8; 4]) -> Bytes {
        encode_frame(frame, Some(key))
    }
}

fn encode_frame(frame: &Frame, mask: Option<[u8; 4]>) -> Bytes {
    let len = frame.payload.len();
    let mut buf = BytesMut::with_capacity(len + 14);

    let mut first = frame.opcode as u8;
    if frame.fin {
        first |= 0x80;
    }
    buf.put_u8(first);

    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
    if len <= MAX_CONTROL_PAYLOAD {
        buf.put_u8(mask_bit | len as u8);
    } else if len <= usize::from(u16::MAX) {
        buf.put_u8(mask_bit | 126);
        buf.put_u16(len as u16);
    } else {
        buf.put_u8(mask_bit | 127);
        buf.put_u64(len as u64);
    }

    match mask {
        Some(key) => {
            buf.put_slice(&key);
            let start = buf.len();
            buf.put_slice(&frame.payload);
            apply_mask(&mut buf[start..], key);
        }
        None => buf.put_slice(&frame.payload),
    }

    buf.freeze()
}

/// XOR `buf` with the masking key, cycling the key per byte index
pub fn apply_mask(buf: &mut [u8], key: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}
