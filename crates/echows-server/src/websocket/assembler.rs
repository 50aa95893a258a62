//! Reassembly of fragmented data frames into whole messages

use super::frame::{Frame, Opcode};
use super::types::{close_code, WebSocketMessage};
use bytes::BytesMut;
use thiserror::Error;

/// Reasons a message cannot be assembled
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyError {
    #[error("continuation frame without a message in progress")]
    UnexpectedContinuation,

    #[error("new data frame while a fragmented message is in progress")]
    UnfinishedMessage,

    #[error("message of {size} bytes exceeds the {max} byte limit")]
    MessageTooLarge { size: usize, max: usize },

    #[error("text message is not valid UTF-8")]
    InvalidUtf8,

    #[error("{0:?} is not a data frame")]
    NotDataFrame(Opcode),
}

impl AssemblyError {
    /// Status code used when failing the connection
    pub fn close_code(&self) -> u16 {
        match self {
            Self::MessageTooLarge { .. } => close_code::MESSAGE_TOO_BIG,
            Self::InvalidUtf8 => close_code::INVALID_PAYLOAD,
            _ => close_code::PROTOCOL_ERROR,
        }
    }
}

struct PartialMessage {
    opcode: Opcode,
    data: BytesMut,
}

/// Collects data frames until a FIN frame completes the message
pub struct MessageAssembler {
    max_message_size: usize,
    partial: Option<PartialMessage>,
}

impl MessageAssembler {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            partial: None,
        }
    }

    /// Whether a fragmented message is waiting for more frames
    pub fn in_progress(&self) -> bool {
        self.partial.is_some()
    }

    /// Feed one data frame; returns the message once it is complete
    pub fn push(&mut self, frame: Frame) -> Result<Option<WebSocketMessage>, AssemblyError> {
        match frame.opcode {
            Opcode::Text | Opcode::Binary => self.push_start(frame),
            Opcode::Continuation => self.push_continuation(frame),
            other => Err(AssemblyError::NotDataFrame(other)),
        }
    }

    fn push_start(&mut self, frame: Frame) -> Result<Option<WebSocketMessage>, AssemblyError> {
        if self.partial.is_some() {
            return Err(AssemblyError::UnfinishedMessage);
        }
        self.check_size(frame.payload.len())?;

        let mut data = BytesMut::with_capacity(frame.payload.len());
        data.extend_from_slice(&frame.payload);

        if frame.fin {
            return finish(frame.opcode, data).map(Some);
        }

        self.partial = Some(PartialMessage {
            opcode: frame.opcode,
            data,
        });
        Ok(None)
    }

    fn push_continuation(&mut self, frame: Frame) -> Result<Option<WebSocketMessage>, AssemblyError> {
        let Some(partial) = self.partial.as_mut() else {
            return Err(AssemblyError::UnexpectedContinuation);
        };

        let total = partial.data.len() + frame.payload.len();
        if total > self.max_message_size {
            self.partial = None;
            return Err(AssemblyError::MessageTooLarge {
                size: total,
                max: self.max_message_size,
            });
        }
        partial.data.extend_from_slice(&frame.payload);

        if !frame.fin {
            return Ok(None);
        }

        match self.partial.take() {
            Some(done) => finish(done.opcode, done.data).map(Some),
            None => Err(AssemblyError::UnexpectedContinuation),
        }
    }

    fn check_size(&self, size: usize) -> Result<(), AssemblyError> {
        if size > self.max_message_size {
            return Err(AssemblyError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        Ok(())
    }
}

fn finish(opcode: Opcode, data: BytesMut) -> Result<WebSocketMessage, AssemblyError> {
    match opcode {
        Opcode::Text => String::from_utf8(data.to_vec())
            .map(WebSocketMessage::Text)
            .map_err(|_| AssemblyError::InvalidUtf8),
        _ => Ok(WebSocketMessage::Binary(data.to_vec())),
    }
}
