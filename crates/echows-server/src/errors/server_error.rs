//! Process-level server errors
//!
//! Connection-level failures never reach this type: they are handled inside
//! the connection actor. Only errors that stop the server surface here.

use echows_core::ConfigError;
use std::io;
use thiserror::Error;

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Resource exhaustion while accepting connections: {0}")]
    ResourceExhausted(#[source] io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Logging initialization failed: {message}")]
    Logging { message: String },
}

impl ServerError {
    /// Create a bind error
    pub fn bind<T: Into<String>>(addr: T, source: io::Error) -> Self {
        ServerError::Bind {
            addr: addr.into(),
            source,
        }
    }

    /// Create a logging error
    pub fn logging<T: Into<String>>(message: T) -> Self {
        ServerError::Logging {
            message: message.into(),
        }
    }

    /// Whether this error ended the accept loop
    pub fn is_fatal_accept_error(&self) -> bool {
        matches!(self, ServerError::ResourceExhausted(_))
    }
}

/// `EMFILE`: per-process descriptor limit
const EMFILE: i32 = 24;
/// `ENFILE`: system-wide descriptor limit
const ENFILE: i32 = 23;

/// Whether an `accept` error means the process is out of descriptors or memory.
///
/// Everything else (reset before accept, aborted handshakes, ...) only
/// affects the one socket and the loop keeps going.
pub fn is_resource_exhaustion(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::OutOfMemory {
        return true;
    }
    matches!(err.raw_os_error(), Some(EMFILE) | Some(ENFILE))
}
