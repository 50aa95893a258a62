//! RFC 6455 protocol core
//!
//! Framing, the opening handshake, message reassembly, the per-connection
//! actor, and the registry of open connections.

pub mod assembler;
pub mod connection;
pub mod frame;
pub mod handler;
pub mod handshake;
pub mod registry;
pub mod types;

// Re-export main types
pub use assembler::{AssemblyError, MessageAssembler};
pub use connection::{ConnectionHandle, ConnectionMetadata, ConnectionStats};
pub use frame::{apply_mask, Decoded, Frame, FrameCodec, FrameError, Opcode, MAX_CONTROL_PAYLOAD};
pub use handler::{ApplicationError, CallbackResult, Callbacks, WebSocketHandler};
pub use handshake::{
    attempt, compute_accept_key, find_header_end, rejection_response, HandshakeError,
    HandshakeOutcome, HandshakeRequest,
};
pub use registry::{BroadcastResult, CloseAllResult, ConnectionRegistry, RegistryStats};
pub use types::{
    close_code, CloseFrame, ConnectionId, ConnectionState, DisconnectReason, WebSocketError,
    WebSocketMessage, WebSocketResult,
};
