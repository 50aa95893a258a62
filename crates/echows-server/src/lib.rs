//! # echows-server
//!
//! RFC 6455 WebSocket server built directly on tokio's TCP listener.
//!
//! This crate provides:
//! - Frame codec and opening handshake
//! - One actor task per connection with bounded outbound queues
//! - A shared connection registry with send, broadcast and close
//! - Closure or trait based callbacks (`on_connect`, `on_message`, `on_disconnect`)
//! - Graceful shutdown on Ctrl+C/SIGTERM
//! - Environment driven configuration and structured logging

// Core modules
pub mod config;
pub mod errors;
pub mod logging;
pub mod server;
pub mod websocket;

// Main server API
pub use config::{WebSocketDefaults, WebSocketServerConfig};
pub use errors::{ServerError, ServerResult};
pub use server::{shutdown_signal, ServerHandle, WebSocketServer};

// Re-export protocol and callback types
pub use websocket::{
    close_code, ApplicationError, BroadcastResult, CallbackResult, Callbacks, CloseAllResult,
    CloseFrame, ConnectionId, ConnectionMetadata, ConnectionState, ConnectionStats,
    DisconnectReason, Frame, FrameCodec, FrameError, Opcode, RegistryStats, WebSocketError,
    WebSocketHandler, WebSocketMessage, WebSocketResult,
};

// Re-export logging entry points
pub use logging::{init_logging, log_shutdown_info, log_startup_info, LoggingConfig};

// Configuration contract from echows-core
pub use echows_core::{AppConfigTrait, Environment};
