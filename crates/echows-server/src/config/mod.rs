//! Server configuration
//!
//! Provides the WebSocket server settings, loaded from `ECHOWS_*` environment
//! variables through the echows-core configuration contract.

pub mod defaults;
pub mod server_config;

pub use defaults::*;
pub use server_config::*;
