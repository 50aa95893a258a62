//! Structured logging setup and connection lifecycle events

pub mod config;
pub mod structured;

pub use config::{init_logging, log_shutdown_info, log_startup_info, LoggingConfig};
