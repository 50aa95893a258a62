//! Structured events for the connection lifecycle
//!
//! Each helper emits one JSON line under an `echows_server::*` target so
//! connection history can be filtered independently of frame-level debug
//! output.

use crate::websocket::{ConnectionId, ConnectionStats, DisconnectReason};
use serde_json::json;
use std::net::SocketAddr;
use tracing::{info, warn};

/// A client completed the upgrade handshake
pub fn log_connection_opened(
    id: ConnectionId,
    remote_addr: Option<SocketAddr>,
    path: &str,
    user_agent: Option<&str>,
) {
    let mut log_data = json!({
        "event": "connection_opened",
        "connection_id": id.to_string(),
        "path": path,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    if let Some(addr) = remote_addr {
        log_data["remote_addr"] = json!(addr.to_string());
    }
    if let Some(ua) = user_agent {
        log_data["user_agent"] = json!(ua);
    }

    info!(target: "echows_server::connection", "{}", log_data);
}

/// An open connection left the registry
pub fn log_connection_closed(id: ConnectionId, reason: &DisconnectReason, stats: &ConnectionStats) {
    let log_data = json!({
        "event": "connection_closed",
        "connection_id": id.to_string(),
        "reason": reason.to_string(),
        "close_code": reason.close_code(),
        "clean": reason.is_clean(),
        "messages_sent": stats.messages_sent,
        "messages_received": stats.messages_received,
        "bytes_sent": stats.bytes_sent,
        "bytes_received": stats.bytes_received,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    if reason.is_clean() {
        info!(target: "echows_server::connection", "{}", log_data);
    } else {
        warn!(target: "echows_server::connection", "{}", log_data);
    }
}

/// An upgrade request was answered with an HTTP error
pub fn log_handshake_rejected(remote_addr: Option<SocketAddr>, status: u16, reason: &str) {
    let log_data = json!({
        "event": "handshake_rejected",
        "remote_addr": remote_addr.map(|addr| addr.to_string()),
        "status": status,
        "reason": reason,
    });

    if status >= 500 {
        warn!(target: "echows_server::handshake", "{}", log_data);
    } else {
        info!(target: "echows_server::handshake", "{}", log_data);
    }
}

/// A user callback returned an error or panicked
pub fn log_application_error(id: ConnectionId, callback: &str, error: &str) {
    let log_data = json!({
        "event": "application_error",
        "connection_id": id.to_string(),
        "callback": callback,
        "error_message": error,
    });

    tracing::error!(target: "echows_server::application", "{}", log_data);
}
