//! Connection registry for managing open WebSocket connections

use super::connection::{encode_message, ConnectionHandle, ConnectionMetadata};
use super::types::{
    close_code, CloseFrame, ConnectionId, ConnectionState, WebSocketError, WebSocketMessage,
    WebSocketResult,
};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Open connections keyed by id.
///
/// The lock is only held for map operations. Fan-out works on a cloned
/// snapshot of the handles, so nothing that can reach user code ever runs
/// under it.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<ConnectionId, ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection that finished its handshake
    pub(crate) async fn insert(&self, handle: ConnectionHandle) {
        let id = handle.id();
        let total = {
            let mut connections = self.connections.write().await;
            connections.insert(id, handle);
            connections.len()
        };
        debug!(connection_id = %id, total, "connection registered");
    }

    /// Remove a connection; returns its handle if it was registered
    pub(crate) async fn remove(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        let removed = self.connections.write().await.remove(&id);
        if removed.is_some() {
            debug!(connection_id = %id, "connection deregistered");
        }
        removed
    }

    pub async fn get(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.connections.read().await.get(&id).cloned()
    }

    /// Cloned handles of every registered connection
    pub async fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.connections.read().await.values().cloned().collect()
    }

    pub async fn ids(&self) -> Vec<ConnectionId> {
        self.connections.read().await.keys().copied().collect()
    }

    pub async fn count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn metadata(&self, id: ConnectionId) -> Option<ConnectionMetadata> {
        let handle = self.get(id).await?;
        Some(handle.metadata().await)
    }

    /// Queue a message for one connection
    pub async fn send(&self, id: ConnectionId, message: WebSocketMessage) -> WebSocketResult<()> {
        let handle = self
            .get(id)
            .await
            .ok_or(WebSocketError::ConnectionNotFound(id))?;
        handle.send(message).await
    }

    /// Queue a message for every open connection.
    ///
    /// The frame is encoded once. A failed send never aborts the fan-out;
    /// connections whose queue is full are asked to close with 1008.
    pub async fn broadcast(&self, message: WebSocketMessage) -> BroadcastResult {
        self.broadcast_frame(encode_message(message)).await
    }

    pub(crate) async fn broadcast_frame(&self, frame: Bytes) -> BroadcastResult {
        let mut result = BroadcastResult::default();

        for handle in self.snapshot().await {
            if !handle.is_open().await {
                result.inactive_connections.push(handle.id());
                continue;
            }

            match handle.try_enqueue(frame.clone()) {
                Ok(()) => result.success_count += 1,
                Err(WebSocketError::SendQueueFull) => {
                    warn!(connection_id = %handle.id(), "outbound queue full, disconnecting slow client");
                    handle.request_close(CloseFrame::new(
                        close_code::POLICY_VIOLATION,
                        "outbound queue full",
                    ));
                    result
                        .failed_connections
                        .push((handle.id(), WebSocketError::SendQueueFull));
                }
                Err(err) => result.failed_connections.push((handle.id(), err)),
            }
        }

        if result.has_failures() {
            warn!(
                delivered = result.success_count,
                failed = result.failed_connections.len(),
                "broadcast completed with failures"
            );
        }
        result
    }

    /// Start the close handshake on one connection
    pub async fn close(&self, id: ConnectionId, frame: CloseFrame) -> WebSocketResult<()> {
        let handle = self
            .get(id)
            .await
            .ok_or(WebSocketError::ConnectionNotFound(id))?;
        if !handle.request_close(frame) {
            debug!(connection_id = %id, "close already requested");
        }
        Ok(())
    }

    /// Start the close handshake on every connection
    pub async fn close_all(&self, frame: CloseFrame) -> CloseAllResult {
        let mut result = CloseAllResult::default();

        for handle in self.snapshot().await {
            if handle.request_close(frame.clone()) {
                result.closed_count += 1;
            } else {
                result.already_closing.push(handle.id());
            }
        }

        if result.closed_count > 0 {
            info!(count = result.closed_count, code = frame.code, "closing all connections");
        }
        result
    }

    /// Aggregate state counts and traffic
    pub async fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();

        for handle in self.snapshot().await {
            stats.total_connections += 1;
            match handle.state().await {
                ConnectionState::Open => stats.open_connections += 1,
                ConnectionState::Closing => stats.closing_connections += 1,
                ConnectionState::Handshaking | ConnectionState::Closed => {}
            }

            let conn_stats = handle.stats().await;
            stats.total_messages_sent += conn_stats.messages_sent;
            stats.total_messages_received += conn_stats.messages_received;
            stats.total_bytes_sent += conn_stats.bytes_sent;
            stats.total_bytes_received += conn_stats.bytes_received;
        }

        stats
    }
}

/// Result of broadcasting a message to multiple connections
#[derive(Debug, Default)]
pub struct BroadcastResult {
    pub success_count: usize,
    pub failed_connections: Vec<(ConnectionId, WebSocketError)>,
    /// Registered but already closing
    pub inactive_connections: Vec<ConnectionId>,
}

impl BroadcastResult {
    pub fn total_attempted(&self) -> usize {
        self.success_count + self.failed_connections.len() + self.inactive_connections.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed_connections.is_empty()
    }
}

/// Result of closing all connections
#[derive(Debug, Default)]
pub struct CloseAllResult {
    pub closed_count: usize,
    pub already_closing: Vec<ConnectionId>,
}

/// Registry statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    pub total_connections: usize,
    pub open_connections: usize,
    pub closing_connections: usize,
    pub total_messages_sent: u64,
    pub total_messages_received: u64,
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
}
