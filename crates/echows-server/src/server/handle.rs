//! Cloneable control surface over a running server

use crate::config::WebSocketServerConfig;
use crate::websocket::{
    close_code, BroadcastResult, CloseAllResult, CloseFrame, ConnectionId, ConnectionMetadata,
    ConnectionRegistry, FrameError, RegistryStats, WebSocketError, WebSocketMessage,
    WebSocketResult,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Handle passed to every callback and returned by
/// [`crate::WebSocketServer::handle`].
///
/// All sends are non-blocking enqueues, so calling them from inside a
/// callback (even for the connection being handled) cannot deadlock.
#[derive(Clone)]
pub struct ServerHandle {
    config: Arc<WebSocketServerConfig>,
    registry: ConnectionRegistry,
    accepting: Arc<AtomicBool>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl ServerHandle {
    pub(crate) fn new(config: Arc<WebSocketServerConfig>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            registry: ConnectionRegistry::new(),
            accepting: Arc::new(AtomicBool::new(true)),
            shutdown: Arc::new(shutdown),
        }
    }

    pub fn config(&self) -> Arc<WebSocketServerConfig> {
        self.config.clone()
    }

    pub(crate) fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Send a message to one connection
    pub async fn send(&self, id: ConnectionId, message: WebSocketMessage) -> WebSocketResult<()> {
        self.registry.send(id, message).await
    }

    pub async fn send_text<T: Into<String>>(&self, id: ConnectionId, text: T) -> WebSocketResult<()> {
        self.send(id, WebSocketMessage::text(text)).await
    }

    pub async fn send_binary<T: Into<Vec<u8>>>(
        &self,
        id: ConnectionId,
        data: T,
    ) -> WebSocketResult<()> {
        self.send(id, WebSocketMessage::binary(data)).await
    }

    /// Send a message to every open connection
    pub async fn broadcast(&self, message: WebSocketMessage) -> BroadcastResult {
        self.registry.broadcast(message).await
    }

    pub async fn broadcast_text<T: Into<String>>(&self, text: T) -> BroadcastResult {
        self.broadcast(WebSocketMessage::text(text)).await
    }

    pub async fn broadcast_binary<T: Into<Vec<u8>>>(&self, data: T) -> BroadcastResult {
        self.broadcast(WebSocketMessage::binary(data)).await
    }

    /// Start the close handshake with `code` and `reason`.
    ///
    /// `code` must be one that may appear on the wire (1000-1003,
    /// 1007-1011, 3000-4999).
    pub async fn close<T: Into<String>>(
        &self,
        id: ConnectionId,
        code: u16,
        reason: T,
    ) -> WebSocketResult<()> {
        if !close_code::is_valid(code) {
            return Err(WebSocketError::Protocol(FrameError::InvalidCloseCode(code)));
        }
        self.registry.close(id, CloseFrame::new(code, reason)).await
    }

    /// Close every open connection with `code` and `reason`
    pub async fn close_all<T: Into<String>>(&self, code: u16, reason: T) -> CloseAllResult {
        self.registry.close_all(CloseFrame::new(code, reason)).await
    }

    pub async fn connection_ids(&self) -> Vec<ConnectionId> {
        self.registry.ids().await
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.count().await
    }

    pub async fn connection_metadata(&self, id: ConnectionId) -> Option<ConnectionMetadata> {
        self.registry.metadata(id).await
    }

    pub async fn stats(&self) -> RegistryStats {
        self.registry.stats().await
    }

    /// Answer new upgrade requests with 503 until re-enabled.
    /// Open connections are not affected.
    pub fn deny_new_connections(&self) {
        if self.accepting.swap(false, Ordering::SeqCst) {
            info!("new connections are now refused");
        }
    }

    pub fn allow_new_connections(&self) {
        if !self.is_shutting_down() && !self.accepting.swap(true, Ordering::SeqCst) {
            info!("new connections are accepted again");
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Ask the server to shut down gracefully. Idempotent.
    pub fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        self.shutdown.send_if_modified(|stopping| {
            if *stopping {
                return false;
            }
            *stopping = true;
            true
        });
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Resolves once [`ServerHandle::shutdown`] has been called
    pub async fn shutdown_requested(&self) {
        let mut receiver = self.shutdown_receiver();
        // The sender lives as long as `self`, so this cannot fail
        let _ = receiver.wait_for(|stopping| *stopping).await;
    }

    pub(crate) fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("bind_address", &self.config.bind_address())
            .field("accepting", &self.is_accepting())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}
