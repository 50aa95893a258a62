//! The WebSocket server entry point

use super::handle::ServerHandle;
use super::lifecycle::{run_accept_loop, shutdown_signal};
use crate::config::WebSocketServerConfig;
use crate::errors::{ServerError, ServerResult};
use crate::websocket::{
    CallbackResult, Callbacks, ConnectionId, DisconnectReason, WebSocketHandler, WebSocketMessage,
};
use echows_core::AppConfigTrait;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// A WebSocket server with its callbacks.
///
/// ```no_run
/// use echows_server::{WebSocketServer, WebSocketServerConfig};
///
/// # async fn run() -> echows_server::ServerResult<()> {
/// WebSocketServer::new(WebSocketServerConfig::default())
///     .on_message(|server, id, message| async move {
///         server.send_text(id, format!("Echo: {}", message)).await?;
///         Ok(())
///     })
///     .start("0.0.0.0", 9001)
///     .await
/// # }
/// ```
pub struct WebSocketServer {
    config: WebSocketServerConfig,
    callbacks: Callbacks,
    handler: Option<Arc<dyn WebSocketHandler>>,
    handle: ServerHandle,
}

impl WebSocketServer {
    pub fn new(config: WebSocketServerConfig) -> Self {
        let handle = ServerHandle::new(Arc::new(config.clone()));
        Self {
            config,
            callbacks: Callbacks::new(),
            handler: None,
            handle,
        }
    }

    /// Create a server configured from `ECHOWS_*` environment variables
    pub fn from_env() -> ServerResult<Self> {
        Ok(Self::new(WebSocketServerConfig::from_env()?))
    }

    pub fn config(&self) -> &WebSocketServerConfig {
        &self.config
    }

    /// Handle for controlling the server from outside its callbacks
    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Called after a client completes the handshake
    pub fn on_connect<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(ServerHandle, ConnectionId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        self.callbacks = self.callbacks.on_connect(callback);
        self
    }

    /// Called for every complete text or binary message
    pub fn on_message<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(ServerHandle, ConnectionId, WebSocketMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        self.callbacks = self.callbacks.on_message(callback);
        self
    }

    /// Called once when a connected client goes away
    pub fn on_disconnect<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(ServerHandle, ConnectionId, DisconnectReason) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        self.callbacks = self.callbacks.on_disconnect(callback);
        self
    }

    /// Use a trait-based handler instead of closures. Replaces any
    /// registered closures.
    pub fn with_handler<H: WebSocketHandler>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Bind `host:port` and serve until Ctrl+C or SIGTERM
    pub async fn start(self, host: &str, port: u16) -> ServerResult<()> {
        self.bind_and_serve(format!("{}:{}", host, port)).await
    }

    /// Bind the configured address and serve until Ctrl+C or SIGTERM
    pub async fn listen(self) -> ServerResult<()> {
        let addr = self.config.bind_address();
        self.bind_and_serve(addr).await
    }

    async fn bind_and_serve(self, addr: String) -> ServerResult<()> {
        self.config.validate()?;

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::bind(addr.clone(), e))?;

        self.serve_with_shutdown(listener, shutdown_signal()).await
    }

    /// Serve an already bound listener until [`ServerHandle::shutdown`]
    pub async fn serve(self, listener: TcpListener) -> ServerResult<()> {
        self.serve_with_shutdown(listener, std::future::pending()).await
    }

    /// Serve an already bound listener until `signal` resolves or
    /// [`ServerHandle::shutdown`] is called
    pub async fn serve_with_shutdown<F>(self, listener: TcpListener, signal: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send,
    {
        self.config.validate()?;

        let local_addr = listener
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| self.config.bind_address());
        info!("WebSocket server listening on {}", local_addr);

        let handler: Arc<dyn WebSocketHandler> = match self.handler {
            Some(handler) => handler,
            None => Arc::new(self.callbacks),
        };

        run_accept_loop(listener, self.handle, handler, signal).await
    }
}
