//! Application callbacks
//!
//! Implement [`WebSocketHandler`] for stateful handlers, or register closures
//! on [`crate::WebSocketServer`] which collects them into [`Callbacks`].

use super::types::{ConnectionId, DisconnectReason, WebSocketError, WebSocketMessage};
use crate::logging::structured::log_application_error;
use crate::server::ServerHandle;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;

/// Failure raised by user code inside a callback.
///
/// Never fatal: the connection that triggered it stays open.
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("{0}")]
    Callback(Box<dyn std::error::Error + Send + Sync>),

    #[error("callback panicked: {0}")]
    Panic(String),
}

impl ApplicationError {
    /// Wrap any error type
    pub fn new<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Callback(Box::new(err))
    }

    /// Error from a plain message
    pub fn msg<T: Into<String>>(message: T) -> Self {
        let message: String = message.into();
        Self::Callback(message.into())
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panic(_))
    }

    fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panic(message)
    }
}

impl From<WebSocketError> for ApplicationError {
    fn from(err: WebSocketError) -> Self {
        Self::new(err)
    }
}

/// Result returned by every callback
pub type CallbackResult = Result<(), ApplicationError>;

/// Connection lifecycle hooks.
///
/// Every hook receives a [`ServerHandle`] so it can reply, broadcast, or
/// close connections. Hooks for one connection run one at a time in the
/// order the events happened.
#[async_trait]
pub trait WebSocketHandler: Send + Sync + 'static {
    /// A client finished the handshake and is registered
    async fn on_connect(&self, _server: &ServerHandle, _id: ConnectionId) -> CallbackResult {
        Ok(())
    }

    /// A complete text or binary message arrived
    async fn on_message(
        &self,
        _server: &ServerHandle,
        _id: ConnectionId,
        _message: WebSocketMessage,
    ) -> CallbackResult {
        Ok(())
    }

    /// The connection left the registry. Called exactly once per connect.
    async fn on_disconnect(
        &self,
        _server: &ServerHandle,
        _id: ConnectionId,
        _reason: DisconnectReason,
    ) -> CallbackResult {
        Ok(())
    }
}

type ConnectFn = dyn Fn(ServerHandle, ConnectionId) -> BoxFuture<'static, CallbackResult> + Send + Sync;
type MessageFn = dyn Fn(ServerHandle, ConnectionId, WebSocketMessage) -> BoxFuture<'static, CallbackResult>
    + Send
    + Sync;
type DisconnectFn = dyn Fn(ServerHandle, ConnectionId, DisconnectReason) -> BoxFuture<'static, CallbackResult>
    + Send
    + Sync;

/// Closure-based handler; unset hooks do nothing
#[derive(Clone, Default)]
pub struct Callbacks {
    connect: Option<Arc<ConnectFn>>,
    message: Option<Arc<MessageFn>>,
    disconnect: Option<Arc<DisconnectFn>>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(ServerHandle, ConnectionId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        self.connect = Some(Arc::new(move |server, id| callback(server, id).boxed()));
        self
    }

    pub fn on_message<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(ServerHandle, ConnectionId, WebSocketMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        self.message = Some(Arc::new(move |server, id, message| {
            callback(server, id, message).boxed()
        }));
        self
    }

    pub fn on_disconnect<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(ServerHandle, ConnectionId, DisconnectReason) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        self.disconnect = Some(Arc::new(move |server, id, reason| {
            callback(server, id, reason).boxed()
        }));
        self
    }
}

#[async_trait]
impl WebSocketHandler for Callbacks {
    async fn on_connect(&self, server: &ServerHandle, id: ConnectionId) -> CallbackResult {
        match &self.connect {
            Some(callback) => callback(server.clone(), id).await,
            None => Ok(()),
        }
    }

    async fn on_message(
        &self,
        server: &ServerHandle,
        id: ConnectionId,
        message: WebSocketMessage,
    ) -> CallbackResult {
        match &self.message {
            Some(callback) => callback(server.clone(), id, message).await,
            None => Ok(()),
        }
    }

    async fn on_disconnect(
        &self,
        server: &ServerHandle,
        id: ConnectionId,
        reason: DisconnectReason,
    ) -> CallbackResult {
        match &self.disconnect {
            Some(callback) => callback(server.clone(), id, reason).await,
            None => Ok(()),
        }
    }
}

/// Run one callback, turning errors and panics into a logged
/// [`ApplicationError`]. Returns the error so callers can count it.
///
/// Panics are only caught when the binary unwinds: profiles must not set
/// `panic = "abort"`.
pub(crate) async fn dispatch<Fut>(
    id: ConnectionId,
    callback: &'static str,
    future: Fut,
) -> Option<ApplicationError>
where
    Fut: Future<Output = CallbackResult>,
{
    let err = match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(())) => return None,
        Ok(Err(err)) => err,
        Err(payload) => ApplicationError::from_panic(payload),
    };

    log_application_error(id, callback, &err.to_string());
    Some(err)
}
