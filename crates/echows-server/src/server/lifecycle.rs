//! Accept loop, graceful shutdown and signal handling

use super::handle::ServerHandle;
use crate::errors::{is_resource_exhaustion, ServerError, ServerResult};
use crate::websocket::connection::ConnectionActor;
use crate::websocket::{close_code, WebSocketHandler};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Accept sockets until `signal` fires, the handle requests shutdown, or
/// the process runs out of descriptors. Then shut down gracefully.
pub(crate) async fn run_accept_loop<F>(
    listener: TcpListener,
    server: ServerHandle,
    handler: Arc<dyn WebSocketHandler>,
    signal: F,
) -> ServerResult<()>
where
    F: Future<Output = ()> + Send,
{
    let mut tasks = JoinSet::new();
    tokio::pin!(signal);

    let outcome = loop {
        tokio::select! {
            biased;

            _ = &mut signal => break Ok(()),
            _ = server.shutdown_requested() => break Ok(()),
            accepted = listener.accept() => match accepted {
                Ok((stream, remote_addr)) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        debug!("failed to set TCP_NODELAY for {}: {}", remote_addr, err);
                    }
                    let actor = ConnectionActor::new(
                        stream,
                        Some(remote_addr),
                        server.clone(),
                        handler.clone(),
                    );
                    tasks.spawn(actor.run());
                }
                Err(err) if is_resource_exhaustion(&err) => {
                    error!("accept failed, out of resources: {}", err);
                    break Err(ServerError::ResourceExhausted(err));
                }
                Err(err) => warn!("accept failed: {}", err),
            },
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(err) = joined {
                    if err.is_panic() {
                        error!("connection task panicked: {}", err);
                    }
                }
            }
        }
    };

    drop(listener);
    graceful_shutdown(&server, &mut tasks).await;
    outcome
}

/// Stop accepting, close every connection with 1001 and give the actors
/// `shutdown_timeout` to finish before aborting them
async fn graceful_shutdown(server: &ServerHandle, tasks: &mut JoinSet<()>) {
    server.shutdown();

    let closing = server
        .close_all(close_code::GOING_AWAY, "server shutting down")
        .await;
    info!(
        connections = closing.closed_count,
        in_flight = tasks.len(),
        "shutting down"
    );

    let timeout = server.config().shutdown_timeout();
    let drained = tokio::time::timeout(timeout, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        warn!(
            remaining = tasks.len(),
            "connections did not close within {:?}, aborting", timeout
        );
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
    }

    info!("server stopped");
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!("failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            warn!("Received terminate signal, shutting down gracefully...");
        },
    }
}
