//! Connection actor and the handle the registry keeps for it
//!
//! Each accepted socket is owned by one [`ConnectionActor`] task. The actor
//! performs the upgrade handshake, then multiplexes socket reads, queued
//! outbound frames, close requests and timers in a single `select!` loop.
//! Everything else in the server talks to it through a [`ConnectionHandle`].

use super::assembler::MessageAssembler;
use super::frame::{Decoded, Frame, FrameCodec, Opcode};
use super::handler::{dispatch, WebSocketHandler};
use super::handshake::{
    attempt, find_header_end, rejection_response, HandshakeError, HandshakeOutcome,
    HandshakeRequest,
};
use super::types::{
    close_code, CloseFrame, ConnectionId, ConnectionState, DisconnectReason, WebSocketError,
    WebSocketMessage, WebSocketResult,
};
use crate::config::WebSocketServerConfig;
use crate::logging::structured::{
    log_connection_closed, log_connection_opened, log_handshake_rejected,
};
use crate::server::ServerHandle;
use bytes::{Buf, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time;
use tracing::{debug, info, warn};

/// Connection metadata for tracking and debugging
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// When the handshake completed
    pub connected_at: DateTime<Utc>,
    pub remote_addr: Option<SocketAddr>,
    /// Request target of the upgrade request
    pub path: String,
    pub user_agent: Option<String>,
    pub stats: ConnectionStats,
}

impl ConnectionMetadata {
    fn new(remote_addr: Option<SocketAddr>, request: &HandshakeRequest) -> Self {
        Self {
            connected_at: Utc::now(),
            remote_addr,
            path: request.path.clone(),
            user_agent: request.user_agent().map(str::to_string),
            stats: ConnectionStats::default(),
        }
    }
}

/// Connection statistics
#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    /// Data frames written to the socket
    pub messages_sent: u64,
    /// Complete messages delivered to `on_message`
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub last_activity: Option<Instant>,
}

/// Shared, non-owning view of a live connection.
///
/// Cloning is cheap. Sends never wait: a full queue is reported as
/// [`WebSocketError::SendQueueFull`] so callers on the connection's own
/// task cannot deadlock.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::Sender<Bytes>,
    close_requests: Arc<watch::Sender<Option<CloseFrame>>>,
    state: Arc<RwLock<ConnectionState>>,
    metadata: Arc<RwLock<ConnectionMetadata>>,
}

impl ConnectionHandle {
    fn new(
        id: ConnectionId,
        outbound: mpsc::Sender<Bytes>,
        close_requests: watch::Sender<Option<CloseFrame>>,
        metadata: ConnectionMetadata,
    ) -> Self {
        Self {
            id,
            outbound,
            close_requests: Arc::new(close_requests),
            state: Arc::new(RwLock::new(ConnectionState::Open)),
            metadata: Arc::new(RwLock::new(metadata)),
        }
    }

    /// Handle with no actor behind it; the test keeps the receiving ends
    #[cfg(test)]
    pub(crate) fn detached(
        capacity: usize,
    ) -> (
        Self,
        mpsc::Receiver<Bytes>,
        watch::Receiver<Option<CloseFrame>>,
    ) {
        let (outbound, outbound_rx) = mpsc::channel(capacity);
        let (close_tx, close_rx) = watch::channel(None);
        let metadata = ConnectionMetadata {
            connected_at: Utc::now(),
            remote_addr: None,
            path: "/".to_string(),
            user_agent: None,
            stats: ConnectionStats::default(),
        };
        (
            Self::new(ConnectionId::new(), outbound, close_tx, metadata),
            outbound_rx,
            close_rx,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn is_open(&self) -> bool {
        self.state().await.is_open()
    }

    pub async fn metadata(&self) -> ConnectionMetadata {
        self.metadata.read().await.clone()
    }

    pub async fn stats(&self) -> ConnectionStats {
        self.metadata.read().await.stats.clone()
    }

    /// Queue a message for delivery
    pub async fn send(&self, message: WebSocketMessage) -> WebSocketResult<()> {
        self.send_frame(encode_message(message)).await
    }

    /// Queue an already encoded frame, failing if the connection is no
    /// longer open
    pub(crate) async fn send_frame(&self, frame: Bytes) -> WebSocketResult<()> {
        if !self.is_open().await {
            return Err(WebSocketError::ConnectionClosed);
        }
        self.try_enqueue(frame)
    }

    pub(crate) fn try_enqueue(&self, frame: Bytes) -> WebSocketResult<()> {
        self.outbound.try_send(frame).map_err(|err| match err {
            TrySendError::Full(_) => WebSocketError::SendQueueFull,
            TrySendError::Closed(_) => WebSocketError::ConnectionClosed,
        })
    }

    /// Ask the actor to start the close handshake.
    ///
    /// Only the first request wins; returns `false` if a close was already
    /// requested.
    pub fn request_close(&self, frame: CloseFrame) -> bool {
        self.close_requests.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(frame);
            true
        })
    }

    async fn set_state(&self, state: ConnectionState) {
        *self.state.write().await = state;
    }

    async fn record_received(&self, bytes: usize) {
        let mut meta = self.metadata.write().await;
        meta.stats.bytes_received += bytes as u64;
        meta.stats.last_activity = Some(Instant::now());
    }

    async fn record_message_received(&self) {
        self.metadata.write().await.stats.messages_received += 1;
    }

    async fn record_sent(&self, bytes: usize) {
        let mut meta = self.metadata.write().await;
        meta.stats.messages_sent += 1;
        meta.stats.bytes_sent += bytes as u64;
        meta.stats.last_activity = Some(Instant::now());
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle").field("id", &self.id).finish()
    }
}

/// Encode a message as a single unmasked data frame
pub(crate) fn encode_message(message: WebSocketMessage) -> Bytes {
    let frame = match message {
        WebSocketMessage::Text(text) => Frame::text(text),
        WebSocketMessage::Binary(data) => Frame::binary(data),
    };
    FrameCodec::new().encode(&frame)
}

/// Per-session state that only exists once the handshake succeeded
struct Session {
    handle: ConnectionHandle,
    outbound: mpsc::Receiver<Bytes>,
    close_requests: watch::Receiver<Option<CloseFrame>>,
    /// Close frame we sent, while waiting for the peer's reply
    local_close: Option<CloseFrame>,
    close_deadline: Option<time::Instant>,
    idle_deadline: Option<time::Instant>,
}

enum Step {
    Continue,
    Finished(DisconnectReason),
}

/// Owns one client socket from accept to close
pub(crate) struct ConnectionActor<S> {
    id: ConnectionId,
    stream: S,
    remote_addr: Option<SocketAddr>,
    config: Arc<WebSocketServerConfig>,
    server: ServerHandle,
    handler: Arc<dyn WebSocketHandler>,
    codec: FrameCodec,
    assembler: MessageAssembler,
    inbound: BytesMut,
}

impl<S> ConnectionActor<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub(crate) fn new(
        stream: S,
        remote_addr: Option<SocketAddr>,
        server: ServerHandle,
        handler: Arc<dyn WebSocketHandler>,
    ) -> Self {
        let config = server.config();
        Self {
            id: ConnectionId::new(),
            stream,
            remote_addr,
            codec: FrameCodec::with_max_payload_size(config.max_frame_bytes),
            assembler: MessageAssembler::new(config.max_message_bytes),
            inbound: BytesMut::with_capacity(4096),
            config,
            server,
            handler,
        }
    }

    /// Drive the connection until it is closed
    pub(crate) async fn run(mut self) {
        let Some(request) = self.handshake().await else {
            return;
        };

        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.outbound_queue_capacity);
        let (close_tx, close_rx) = watch::channel(None);
        let handle = ConnectionHandle::new(
            self.id,
            outbound_tx,
            close_tx,
            ConnectionMetadata::new(self.remote_addr, &request),
        );

        self.server.registry().insert(handle.clone()).await;
        log_connection_opened(
            self.id,
            self.remote_addr,
            &request.path,
            request.user_agent(),
        );

        // A shutdown that raced with this handshake missed us in close_all
        if self.server.is_shutting_down() {
            handle.request_close(CloseFrame::new(
                close_code::GOING_AWAY,
                "server shutting down",
            ));
        }

        dispatch(
            self.id,
            "on_connect",
            self.handler.on_connect(&self.server, self.id),
        )
        .await;

        let idle_deadline = self.config.idle_timeout().and_then(deadline_after);
        let mut session = Session {
            handle: handle.clone(),
            outbound: outbound_rx,
            close_requests: close_rx,
            local_close: None,
            close_deadline: None,
            idle_deadline,
        };
        let reason = self.serve_session(&mut session).await;

        handle.set_state(ConnectionState::Closed).await;
        self.server.registry().remove(self.id).await;
        log_connection_closed(self.id, &reason, &handle.stats().await);

        dispatch(
            self.id,
            "on_disconnect",
            self.handler.on_disconnect(&self.server, self.id, reason),
        )
        .await;
    }

    /// Read and answer the upgrade request. `None` means the connection
    /// never opened.
    async fn handshake(&mut self) -> Option<HandshakeRequest> {
        let timeout = self.config.handshake_timeout();
        let mut shutdown = self.server.shutdown_receiver();

        let read = tokio::select! {
            read = time::timeout(timeout, self.read_request()) => read,
            _ = shutdown.wait_for(|stopping| *stopping) => {
                debug!(connection_id = %self.id, "server shutting down during handshake");
                return None;
            }
        };

        let raw = match read {
            Ok(Ok(Some(raw))) => raw,
            Ok(Ok(None)) => {
                debug!(connection_id = %self.id, "client went away during handshake");
                return None;
            }
            Ok(Err(err)) => {
                self.reject(err.status_code(), &err.to_string()).await;
                return None;
            }
            Err(_) => {
                debug!(connection_id = %self.id, "handshake timed out");
                return None;
            }
        };

        if !self.server.is_accepting() {
            let err = HandshakeError::Unavailable;
            self.reject(err.status_code(), &err.to_string()).await;
            return None;
        }

        match attempt(&raw) {
            HandshakeOutcome::Accepted { response, request } => {
                if let Err(err) = self.stream.write_all(&response).await {
                    debug!(connection_id = %self.id, "failed to write handshake response: {}", err);
                    return None;
                }
                Some(request)
            }
            HandshakeOutcome::Rejected { status, reason } => {
                self.reject(status, &reason).await;
                None
            }
        }
    }

    /// Buffer until the header block ends. Bytes past the blank line stay in
    /// `inbound` and are decoded as frames.
    async fn read_request(&mut self) -> Result<Option<BytesMut>, HandshakeError> {
        let limit = self.config.max_handshake_bytes;
        loop {
            if let Some(end) = find_header_end(&self.inbound) {
                if end > limit {
                    return Err(HandshakeError::HeadersTooLarge(limit));
                }
                return Ok(Some(self.inbound.split_to(end)));
            }
            if self.inbound.len() >= limit {
                return Err(HandshakeError::HeadersTooLarge(limit));
            }

            match self.stream.read_buf(&mut self.inbound).await {
                Ok(0) => return Ok(None),
                Ok(_) => {}
                Err(err) => {
                    debug!(connection_id = %self.id, "read error during handshake: {}", err);
                    return Ok(None);
                }
            }
        }
    }

    async fn reject(&mut self, status: u16, reason: &str) {
        log_handshake_rejected(self.remote_addr, status, reason);
        let _ = self.stream.write_all(&rejection_response(status, reason)).await;
        let _ = self.stream.shutdown().await;
    }

    async fn serve_session(&mut self, session: &mut Session) -> DisconnectReason {
        let mut keepalive = self
            .config
            .ping_interval()
            .and_then(|period| Some(time::interval_at(deadline_after(period)?, period)));

        loop {
            if let Step::Finished(reason) = self.drain_inbound(session).await {
                return reason;
            }

            let closing = session.local_close.is_some();
            tokio::select! {
                read = self.stream.read_buf(&mut self.inbound) => match read {
                    Ok(0) => {
                        return match session.local_close.take() {
                            Some(frame) => DisconnectReason::Local(frame),
                            None => DisconnectReason::ConnectionLost,
                        };
                    }
                    Ok(_) => {}
                    Err(err) => return DisconnectReason::Io(err.to_string()),
                },
                Some(frame) = session.outbound.recv(), if !closing => {
                    if let Err(err) = self.write_data(&session.handle, frame).await {
                        return DisconnectReason::Io(err.to_string());
                    }
                }
                Ok(()) = session.close_requests.changed(), if !closing => {
                    let requested = session.close_requests.borrow_and_update().clone();
                    if let Some(frame) = requested {
                        if let Err(err) = self.start_close(session, frame).await {
                            return DisconnectReason::Io(err.to_string());
                        }
                    }
                }
                _ = tick(&mut keepalive), if !closing => {
                    debug!(connection_id = %self.id, "sending keepalive ping");
                    if let Err(err) = self.write_frame(&Frame::ping(Bytes::new())).await {
                        return DisconnectReason::Io(err.to_string());
                    }
                }
                _ = sleep_until(session.idle_deadline), if !closing && session.idle_deadline.is_some() => {
                    info!(connection_id = %self.id, "closing idle connection");
                    let frame = CloseFrame::new(close_code::NORMAL, "idle timeout");
                    if let Err(err) = self.start_close(session, frame).await {
                        return DisconnectReason::Io(err.to_string());
                    }
                }
                _ = sleep_until(session.close_deadline), if closing => {
                    debug!(connection_id = %self.id, "peer did not answer our close frame");
                    let _ = self.stream.shutdown().await;
                    if let Some(frame) = session.local_close.take() {
                        return DisconnectReason::Local(frame);
                    }
                }
            }
        }
    }

    /// Decode and handle every complete frame already buffered
    async fn drain_inbound(&mut self, session: &mut Session) -> Step {
        loop {
            let (frame, consumed) = match self.codec.decode(&self.inbound) {
                Ok(Decoded::Frame { frame, consumed }) => (frame, consumed),
                Ok(Decoded::Incomplete) => return Step::Continue,
                Err(err) => {
                    return Step::Finished(self.fail(err.close_code(), err.to_string()).await)
                }
            };
            self.inbound.advance(consumed);

            session.handle.record_received(consumed).await;
            if let Some(timeout) = self.config.idle_timeout() {
                session.idle_deadline = deadline_after(timeout);
            }

            if let Step::Finished(reason) = self.handle_frame(session, frame).await {
                return Step::Finished(reason);
            }
        }
    }

    async fn handle_frame(&mut self, session: &mut Session, frame: Frame) -> Step {
        if !frame.masked {
            return Step::Finished(
                self.fail(
                    close_code::PROTOCOL_ERROR,
                    "client frames must be masked".to_string(),
                )
                .await,
            );
        }

        debug!(
            connection_id = %self.id,
            opcode = ?frame.opcode,
            fin = frame.fin,
            len = frame.payload.len(),
            "frame received"
        );

        match frame.opcode {
            Opcode::Ping => {
                if session.local_close.is_none() {
                    if let Err(err) = self.write_frame(&Frame::pong(frame.payload)).await {
                        return Step::Finished(DisconnectReason::Io(err.to_string()));
                    }
                }
                Step::Continue
            }
            Opcode::Pong => Step::Continue,
            Opcode::Close => self.handle_close(session, &frame.payload).await,
            Opcode::Text | Opcode::Binary | Opcode::Continuation => {
                // Data after our close frame is discarded
                if session.local_close.is_some() {
                    return Step::Continue;
                }

                match self.assembler.push(frame) {
                    Ok(Some(message)) => {
                        session.handle.record_message_received().await;
                        dispatch(
                            self.id,
                            "on_message",
                            self.handler.on_message(&self.server, self.id, message),
                        )
                        .await;
                        Step::Continue
                    }
                    Ok(None) => Step::Continue,
                    Err(err) => {
                        Step::Finished(self.fail(err.close_code(), err.to_string()).await)
                    }
                }
            }
        }
    }

    async fn handle_close(&mut self, session: &mut Session, payload: &[u8]) -> Step {
        let peer = match CloseFrame::from_payload(payload) {
            Ok(peer) => peer,
            Err(err) => return Step::Finished(self.fail(err.close_code(), err.to_string()).await),
        };

        // The peer answered a close we started
        if let Some(ours) = session.local_close.take() {
            let _ = self.stream.shutdown().await;
            return Step::Finished(DisconnectReason::Local(ours));
        }

        debug!(connection_id = %self.id, "peer started close handshake");
        session.handle.set_state(ConnectionState::Closing).await;

        while let Ok(frame) = session.outbound.try_recv() {
            if self.write_data(&session.handle, frame).await.is_err() {
                break;
            }
        }

        let reply = match &peer {
            Some(frame) => Frame::close(&CloseFrame::new(frame.code, "")),
            None => Frame::empty_close(),
        };
        let _ = self.write_frame(&reply).await;
        let _ = self.stream.shutdown().await;

        Step::Finished(DisconnectReason::Remote(peer))
    }

    /// Flush queued frames, send our close frame and wait for the reply
    async fn start_close(&mut self, session: &mut Session, close: CloseFrame) -> io::Result<()> {
        session.handle.set_state(ConnectionState::Closing).await;

        while let Ok(frame) = session.outbound.try_recv() {
            self.write_data(&session.handle, frame).await?;
        }
        self.write_frame(&Frame::close(&close)).await?;

        debug!(connection_id = %self.id, code = close.code, "close frame sent");
        session.close_deadline = deadline_after(self.config.close_timeout());
        session.local_close = Some(close);
        Ok(())
    }

    /// Fail the connection: best-effort close frame, no waiting for the peer
    async fn fail(&mut self, code: u16, message: String) -> DisconnectReason {
        warn!(connection_id = %self.id, code, "failing connection: {}", message);

        let _ = self
            .write_frame(&Frame::close(&CloseFrame::new(code, message.clone())))
            .await;
        let _ = self.stream.shutdown().await;

        DisconnectReason::ProtocolViolation { code, message }
    }

    async fn write_frame(&mut self, frame: &Frame) -> io::Result<()> {
        let bytes = self.codec.encode(frame);
        self.stream.write_all(&bytes).await
    }

    async fn write_data(&mut self, handle: &ConnectionHandle, frame: Bytes) -> io::Result<()> {
        self.stream.write_all(&frame).await?;
        handle.record_sent(frame.len()).await;
        Ok(())
    }
}

/// `None` when `period` is too far out to represent, which disables the timer
fn deadline_after(period: Duration) -> Option<time::Instant> {
    time::Instant::now().checked_add(period)
}

async fn tick(interval: &mut Option<time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn sleep_until(deadline: Option<time::Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::handler::Callbacks;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::DuplexStream;

    const REQUEST: &str = "GET /chat HTTP/1.1\r\n\
        Host: localhost\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\r\n";

    const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

    fn server(config: WebSocketServerConfig) -> ServerHandle {
        ServerHandle::new(Arc::new(config))
    }

    fn spawn_actor(
        server: &ServerHandle,
        handler: impl WebSocketHandler,
    ) -> (DuplexStream, tokio::task::JoinHandle<()>) {
        let (client, server_side) = tokio::io::duplex(64 * 1024);
        let actor = ConnectionActor::new(server_side, None, server.clone(), Arc::new(handler));
        (client, tokio::spawn(actor.run()))
    }

    async fn read_response(client: &mut DuplexStream) -> String {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        while find_header_end(&buf).is_none() {
            if client.read(&mut byte).await.unwrap() == 0 {
                break;
            }
            buf.push(byte[0]);
        }
        String::from_utf8(buf).unwrap()
    }

    async fn read_frame(client: &mut DuplexStream, buf: &mut BytesMut) -> Frame {
        let codec = FrameCodec::new();
        loop {
            if let Decoded::Frame { frame, consumed } = codec.decode(&buf[..]).unwrap() {
                buf.advance(consumed);
                return frame;
            }
            assert!(client.read_buf(buf).await.unwrap() > 0, "stream ended");
        }
    }

    async fn send_masked(client: &mut DuplexStream, frame: Frame) {
        let bytes = FrameCodec::new().encode_masked(&frame, MASK);
        client.write_all(&bytes).await.unwrap();
    }

    fn echo_handler(disconnects: Arc<AtomicUsize>) -> Callbacks {
        Callbacks::new()
            .on_message(|server, id, message| async move {
                server.send_text(id, format!("Echo: {}", message)).await?;
                Ok(())
            })
            .on_disconnect(move |_server, _id, _reason| {
                let disconnects = disconnects.clone();
                async move {
                    disconnects.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
    }

    #[tokio::test]
    async fn test_echo_then_peer_close() {
        let server = server(WebSocketServerConfig::default());
        let disconnects = Arc::new(AtomicUsize::new(0));
        let (mut client, task) = spawn_actor(&server, echo_handler(disconnects.clone()));

        client.write_all(REQUEST.as_bytes()).await.unwrap();
        let response = read_response(&mut client).await;
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));

        let mut buf = BytesMut::new();
        send_masked(&mut client, Frame::text("hello")).await;
        let reply = read_frame(&mut client, &mut buf).await;
        assert_eq!(reply, Frame::text("Echo: hello"));
        assert_eq!(server.connection_count().await, 1);

        send_masked(&mut client, Frame::close(&CloseFrame::new(1000, "bye"))).await;
        let echoed = read_frame(&mut client, &mut buf).await;
        assert_eq!(echoed.opcode, Opcode::Close);
        assert_eq!(
            CloseFrame::from_payload(&echoed.payload).unwrap().unwrap().code,
            1000
        );

        task.await.unwrap();
        assert_eq!(server.connection_count().await, 0);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unrepresentable_timeouts_disable_timers() {
        let server = server(WebSocketServerConfig {
            idle_timeout_secs: Some(u64::MAX),
            ping_interval_secs: Some(u64::MAX),
            close_timeout_secs: u64::MAX,
            ..Default::default()
        });
        let disconnects = Arc::new(AtomicUsize::new(0));
        let (mut client, task) = spawn_actor(&server, echo_handler(disconnects.clone()));

        client.write_all(REQUEST.as_bytes()).await.unwrap();
        read_response(&mut client).await;

        let mut buf = BytesMut::new();
        send_masked(&mut client, Frame::text("still alive")).await;
        assert_eq!(
            read_frame(&mut client, &mut buf).await,
            Frame::text("Echo: still alive")
        );

        send_masked(&mut client, Frame::close(&CloseFrame::normal())).await;
        assert_eq!(read_frame(&mut client, &mut buf).await.opcode, Opcode::Close);

        task.await.unwrap();
        assert_eq!(server.connection_count().await, 0);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ping_is_answered_without_callback() {
        let server = server(WebSocketServerConfig::default());
        let disconnects = Arc::new(AtomicUsize::new(0));
        let (mut client, task) = spawn_actor(&server, echo_handler(disconnects));

        client.write_all(REQUEST.as_bytes()).await.unwrap();
        read_response(&mut client).await;

        let mut buf = BytesMut::new();
        send_masked(&mut client, Frame::ping("are you there")).await;
        assert_eq!(
            read_frame(&mut client, &mut buf).await,
            Frame::pong("are you there")
        );

        drop(client);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_unmasked_frame_fails_connection() {
        let server = server(WebSocketServerConfig::default());
        let (mut client, task) = spawn_actor(&server, Callbacks::new());

        client.write_all(REQUEST.as_bytes()).await.unwrap();
        read_response(&mut client).await;

        let unmasked = FrameCodec::new().encode(&Frame::text("hi"));
        client.write_all(&unmasked).await.unwrap();

        let mut buf = BytesMut::new();
        let close = read_frame(&mut client, &mut buf).await;
        assert_eq!(close.opcode, Opcode::Close);
        assert_eq!(
            CloseFrame::from_payload(&close.payload).unwrap().unwrap().code,
            close_code::PROTOCOL_ERROR
        );
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_frames_pipelined_with_handshake_are_processed() {
        let server = server(WebSocketServerConfig::default());
        let disconnects = Arc::new(AtomicUsize::new(0));
        let (mut client, task) = spawn_actor(&server, echo_handler(disconnects));

        let mut bytes = REQUEST.as_bytes().to_vec();
        bytes.extend_from_slice(&FrameCodec::new().encode_masked(&Frame::text("early"), MASK));
        client.write_all(&bytes).await.unwrap();

        read_response(&mut client).await;
        let mut buf = BytesMut::new();
        assert_eq!(
            read_frame(&mut client, &mut buf).await,
            Frame::text("Echo: early")
        );

        drop(client);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_server_close_waits_for_peer_reply() {
        let server = server(WebSocketServerConfig::default());
        let disconnects = Arc::new(AtomicUsize::new(0));
        let (mut client, task) = spawn_actor(&server, echo_handler(disconnects.clone()));

        client.write_all(REQUEST.as_bytes()).await.unwrap();
        read_response(&mut client).await;

        let id = loop {
            if let Some(id) = server.connection_ids().await.first().copied() {
                break id;
            }
            tokio::task::yield_now().await;
        };
        server.close(id, 4000, "kicked").await.unwrap();

        let mut buf = BytesMut::new();
        let close = read_frame(&mut client, &mut buf).await;
        assert_eq!(
            CloseFrame::from_payload(&close.payload).unwrap(),
            Some(CloseFrame::new(4000, "kicked"))
        );

        send_masked(&mut client, Frame::close(&CloseFrame::new(4000, ""))).await;
        task.await.unwrap();
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_handshake_writes_http_error() {
        let request = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let HandshakeOutcome::Rejected { status, reason } = attempt(request) else {
            panic!("request without upgrade headers must be rejected");
        };
        assert_eq!(status, 400);

        let stream = tokio_test::io::Builder::new()
            .read(request)
            .write(&rejection_response(status, &reason))
            .build();

        let server = server(WebSocketServerConfig::default());
        let connects = Arc::new(AtomicUsize::new(0));
        let counter = connects.clone();
        let handler = Callbacks::new().on_connect(move |_server, _id| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        ConnectionActor::new(stream, None, server.clone(), Arc::new(handler))
            .run()
            .await;

        assert_eq!(connects.load(Ordering::SeqCst), 0);
        assert_eq!(server.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_denied_connections_get_503() {
        let server = server(WebSocketServerConfig::default());
        server.deny_new_connections();
        let (mut client, task) = spawn_actor(&server, Callbacks::new());

        client.write_all(REQUEST.as_bytes()).await.unwrap();
        let response = read_response(&mut client).await;
        assert!(response.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));

        task.await.unwrap();
        assert_eq!(server.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_oversized_handshake_gets_431() {
        let server = server(WebSocketServerConfig {
            max_handshake_bytes: 64,
            ..Default::default()
        });
        let (mut client, task) = spawn_actor(&server, Callbacks::new());

        client.write_all(REQUEST.as_bytes()).await.unwrap();
        let response = read_response(&mut client).await;
        assert!(response.starts_with("HTTP/1.1 431 "));

        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_send_rejected_after_close_requested() {
        let (tx, _rx) = mpsc::channel(1);
        let (close_tx, _close_rx) = watch::channel(None);
        let request = HandshakeRequest::parse(REQUEST.as_bytes()).unwrap();
        let handle = ConnectionHandle::new(
            ConnectionId::new(),
            tx,
            close_tx,
            ConnectionMetadata::new(None, &request),
        );

        handle.send(WebSocketMessage::text("a")).await.unwrap();
        assert!(matches!(
            handle.send(WebSocketMessage::text("b")).await,
            Err(WebSocketError::SendQueueFull)
        ));

        assert!(handle.request_close(CloseFrame::normal()));
        assert!(!handle.request_close(CloseFrame::new(1001, "again")));

        handle.set_state(ConnectionState::Closing).await;
        assert!(matches!(
            handle.send(WebSocketMessage::text("c")).await,
            Err(WebSocketError::ConnectionClosed)
        ));
        assert_eq!(handle.metadata().await.path, "/chat");
    }
}
