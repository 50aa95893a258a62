//! Shared helpers for the end-to-end tests: a minimal masking client and a
//! recording handler.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use echows_server::websocket::{find_header_end, Decoded};
use echows_server::*;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub const UPGRADE_REQUEST: &str = "GET /chat HTTP/1.1\r\n\
    Host: localhost\r\n\
    Upgrade: websocket\r\n\
    Connection: keep-alive, Upgrade\r\n\
    Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
    Sec-WebSocket-Version: 13\r\n\
    User-Agent: echows-tests\r\n\r\n";

/// Bind an ephemeral port and serve `server` on it in the background
pub async fn spawn_server(
    server: WebSocketServer,
) -> (SocketAddr, ServerHandle, JoinHandle<ServerResult<()>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = server.handle();
    let task = tokio::spawn(server.serve(listener));
    (addr, handle, task)
}

pub fn test_config() -> WebSocketServerConfig {
    WebSocketServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        close_timeout_secs: 1,
        shutdown_timeout_secs: 2,
        ..Default::default()
    }
}

/// Poll `condition` until it holds or the test timeout passes
pub async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(TIMEOUT, async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// A client that masks every frame, as RFC 6455 requires
pub struct TestClient {
    stream: TcpStream,
    buf: BytesMut,
    codec: FrameCodec,
    mask_seed: u32,
}

impl TestClient {
    /// Connect and complete the upgrade handshake
    pub async fn connect(addr: SocketAddr) -> Self {
        let mut client = Self::raw(addr).await;
        client.write_raw(UPGRADE_REQUEST.as_bytes()).await;
        let response = client.read_http_response().await;
        assert!(
            response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"),
            "unexpected handshake response: {}",
            response
        );
        client
    }

    /// Connect without sending anything
    pub async fn raw(addr: SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
            buf: BytesMut::new(),
            codec: FrameCodec::new(),
            mask_seed: 0x1234_5678,
        }
    }

    pub async fn write_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Read up to and including the blank line of an HTTP response
    pub async fn read_http_response(&mut self) -> String {
        tokio::time::timeout(TIMEOUT, async {
            loop {
                if let Some(end) = find_header_end(&self.buf) {
                    let head = self.buf.split_to(end);
                    return String::from_utf8(head.to_vec()).unwrap();
                }
                if self.stream.read_buf(&mut self.buf).await.unwrap() == 0 {
                    return String::from_utf8(self.buf.split().to_vec()).unwrap();
                }
            }
        })
        .await
        .expect("no HTTP response")
    }

    pub async fn send(&mut self, frame: Frame) {
        self.mask_seed = self.mask_seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        let bytes = self.codec.encode_masked(&frame, self.mask_seed.to_be_bytes());
        self.write_raw(&bytes).await;
    }

    pub async fn send_text(&mut self, text: &str) {
        self.send(Frame::text(text.to_string())).await;
    }

    pub async fn close(&mut self, code: u16, reason: &str) {
        self.send(Frame::close(&CloseFrame::new(code, reason))).await;
    }

    /// Next frame from the server, or `None` once the socket is closed
    pub async fn try_recv(&mut self) -> Option<Frame> {
        tokio::time::timeout(TIMEOUT, async {
            loop {
                if let Decoded::Frame { frame, consumed } = self.codec.decode(&self.buf).unwrap() {
                    self.buf.advance(consumed);
                    return Some(frame);
                }
                match self.stream.read_buf(&mut self.buf).await {
                    Ok(0) | Err(_) => return None,
                    Ok(_) => {}
                }
            }
        })
        .await
        .expect("timed out waiting for a frame")
    }

    pub async fn recv(&mut self) -> Frame {
        self.try_recv().await.expect("connection closed")
    }

    pub async fn recv_text(&mut self) -> String {
        let frame = self.recv().await;
        assert_eq!(frame.opcode, Opcode::Text);
        String::from_utf8(frame.payload.to_vec()).unwrap()
    }

    /// Next frame must be a close frame; returns its status
    pub async fn recv_close(&mut self) -> Option<CloseFrame> {
        let frame = self.recv().await;
        assert_eq!(frame.opcode, Opcode::Close, "expected close, got {:?}", frame);
        CloseFrame::from_payload(&frame.payload).unwrap()
    }

    /// Assert nothing arrives within `wait`
    pub async fn expect_silence(&mut self, wait: Duration) {
        let read = tokio::time::timeout(wait, self.stream.read_buf(&mut self.buf)).await;
        assert!(read.is_err(), "unexpected data from server");
    }

    /// Read until the server closes the socket
    pub async fn expect_eof(&mut self) {
        while self.try_recv().await.is_some() {}
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connect(ConnectionId),
    Message(ConnectionId, WebSocketMessage),
    Disconnect(ConnectionId, DisconnectReason),
}

/// Echo handler that records every callback
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<WebSocketMessage> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Message(_, message) => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn disconnects(&self) -> Vec<DisconnectReason> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Disconnect(_, reason) => Some(reason),
                _ => None,
            })
            .collect()
    }

    pub fn connects(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, Event::Connect(_)))
            .count()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl WebSocketHandler for Recorder {
    async fn on_connect(&self, _server: &ServerHandle, id: ConnectionId) -> CallbackResult {
        self.push(Event::Connect(id));
        Ok(())
    }

    async fn on_message(
        &self,
        server: &ServerHandle,
        id: ConnectionId,
        message: WebSocketMessage,
    ) -> CallbackResult {
        self.push(Event::Message(id, message.clone()));
        match message {
            WebSocketMessage::Text(text) if text == "fail" => {
                Err(ApplicationError::msg("refusing to echo"))
            }
            WebSocketMessage::Text(text) if text == "panic" => panic!("handler bug"),
            WebSocketMessage::Text(text) => {
                server.send_text(id, format!("Echo: {}", text)).await?;
                Ok(())
            }
            WebSocketMessage::Binary(data) => {
                server.send_binary(id, data).await?;
                Ok(())
            }
        }
    }

    async fn on_disconnect(
        &self,
        _server: &ServerHandle,
        id: ConnectionId,
        reason: DisconnectReason,
    ) -> CallbackResult {
        self.push(Event::Disconnect(id, reason));
        Ok(())
    }
}
