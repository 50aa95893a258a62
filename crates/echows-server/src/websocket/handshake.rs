//! Server side of the WebSocket opening handshake (RFC 6455 Section 4.2).
//!
//! ```http
//! GET /chat HTTP/1.1
//! Host: server.example.com
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! Sec-WebSocket-Version: 13
//! ```
//!
//! is answered with
//!
//! ```http
//! HTTP/1.1 101 Switching Protocols
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=
//! ```

use base64::Engine;
use sha1::{Digest, Sha1};
use thiserror::Error;

/// RFC 6455 GUID appended to the client key
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version this server speaks
pub const SUPPORTED_VERSION: &str = "13";

/// Compute the `Sec-WebSocket-Accept` value for a client key
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Locate the blank line ending an HTTP header block.
///
/// Returns the index just past the terminating `\r\n\r\n`.
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

/// Handshake validation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("malformed HTTP request: {0}")]
    Malformed(String),

    #[error("method must be GET, got {0}")]
    InvalidMethod(String),

    #[error("unsupported HTTP version: {0}")]
    UnsupportedHttpVersion(String),

    #[error("missing {0} header")]
    MissingHeader(&'static str),

    #[error("invalid {header} header: {value}")]
    InvalidHeader { header: &'static str, value: String },

    #[error("Sec-WebSocket-Key is not a base64-encoded 16-byte nonce")]
    InvalidKey,

    #[error("unsupported WebSocket version: {0}")]
    UnsupportedVersion(String),

    #[error("request headers exceed {0} bytes")]
    HeadersTooLarge(usize),

    #[error("server is not accepting new connections")]
    Unavailable,
}

impl HandshakeError {
    /// HTTP status sent back for this failure
    pub fn status_code(&self) -> u16 {
        match self {
            Self::UnsupportedVersion(_) => 426,
            Self::HeadersTooLarge(_) => 431,
            Self::Unavailable => 503,
            _ => 400,
        }
    }
}

/// A parsed HTTP upgrade request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub method: String,
    pub path: String,
    pub version: String,
    headers: Vec<(String, String)>,
}

impl HandshakeRequest {
    /// Parse a raw header block (request line, headers, blank line)
    pub fn parse(raw: &[u8]) -> Result<Self, HandshakeError> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| HandshakeError::Malformed("request is not valid UTF-8".into()))?;

        let mut lines = text.lines();
        let request_line = lines
            .next()
            .filter(|line| !line.is_empty())
            .ok_or_else(|| HandshakeError::Malformed("empty request".into()))?;

        let mut parts = request_line.split_whitespace();
        let (method, path, version) = match (parts.next(), parts.next(), parts.next(), parts.next())
        {
            (Some(method), Some(path), Some(version), None) => (method, path, version),
            _ => {
                return Err(HandshakeError::Malformed(format!(
                    "bad request line: {request_line}"
                )))
            }
        };

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| HandshakeError::Malformed(format!("bad header line: {line}")))?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        Ok(Self {
            method: method.to_string(),
            path: path.to_string(),
            version: version.to_string(),
            headers,
        })
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.header("user-agent")
    }

    /// Check the upgrade requirements and compute the accept token
    pub fn validate(&self) -> Result<String, HandshakeError> {
        if self.method != "GET" {
            return Err(HandshakeError::InvalidMethod(self.method.clone()));
        }
        if self.version != "HTTP/1.1" {
            return Err(HandshakeError::UnsupportedHttpVersion(self.version.clone()));
        }

        let upgrade = self
            .header("upgrade")
            .ok_or(HandshakeError::MissingHeader("Upgrade"))?;
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return Err(HandshakeError::InvalidHeader {
                header: "Upgrade",
                value: upgrade.to_string(),
            });
        }

        let connection = self
            .header("connection")
            .ok_or(HandshakeError::MissingHeader("Connection"))?;
        if !connection
            .split(',')
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        {
            return Err(HandshakeError::InvalidHeader {
                header: "Connection",
                value: connection.to_string(),
            });
        }

        let key = self
            .header("sec-websocket-key")
            .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Key"))?;
        match base64::engine::general_purpose::STANDARD.decode(key) {
            Ok(nonce) if nonce.len() == 16 => {}
            _ => return Err(HandshakeError::InvalidKey),
        }

        // Older clients omit the version header; anything other than 13 is refused.
        if let Some(version) = self.header("sec-websocket-version") {
            if version != SUPPORTED_VERSION {
                return Err(HandshakeError::UnsupportedVersion(version.to_string()));
            }
        }

        Ok(compute_accept_key(key))
    }
}

/// Result of [`attempt`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Upgrade accepted; `response` is the 101 reply to write back
    Accepted {
        response: Vec<u8>,
        request: HandshakeRequest,
    },
    /// Upgrade refused with an HTTP status
    Rejected { status: u16, reason: String },
}

impl HandshakeOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    /// Bytes to write to the client for this outcome
    pub fn response_bytes(&self) -> Vec<u8> {
        match self {
            Self::Accepted { response, .. } => response.clone(),
            Self::Rejected { status, reason } => rejection_response(*status, reason),
        }
    }
}

impl From<HandshakeError> for HandshakeOutcome {
    fn from(err: HandshakeError) -> Self {
        Self::Rejected {
            status: err.status_code(),
            reason: err.to_string(),
        }
    }
}

/// Validate a raw upgrade request and build the reply
pub fn attempt(raw_request: &[u8]) -> HandshakeOutcome {
    let request = match HandshakeRequest::parse(raw_request) {
        Ok(request) => request,
        Err(err) => return err.into(),
    };

    match request.validate() {
        Ok(accept_key) => HandshakeOutcome::Accepted {
            response: accept_response(&accept_key),
            request,
        },
        Err(err) => err.into(),
    }
}

/// The 101 Switching Protocols reply
pub fn accept_response(accept_key: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept_key}\r\n\
         \r\n"
    )
    .into_bytes()
}

/// An HTTP error reply that also closes the connection
pub fn rejection_response(status: u16, reason: &str) -> Vec<u8> {
    let mut response = format!(
        "HTTP/1.1 {status} {}\r\n\
         Connection: close\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         Content-Length: {}\r\n",
        status_phrase(status),
        reason.len()
    );
    if status == 426 {
        response.push_str("Sec-WebSocket-Version: 13\r\n");
    }
    response.push_str("\r\n");
    response.push_str(reason);
    response.into_bytes()
}

fn status_phrase(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        426 => "Upgrade Required",
        431 => "Request Header Fields Too Large",
        503 => "Service Unavailable",
        _ => "Error",
    }
}
