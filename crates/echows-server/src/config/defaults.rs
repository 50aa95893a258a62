//! Default configuration values

pub struct WebSocketDefaults;

impl WebSocketDefaults {
    pub const HOST: &'static str = "0.0.0.0";
    pub const PORT: u16 = 9001;
    pub const MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024; // 64MB
    pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024; // 16MB
    pub const MAX_HANDSHAKE_BYTES: usize = 8 * 1024;
    pub const HANDSHAKE_TIMEOUT_SECS: u64 = 10;
    pub const CLOSE_TIMEOUT_SECS: u64 = 5;
    pub const OUTBOUND_QUEUE_CAPACITY: usize = 1024;
    pub const SHUTDOWN_TIMEOUT_SECS: u64 = 10;
    /// Upper bound for every timeout and interval
    pub const MAX_TIMEOUT_SECS: u64 = 365 * 24 * 60 * 60;
}
