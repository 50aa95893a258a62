//! WebSocket server configuration
//!
//! Every field can be overridden by an `ECHOWS_*` environment variable; see
//! [`WebSocketServerConfig::from_env`].

use super::defaults::WebSocketDefaults;
use echows_core::{
    parse_env_or, parse_optional_env, AppConfigTrait, ConfigError, ConfigSource, ConfigValidator,
    LengthValidator, NonZeroValidator, RangeValidator,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// WebSocket server specific configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSocketServerConfig {
    /// Bind address
    pub host: String,
    /// Listen port (0 picks an ephemeral port)
    pub port: u16,
    /// Close a connection when no frame arrives within this many seconds
    pub idle_timeout_secs: Option<u64>,
    /// Send a keepalive ping at this interval
    pub ping_interval_secs: Option<u64>,
    /// Reassembly cap for fragmented messages
    pub max_message_bytes: usize,
    /// Largest single frame payload accepted
    pub max_frame_bytes: usize,
    /// Largest HTTP upgrade request accepted
    pub max_handshake_bytes: usize,
    /// Time allowed for the client to send its upgrade request
    pub handshake_timeout_secs: u64,
    /// Time to wait for the peer's close frame after sending ours
    pub close_timeout_secs: u64,
    /// Frames that may wait in a connection's outbound queue
    pub outbound_queue_capacity: usize,
    /// Time given to connections to finish during shutdown
    pub shutdown_timeout_secs: u64,
}

impl Default for WebSocketServerConfig {
    fn default() -> Self {
        Self {
            host: WebSocketDefaults::HOST.to_string(),
            port: WebSocketDefaults::PORT,
            idle_timeout_secs: None,
            ping_interval_secs: None,
            max_message_bytes: WebSocketDefaults::MAX_MESSAGE_BYTES,
            max_frame_bytes: WebSocketDefaults::MAX_FRAME_BYTES,
            max_handshake_bytes: WebSocketDefaults::MAX_HANDSHAKE_BYTES,
            handshake_timeout_secs: WebSocketDefaults::HANDSHAKE_TIMEOUT_SECS,
            close_timeout_secs: WebSocketDefaults::CLOSE_TIMEOUT_SECS,
            outbound_queue_capacity: WebSocketDefaults::OUTBOUND_QUEUE_CAPACITY,
            shutdown_timeout_secs: WebSocketDefaults::SHUTDOWN_TIMEOUT_SECS,
        }
    }
}

impl AppConfigTrait for WebSocketServerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        LengthValidator::min("host", 1).validate(&self.host)?;

        NonZeroValidator::new("max_message_bytes").validate(&self.max_message_bytes)?;
        NonZeroValidator::new("max_frame_bytes").validate(&self.max_frame_bytes)?;
        NonZeroValidator::new("max_handshake_bytes").validate(&self.max_handshake_bytes)?;
        NonZeroValidator::new("outbound_queue_capacity").validate(&self.outbound_queue_capacity)?;

        let timeouts = [
            ("handshake_timeout_secs", Some(self.handshake_timeout_secs)),
            ("close_timeout_secs", Some(self.close_timeout_secs)),
            ("shutdown_timeout_secs", Some(self.shutdown_timeout_secs)),
            ("idle_timeout_secs", self.idle_timeout_secs),
            ("ping_interval_secs", self.ping_interval_secs),
        ];
        for (field, value) in timeouts {
            if let Some(secs) = value {
                RangeValidator::new(field, 1, WebSocketDefaults::MAX_TIMEOUT_SECS).validate(&secs)?;
            }
        }

        if self.max_frame_bytes > self.max_message_bytes {
            return Err(ConfigError::validation_failed(
                "max_frame_bytes must not exceed max_message_bytes",
            ));
        }

        Ok(())
    }

    fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            host: parse_env_or(
                "ECHOWS_HOST",
                "host",
                WebSocketDefaults::HOST.to_string(),
                "bind address",
            )?,
            port: parse_env_or(
                "ECHOWS_PORT",
                "port",
                WebSocketDefaults::PORT,
                "valid port number (0-65535)",
            )?,
            idle_timeout_secs: parse_optional_env(
                "ECHOWS_IDLE_TIMEOUT",
                "idle_timeout_secs",
                None,
                "valid number of seconds",
            )?,
            ping_interval_secs: parse_optional_env(
                "ECHOWS_PING_INTERVAL",
                "ping_interval_secs",
                None,
                "valid number of seconds",
            )?,
            max_message_bytes: parse_env_or(
                "ECHOWS_MAX_MESSAGE_BYTES",
                "max_message_bytes",
                WebSocketDefaults::MAX_MESSAGE_BYTES,
                "valid number of bytes",
            )?,
            max_frame_bytes: parse_env_or(
                "ECHOWS_MAX_FRAME_BYTES",
                "max_frame_bytes",
                WebSocketDefaults::MAX_FRAME_BYTES,
                "valid number of bytes",
            )?,
            max_handshake_bytes: parse_env_or(
                "ECHOWS_MAX_HANDSHAKE_BYTES",
                "max_handshake_bytes",
                WebSocketDefaults::MAX_HANDSHAKE_BYTES,
                "valid number of bytes",
            )?,
            handshake_timeout_secs: parse_env_or(
                "ECHOWS_HANDSHAKE_TIMEOUT",
                "handshake_timeout_secs",
                WebSocketDefaults::HANDSHAKE_TIMEOUT_SECS,
                "valid number of seconds",
            )?,
            close_timeout_secs: parse_env_or(
                "ECHOWS_CLOSE_TIMEOUT",
                "close_timeout_secs",
                WebSocketDefaults::CLOSE_TIMEOUT_SECS,
                "valid number of seconds",
            )?,
            outbound_queue_capacity: parse_env_or(
                "ECHOWS_OUTBOUND_QUEUE",
                "outbound_queue_capacity",
                WebSocketDefaults::OUTBOUND_QUEUE_CAPACITY,
                "valid number of frames",
            )?,
            shutdown_timeout_secs: parse_env_or(
                "ECHOWS_SHUTDOWN_TIMEOUT",
                "shutdown_timeout_secs",
                WebSocketDefaults::SHUTDOWN_TIMEOUT_SECS,
                "valid number of seconds",
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    fn config_sources(&self) -> HashMap<String, ConfigSource> {
        let fields = [
            ("host", "ECHOWS_HOST", WebSocketDefaults::HOST.to_string()),
            ("port", "ECHOWS_PORT", WebSocketDefaults::PORT.to_string()),
            ("idle_timeout_secs", "ECHOWS_IDLE_TIMEOUT", "disabled".to_string()),
            ("ping_interval_secs", "ECHOWS_PING_INTERVAL", "disabled".to_string()),
            (
                "max_message_bytes",
                "ECHOWS_MAX_MESSAGE_BYTES",
                WebSocketDefaults::MAX_MESSAGE_BYTES.to_string(),
            ),
            (
                "max_frame_bytes",
                "ECHOWS_MAX_FRAME_BYTES",
                WebSocketDefaults::MAX_FRAME_BYTES.to_string(),
            ),
            (
                "max_handshake_bytes",
                "ECHOWS_MAX_HANDSHAKE_BYTES",
                WebSocketDefaults::MAX_HANDSHAKE_BYTES.to_string(),
            ),
            (
                "handshake_timeout_secs",
                "ECHOWS_HANDSHAKE_TIMEOUT",
                WebSocketDefaults::HANDSHAKE_TIMEOUT_SECS.to_string(),
            ),
            (
                "close_timeout_secs",
                "ECHOWS_CLOSE_TIMEOUT",
                WebSocketDefaults::CLOSE_TIMEOUT_SECS.to_string(),
            ),
            (
                "outbound_queue_capacity",
                "ECHOWS_OUTBOUND_QUEUE",
                WebSocketDefaults::OUTBOUND_QUEUE_CAPACITY.to_string(),
            ),
            (
                "shutdown_timeout_secs",
                "ECHOWS_SHUTDOWN_TIMEOUT",
                WebSocketDefaults::SHUTDOWN_TIMEOUT_SECS.to_string(),
            ),
        ];

        fields
            .into_iter()
            .map(|(field, var, default)| {
                (field.to_string(), ConfigSource::env_or_default(var, default))
            })
            .collect()
    }
}

impl WebSocketServerConfig {
    /// `host:port` string for binding
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    pub fn ping_interval(&self) -> Option<Duration> {
        self.ping_interval_secs.map(Duration::from_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const VARS: [&str; 6] = [
        "ECHOWS_HOST",
        "ECHOWS_PORT",
        "ECHOWS_IDLE_TIMEOUT",
        "ECHOWS_MAX_MESSAGE_BYTES",
        "ECHOWS_MAX_FRAME_BYTES",
        "ECHOWS_SHUTDOWN_TIMEOUT",
    ];

    fn clean_test_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = WebSocketServerConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.bind_address(), "0.0.0.0:9001");
        assert_eq!(config.idle_timeout(), None);
        assert_eq!(
            config.shutdown_timeout(),
            Duration::from_secs(WebSocketDefaults::SHUTDOWN_TIMEOUT_SECS)
        );
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clean_test_env();
        env::set_var("ECHOWS_HOST", "127.0.0.1");
        env::set_var("ECHOWS_PORT", "8765");
        env::set_var("ECHOWS_IDLE_TIMEOUT", "30");
        env::set_var("ECHOWS_MAX_MESSAGE_BYTES", "1048576");
        env::set_var("ECHOWS_MAX_FRAME_BYTES", "65536");

        let config = WebSocketServerConfig::from_env().unwrap();
        assert_eq!(config.bind_address(), "127.0.0.1:8765");
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.max_message_bytes, 1_048_576);
        assert_eq!(config.max_frame_bytes, 65_536);

        let sources = config.config_sources();
        assert!(sources["port"].is_env_var());
        assert!(sources["close_timeout_secs"].is_default());

        clean_test_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_garbage() {
        clean_test_env();
        env::set_var("ECHOWS_PORT", "ninety-oh-oh-one");

        let err = WebSocketServerConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "port"));

        clean_test_env();
    }

    #[test]
    fn test_validation() {
        let mut config = WebSocketServerConfig {
            max_frame_bytes: 2048,
            max_message_bytes: 1024,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.max_frame_bytes = 1024;
        config.idle_timeout_secs = Some(0);
        assert!(config.validate().is_err());

        config.idle_timeout_secs = None;
        config.host = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeouts_are_capped() {
        let within = WebSocketServerConfig {
            idle_timeout_secs: Some(WebSocketDefaults::MAX_TIMEOUT_SECS),
            ..Default::default()
        };
        assert!(within.validate().is_ok());

        for config in [
            WebSocketServerConfig {
                idle_timeout_secs: Some(u64::MAX),
                ..Default::default()
            },
            WebSocketServerConfig {
                ping_interval_secs: Some(WebSocketDefaults::MAX_TIMEOUT_SECS + 1),
                ..Default::default()
            },
            WebSocketServerConfig {
                close_timeout_secs: u64::MAX,
                ..Default::default()
            },
        ] {
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidValue { .. })
            ));
        }
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_huge_idle_timeout() {
        clean_test_env();
        env::set_var("ECHOWS_IDLE_TIMEOUT", u64::MAX.to_string());

        let err = WebSocketServerConfig::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref field, .. } if field == "idle_timeout_secs"
        ));

        clean_test_env();
    }
}
