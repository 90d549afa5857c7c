//! Socket configuration.

use crate::error::{WsError, WsResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Resilient socket configuration.
///
/// Every field except `url` has a default, so a TOML table with only
/// `url = "wss://..."` is a complete configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    /// WebSocket URL (`ws://` or `wss://`).
    pub url: String,
    /// Sub-protocols offered in the handshake, in preference order.
    #[serde(default)]
    pub protocols: Vec<String>,
    /// How long a connect attempt may take before it is aborted.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// How long to wait for the peer to answer our Close frame before the
    /// connection is dropped.
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
    /// Backoff step: attempt `n` waits `base * (n + 1)`.
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    /// Backoff ceiling.
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    /// Maximum reconnection attempts (None = unlimited).
    #[serde(default)]
    pub reconnect_limit: Option<u32>,
    /// Send application-level pings while open.
    #[serde(default)]
    pub heartbeat_enabled: bool,
    /// Idle time before a ping is sent.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// How long to wait for the pong before forcing a reconnect.
    #[serde(default = "default_heartbeat_ack_timeout_ms")]
    pub heartbeat_ack_timeout_ms: u64,
    #[serde(default = "default_ping_payload")]
    pub ping_payload: String,
    #[serde(default = "default_pong_payload")]
    pub pong_payload: String,
    /// Try to decode inbound text frames as JSON.
    #[serde(default = "default_parse_incoming")]
    pub parse_incoming: bool,
    /// Log every frame at debug level.
    #[serde(default)]
    pub debug: bool,
    /// Upper bound on frames buffered while disconnected (None = unbounded).
    /// When full, the oldest buffered frame is dropped.
    #[serde(default)]
    pub max_pending: Option<usize>,
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_close_timeout_ms() -> u64 {
    1_000
}

fn default_reconnect_base_delay_ms() -> u64 {
    2_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    60_000
}

fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

fn default_heartbeat_ack_timeout_ms() -> u64 {
    2_000
}

fn default_ping_payload() -> String {
    "ping".to_string()
}

fn default_pong_payload() -> String {
    "pong".to_string()
}

fn default_parse_incoming() -> bool {
    true
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            protocols: Vec::new(),
            connect_timeout_ms: default_connect_timeout_ms(),
            close_timeout_ms: default_close_timeout_ms(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            reconnect_limit: None,
            heartbeat_enabled: false,
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_ack_timeout_ms: default_heartbeat_ack_timeout_ms(),
            ping_payload: default_ping_payload(),
            pong_payload: default_pong_payload(),
            parse_incoming: default_parse_incoming(),
            debug: false,
            max_pending: None,
        }
    }
}

impl SocketConfig {
    /// Create a configuration for `url` with every other option defaulted.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Reject configurations the state machine cannot run with.
    pub fn validate(&self) -> WsResult<()> {
        if self.url.is_empty() {
            return Err(WsError::InvalidConfig("url is empty".to_string()));
        }
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(WsError::InvalidConfig(format!(
                "url must use ws:// or wss://, got {}",
                self.url
            )));
        }
        if self.connect_timeout_ms == 0 || self.close_timeout_ms == 0 {
            return Err(WsError::InvalidConfig(
                "connect and close timeouts must be positive".to_string(),
            ));
        }
        if self.reconnect_base_delay_ms > self.reconnect_max_delay_ms {
            return Err(WsError::InvalidConfig(format!(
                "reconnect_base_delay_ms ({}) exceeds reconnect_max_delay_ms ({})",
                self.reconnect_base_delay_ms, self.reconnect_max_delay_ms
            )));
        }
        if self.heartbeat_enabled {
            if self.heartbeat_interval_ms == 0 || self.heartbeat_ack_timeout_ms == 0 {
                return Err(WsError::InvalidConfig(
                    "heartbeat intervals must be positive".to_string(),
                ));
            }
            if self.ping_payload.is_empty() || self.pong_payload.is_empty() {
                return Err(WsError::InvalidConfig(
                    "heartbeat payloads must not be empty".to_string(),
                ));
            }
        }
        if self.max_pending == Some(0) {
            return Err(WsError::InvalidConfig(
                "max_pending must be positive when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ack_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SocketConfig::default();
        assert_eq!(config.connect_timeout_ms, 5000);
        assert_eq!(config.close_timeout_ms, 1000);
        assert_eq!(config.reconnect_base_delay_ms, 2000);
        assert_eq!(config.reconnect_max_delay_ms, 60000);
        assert_eq!(config.reconnect_limit, None); // Unlimited
        assert!(!config.heartbeat_enabled);
        assert_eq!(config.heartbeat_interval_ms, 10000);
        assert_eq!(config.heartbeat_ack_timeout_ms, 2000);
        assert_eq!(config.ping_payload, "ping");
        assert_eq!(config.pong_payload, "pong");
        assert!(config.parse_incoming);
        assert!(!config.debug);
    }

    #[test]
    fn test_toml_with_only_url_uses_defaults() {
        let config: SocketConfig = toml::from_str(r#"url = "wss://example.com/feed""#).unwrap();
        assert_eq!(config.url, "wss://example.com/feed");
        assert!(config.protocols.is_empty());
        assert_eq!(config.connect_timeout_ms, 5000);
        assert!(config.parse_incoming);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_overrides() {
        let raw = r#"
            url = "ws://localhost:8080"
            protocols = ["json", "v2"]
            reconnect_limit = 3
            heartbeat_enabled = true
            ping_payload = "{\"op\":\"ping\"}"
            pong_payload = "{\"op\":\"pong\"}"
            max_pending = 128
        "#;
        let config: SocketConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.protocols, vec!["json", "v2"]);
        assert_eq!(config.reconnect_limit, Some(3));
        assert!(config.heartbeat_enabled);
        assert_eq!(config.ping_payload, r#"{"op":"ping"}"#);
        assert_eq!(config.max_pending, Some(128));
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        assert!(SocketConfig::default().validate().is_err());
        assert!(SocketConfig::new("http://example.com").validate().is_err());
        assert!(SocketConfig::new("wss://example.com").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let mut config = SocketConfig::new("ws://localhost");
        config.reconnect_base_delay_ms = 10_000;
        config.reconnect_max_delay_ms = 1_000;
        assert!(matches!(
            config.validate(),
            Err(WsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_heartbeat_only_when_enabled() {
        let mut config = SocketConfig::new("ws://localhost");
        config.heartbeat_interval_ms = 0;
        assert!(config.validate().is_ok());

        config.heartbeat_enabled = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_close_timeout() {
        let mut config = SocketConfig::new("ws://localhost");
        config.close_timeout_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(WsError::InvalidConfig(_))
        ));
    }
}
