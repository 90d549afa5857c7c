//! Application configuration.

use crate::error::{AppError, AppResult};
use rews_ws::SocketConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How inbound events are written to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One human-readable line per event.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// JSON messages sent after every successful open.
    #[serde(default)]
    pub subscribe: Vec<serde_json::Value>,
    #[serde(default)]
    pub output: OutputFormat,
    /// Session summary interval (seconds).
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
    /// Dump the Prometheus text exposition on exit.
    #[serde(default)]
    pub print_metrics_on_exit: bool,
    /// How long to wait for the close handshake on shutdown (ms).
    #[serde(default = "default_close_grace_ms")]
    pub close_grace_ms: u64,
    /// Socket settings, including the endpoint URL.
    pub socket: SocketConfig,
}

fn default_stats_interval_secs() -> u64 {
    3600
}

fn default_close_grace_ms() -> u64 {
    2_000
}

impl AppConfig {
    /// Configuration with defaults for everything but the endpoint.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            subscribe: Vec::new(),
            output: OutputFormat::default(),
            stats_interval_secs: default_stats_interval_secs(),
            print_metrics_on_exit: false,
            close_grace_ms: default_close_grace_ms(),
            socket: SocketConfig::new(url),
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Replace the endpoint URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.socket.url = url.into();
        self
    }

    pub fn validate(&self) -> AppResult<()> {
        self.socket.validate()?;
        if self.stats_interval_secs == 0 {
            return Err(AppError::Config(
                "stats_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}
