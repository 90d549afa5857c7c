//! Reconnect policy: linear backoff capped at a ceiling, optional attempt limit.

use crate::config::SocketConfig;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    base_delay_ms: u64,
    max_delay_ms: u64,
    /// None = unlimited.
    limit: Option<u32>,
}

impl ReconnectPolicy {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64, limit: Option<u32>) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            limit,
        }
    }

    pub fn from_config(config: &SocketConfig) -> Self {
        Self::new(
            config.reconnect_base_delay_ms,
            config.reconnect_max_delay_ms,
            config.reconnect_limit,
        )
    }

    /// Whether another attempt is permitted after `attempts` reconnects.
    pub fn should_retry(&self, attempts: u32) -> bool {
        self.limit.map_or(true, |limit| attempts < limit)
    }

    /// Delay before the next attempt: `min(base * (attempts + 1), max)`.
    pub fn delay(&self, attempts: u32) -> Duration {
        let steps = u64::from(attempts) + 1;
        let delay = self.base_delay_ms.saturating_mul(steps).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}
