//! Prometheus metrics for resilient WebSocket clients.
//!
//! Covers:
//! - Connection state
//! - Reconnects and give-ups
//! - Message throughput in both directions
//! - Heartbeat round-trip time
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails,
//! it indicates a fatal configuration error (e.g., duplicate metric names)
//! that should cause an immediate crash at startup rather than silent failure.
//! These panics only occur during static initialization, never at runtime.

use crate::error::{TelemetryError, TelemetryResult};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram,
    register_int_counter, CounterVec, Encoder, Gauge, GaugeVec, Histogram, IntCounter,
    TextEncoder,
};

/// Label values of `rews_ws_state`.
pub const WS_STATES: [&str; 5] = ["connecting", "connected", "reconnecting", "closing", "closed"];

/// WebSocket connection state (1 = connected, 0 = disconnected).
pub static WS_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "rews_ws_connected",
        "WebSocket connection state (1=connected)"
    )
    .unwrap()
});

/// Connection state machine current state.
/// Labels: state (connecting/connected/reconnecting/closing/closed)
pub static WS_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "rews_ws_state",
        "WebSocket state machine current state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Successful opens, including the first one.
pub static WS_OPEN_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("rews_ws_open_total", "Total successful WebSocket opens").unwrap()
});

/// Total unplanned disconnects that lead to a reconnect.
pub static WS_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "rews_ws_reconnect_total",
        "Total WebSocket reconnections",
        &["reason"]
    )
    .unwrap()
});

/// Transport errors reported by the raw socket.
pub static WS_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("rews_ws_errors_total", "Total WebSocket transport errors").unwrap()
});

/// Sockets retired because the reconnect limit was exhausted.
pub static WS_GIVE_UP_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "rews_ws_give_up_total",
        "Total sockets retired after exhausting reconnect attempts"
    )
    .unwrap()
});

/// Messages handed to the socket for sending. Counted before the socket
/// decides to transmit, buffer or drop them.
/// Labels: kind (text/json/binary)
pub static WS_MSGS_QUEUED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "rews_ws_msgs_queued_total",
        "Total messages handed to the socket for sending",
        &["kind"]
    )
    .unwrap()
});

/// Messages delivered to listeners.
/// Labels: kind (text/json/binary)
pub static WS_MSGS_RECEIVED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "rews_ws_msgs_received_total",
        "Total WebSocket messages received",
        &["kind"]
    )
    .unwrap()
});

/// Heartbeat ping to pong round-trip time in milliseconds.
pub static HEARTBEAT_RTT_MS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "rews_heartbeat_rtt_ms",
        "Heartbeat round-trip time in milliseconds",
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2000.0]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Record WebSocket connected.
    pub fn ws_connected() {
        WS_CONNECTED.set(1.0);
        WS_OPEN_TOTAL.inc();
    }

    /// Record WebSocket disconnected.
    pub fn ws_disconnected() {
        WS_CONNECTED.set(0.0);
    }

    /// Set the state machine state.
    /// Only the active state is set to 1, all others to 0.
    pub fn ws_state_set(state: &str) {
        for s in &WS_STATES {
            WS_STATE.with_label_values(&[s]).set(0.0);
        }
        WS_STATE.with_label_values(&[state]).set(1.0);
    }

    /// Record WebSocket reconnection.
    pub fn ws_reconnect(reason: &str) {
        WS_RECONNECT_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn ws_error() {
        WS_ERRORS_TOTAL.inc();
    }

    pub fn ws_give_up() {
        WS_GIVE_UP_TOTAL.inc();
        WS_CONNECTED.set(0.0);
    }

    pub fn ws_msg_queued(kind: &str) {
        WS_MSGS_QUEUED_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn ws_msg_received(kind: &str) {
        WS_MSGS_RECEIVED_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn heartbeat_rtt(rtt_ms: f64) {
        HEARTBEAT_RTT_MS.observe(rtt_ms);
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn encode() -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&prometheus::gather(), &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_gauge_has_single_active_state() {
        Metrics::ws_state_set("reconnecting");
        Metrics::ws_state_set("connected");

        let active: Vec<_> = WS_STATES
            .iter()
            .filter(|s| WS_STATE.with_label_values(&[s]).get() == 1.0)
            .collect();
        assert_eq!(active, vec![&"connected"]);
    }

    #[test]
    fn test_counters_increment() {
        let before = WS_RECONNECT_TOTAL.with_label_values(&["heartbeat"]).get();
        Metrics::ws_reconnect("heartbeat");
        Metrics::ws_reconnect("heartbeat");
        let after = WS_RECONNECT_TOTAL.with_label_values(&["heartbeat"]).get();
        assert_eq!(after - before, 2.0);

        let before = WS_MSGS_RECEIVED_TOTAL.with_label_values(&["json"]).get();
        Metrics::ws_msg_received("json");
        assert_eq!(
            WS_MSGS_RECEIVED_TOTAL.with_label_values(&["json"]).get() - before,
            1.0
        );
    }

    #[test]
    fn test_encode_contains_registered_metrics() {
        Metrics::ws_msg_queued("text");
        Metrics::heartbeat_rtt(12.0);

        let text = Metrics::encode().unwrap();
        assert!(text.contains("rews_ws_msgs_queued_total"));
        assert!(text.contains("rews_heartbeat_rtt_ms_bucket"));
    }
}
