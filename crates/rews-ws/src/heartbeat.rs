//! Heartbeat monitoring for WebSocket connections.
//!
//! Application-level ping/pong: after `interval` without traffic a ping
//! payload is sent, and if the matching pong does not arrive within
//! `ack_timeout` the connection is considered dead.
//!
//! The monitor owns no timers. It tells the caller which timer to arm and
//! tags each one with a beat number; restarting the cycle bumps the beat, so
//! timers from an earlier cycle are ignored when they fire.

use crate::config::SocketConfig;
use crate::message::Frame;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::debug;

/// Heartbeat state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    /// No connection open.
    Idle,
    /// Waiting to send the next ping.
    AwaitingInterval,
    /// Ping sent, waiting for pong.
    AwaitingAck,
}

/// Which heartbeat timer to arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatTimerKind {
    Interval,
    Ack,
}

/// Timer request returned to the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatTimer {
    pub kind: HeartbeatTimerKind,
    pub beat: u64,
    pub delay: Duration,
}

/// Outcome of feeding an inbound frame to the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameVerdict {
    /// Pong consumed by the monitor; not forwarded to subscribers.
    Consumed,
    /// Application frame; forward it.
    Forward,
}

/// Heartbeat manager for WebSocket connection health.
pub struct HeartbeatMonitor {
    enabled: bool,
    /// Heartbeat interval (idle time before a ping).
    interval: Duration,
    /// Timeout (how long to wait for pong).
    ack_timeout: Duration,
    ping: String,
    pong: String,
    state: HeartbeatState,
    /// Current cycle; timers carrying an older beat are stale.
    beat: u64,
    /// Last ping sent time.
    last_ping: Option<DateTime<Utc>>,
    /// Last pong received time.
    last_pong: Option<DateTime<Utc>>,
    /// Last round trip measured.
    last_rtt_ms: Option<i64>,
}

impl HeartbeatMonitor {
    pub fn new(config: &SocketConfig) -> Self {
        Self {
            enabled: config.heartbeat_enabled,
            interval: config.heartbeat_interval(),
            ack_timeout: config.heartbeat_ack_timeout(),
            ping: config.ping_payload.clone(),
            pong: config.pong_payload.clone(),
            state: HeartbeatState::Idle,
            beat: 0,
            last_ping: None,
            last_pong: None,
            last_rtt_ms: None,
        }
    }

    pub fn state(&self) -> HeartbeatState {
        self.state
    }

    /// Enter `AwaitingInterval` and request the interval timer.
    ///
    /// Returns `None` when heartbeats are disabled.
    pub fn start(&mut self) -> Option<HeartbeatTimer> {
        if !self.enabled {
            return None;
        }
        self.beat += 1;
        self.state = HeartbeatState::AwaitingInterval;
        Some(HeartbeatTimer {
            kind: HeartbeatTimerKind::Interval,
            beat: self.beat,
            delay: self.interval,
        })
    }

    /// Interval timer fired. Returns the ping frame to send and the ack timer
    /// to arm, or `None` if the timer is stale.
    pub fn on_interval(&mut self, beat: u64) -> Option<(Frame, HeartbeatTimer)> {
        if beat != self.beat || self.state != HeartbeatState::AwaitingInterval {
            return None;
        }
        self.state = HeartbeatState::AwaitingAck;
        self.last_ping = Some(Utc::now());
        debug!(beat, "Sending heartbeat ping");
        Some((
            Frame::Text(self.ping.clone()),
            HeartbeatTimer {
                kind: HeartbeatTimerKind::Ack,
                beat,
                delay: self.ack_timeout,
            },
        ))
    }

    /// Ack timer fired. Returns true when the pong is overdue and the
    /// connection must be closed.
    pub fn on_ack_timeout(&mut self, beat: u64) -> bool {
        if beat != self.beat || self.state != HeartbeatState::AwaitingAck {
            return false;
        }
        self.state = HeartbeatState::Idle;
        true
    }

    /// Inspect an inbound frame.
    ///
    /// While a cycle is running any frame is liveness evidence and restarts
    /// it; the returned timer (if any) must be armed. The configured pong
    /// payload is always consumed when heartbeats are enabled, including
    /// late pongs that arrive after the monitor stopped.
    pub fn on_message(&mut self, frame: &Frame) -> (FrameVerdict, Option<HeartbeatTimer>) {
        if !self.enabled {
            return (FrameVerdict::Forward, None);
        }

        let is_pong = frame.as_text() == Some(self.pong.as_str());
        if is_pong && self.state != HeartbeatState::Idle {
            let now = Utc::now();
            self.last_pong = Some(now);
            if let Some(ping_time) = self.last_ping {
                let rtt_ms = (now - ping_time).num_milliseconds();
                self.last_rtt_ms = Some(rtt_ms);
                debug!(rtt_ms, "Received pong");
            }
        } else if is_pong {
            debug!("Dropping pong received after heartbeat stopped");
        }

        let timer = if self.state == HeartbeatState::Idle {
            None
        } else {
            self.start()
        };
        let verdict = if is_pong {
            FrameVerdict::Consumed
        } else {
            FrameVerdict::Forward
        };
        (verdict, timer)
    }

    /// Cancel both timers and return to `Idle`.
    pub fn stop(&mut self) {
        if self.state != HeartbeatState::Idle {
            debug!("Heartbeat stopped");
        }
        self.beat += 1;
        self.state = HeartbeatState::Idle;
    }

    /// Get heartbeat statistics.
    pub fn stats(&self) -> HeartbeatStats {
        HeartbeatStats {
            state: self.state,
            last_ping: self.last_ping,
            last_pong: self.last_pong,
            last_rtt_ms: self.last_rtt_ms,
        }
    }
}

/// Heartbeat statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatStats {
    pub state: HeartbeatState,
    pub last_ping: Option<DateTime<Utc>>,
    pub last_pong: Option<DateTime<Utc>>,
    pub last_rtt_ms: Option<i64>,
}

impl Default for HeartbeatStats {
    fn default() -> Self {
        Self {
            state: HeartbeatState::Idle,
            last_ping: None,
            last_pong: None,
            last_rtt_ms: None,
        }
    }
}
