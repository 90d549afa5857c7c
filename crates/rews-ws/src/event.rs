//! Events dispatched to socket subscribers.

use crate::message::Incoming;
use std::fmt;

/// Close code used when the transport vanished without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;
/// Close code reported when a close frame carried no status.
pub const NO_STATUS_RECEIVED: u16 = 1005;
/// Close code for an orderly shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close code sent when the peer stops answering heartbeat pings.
pub const HEARTBEAT_TIMEOUT_CODE: u16 = 4000;

/// Close details reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

impl CloseInfo {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Connection lost without a close handshake.
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(ABNORMAL_CLOSURE, reason)
    }

    pub fn is_normal(&self) -> bool {
        self.code == NORMAL_CLOSURE
    }
}

/// Event names subscribers can listen for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Message,
    Close,
    Error,
    /// Reconnect limit exhausted; the socket stays closed.
    GiveUp,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Open,
        EventKind::Message,
        EventKind::Close,
        EventKind::Error,
        EventKind::GiveUp,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Open => "open",
            EventKind::Message => "message",
            EventKind::Close => "close",
            EventKind::Error => "error",
            EventKind::GiveUp => "give-up",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event delivered to listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    /// A connection attempt succeeded.
    Open { generation: u64 },
    /// Application message (pong frames consumed by the heartbeat never show up here).
    Message(Incoming),
    Close(CloseInfo),
    /// Transport error description.
    Error(String),
    /// No further reconnects will be attempted.
    GiveUp { attempts: u32 },
}

impl SocketEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SocketEvent::Open { .. } => EventKind::Open,
            SocketEvent::Message(_) => EventKind::Message,
            SocketEvent::Close(_) => EventKind::Close,
            SocketEvent::Error(_) => EventKind::Error,
            SocketEvent::GiveUp { .. } => EventKind::GiveUp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_names() {
        let names: Vec<_> = EventKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(names, ["open", "message", "close", "error", "give-up"]);
    }

    #[test]
    fn test_close_info() {
        assert!(CloseInfo::new(1000, "bye").is_normal());
        let lost = CloseInfo::abnormal("reset by peer");
        assert_eq!(lost.code, 1006);
        assert!(!lost.is_normal());
    }
}
