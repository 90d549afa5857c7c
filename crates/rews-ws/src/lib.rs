//! Resilient WebSocket client.
//!
//! Wraps a raw message socket with:
//! - Connect timeout detection
//! - Automatic reconnection with linear backoff and an optional attempt limit
//! - Application-level heartbeat (ping/pong) with forced reconnect on silence
//! - Buffering of outbound messages while disconnected, flushed in order on open
//! - Event dispatch (`open`, `message`, `close`, `error`, `give-up`) to listeners

pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod event_bus;
pub mod heartbeat;
pub mod message;
pub mod outbound;
pub mod reconnect;
pub mod transport;
pub mod tungstenite;

pub use config::SocketConfig;
pub use connection::{ConnectionState, ResilientSocket};
pub use error::{WsError, WsResult};
pub use event::{
    CloseInfo, EventKind, SocketEvent, ABNORMAL_CLOSURE, HEARTBEAT_TIMEOUT_CODE, NORMAL_CLOSURE,
};
pub use event_bus::{EventBus, ListenerId};
pub use heartbeat::{HeartbeatState, HeartbeatStats};
pub use message::{Frame, Incoming, Payload};
pub use reconnect::ReconnectPolicy;
pub use transport::{Connector, EventSink, RawEvent, RawSocket};
pub use tungstenite::TungsteniteConnector;

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Install the ring provider as the process-wide rustls default.
///
/// tokio-tungstenite builds its rustls client config from that default for
/// `wss://` endpoints. [`ResilientSocket::connect`] calls this; a provider
/// installed earlier by the application is left in place.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_crypto_installs_default_provider() {
        init_crypto();
        init_crypto();
        assert!(rustls::crypto::CryptoProvider::get_default().is_some());
    }
}
