//! Raw socket primitive consumed by the connection manager.
//!
//! A [`Connector`] opens one raw socket per connection attempt. The socket
//! reports what happens to it through the [`EventSink`] it was handed: exactly
//! one of `Open`/`Error` per attempt, `Message` for every inbound application
//! frame in receipt order, and finally exactly one `Close`.

use crate::connection::Signal;
use crate::error::WsResult;
use crate::event::CloseInfo;
use crate::message::Frame;
use tokio::sync::mpsc;

/// Event reported by a raw socket.
#[derive(Debug, Clone, PartialEq)]
pub enum RawEvent {
    Open,
    Message(Frame),
    Error(String),
    Close(CloseInfo),
}

/// Delivery point for one attempt's raw events.
///
/// Every event is stamped with the generation of the attempt that created the
/// sink; the connection manager drops events from superseded generations.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<Signal>,
}

impl EventSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<Signal>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report an event. Returns false once the socket has shut down.
    pub fn emit(&self, event: RawEvent) -> bool {
        self.tx
            .send(Signal::Transport {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// Opens raw sockets.
pub trait Connector: Send + Sync + 'static {
    /// Start a connection attempt. Must not block; progress is reported
    /// through `sink`.
    fn open(&self, endpoint: &str, protocols: &[String], sink: EventSink) -> Box<dyn RawSocket>;
}

/// One raw socket, owned by a single connection generation.
pub trait RawSocket: Send {
    /// Transmit a frame on an open socket.
    fn send(&mut self, frame: Frame) -> WsResult<()>;

    /// Close the socket, aborting the attempt if it is still connecting.
    /// A `Close` event follows eventually.
    fn close(&mut self, code: Option<u16>, reason: Option<&str>);
}
