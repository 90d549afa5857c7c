//! Wire frames, outbound payloads and inbound message decoding.

use crate::error::{WsError, WsResult};
use serde::Serialize;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

/// A single application frame as it travels over the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    /// Text content, if this is a text frame.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Frame::Text(text) => Some(text),
            Frame::Binary(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(bytes) => Message::Binary(bytes),
        }
    }
}

/// Outbound payload accepted by `ResilientSocket::send`.
///
/// Structured payloads are encoded to JSON text before they are either
/// transmitted or buffered.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
    Json(Value),
}

impl Payload {
    /// Encode into a wire frame.
    pub fn encode(self) -> WsResult<Frame> {
        match self {
            Payload::Text(text) => Ok(Frame::Text(text)),
            Payload::Binary(bytes) => Ok(Frame::Binary(bytes)),
            Payload::Json(value) => Ok(Frame::Text(serde_json::to_string(&value)?)),
        }
    }

    /// Build a JSON payload from any serializable value.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> WsResult<Self> {
        serde_json::to_value(value)
            .map(Payload::Json)
            .map_err(|e| WsError::Encode(e.to_string()))
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Binary(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Payload::Binary(bytes.to_vec())
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

/// Inbound application message delivered with the `message` event.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Text frame successfully decoded as JSON.
    Json(Value),
    /// Text frame delivered as-is (decoding disabled or failed).
    Text(String),
    Binary(Vec<u8>),
}

impl Incoming {
    /// Decode a frame. With `parse` set, text frames are decoded as JSON and
    /// fall back to raw text when the frame is not valid JSON.
    pub fn decode(frame: Frame, parse: bool) -> Self {
        match frame {
            Frame::Binary(bytes) => Incoming::Binary(bytes),
            Frame::Text(text) if parse => match serde_json::from_str::<Value>(&text) {
                Ok(value) => Incoming::Json(value),
                Err(e) => {
                    debug!(error = %e, "Inbound frame is not JSON, forwarding raw text");
                    Incoming::Text(text)
                }
            },
            Frame::Text(text) => Incoming::Text(text),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Incoming::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Incoming::Text(text) => Some(text),
            _ => None,
        }
    }
}
