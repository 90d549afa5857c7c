//! Raw socket implementation on top of tokio-tungstenite.
//!
//! Each attempt runs in its own task. The returned [`RawSocket`] handle only
//! talks to that task through a channel, so dropping the handle (which the
//! connection manager does when it replaces the socket) shuts the task down.

use crate::error::{WsError, WsResult};
use crate::event::{CloseInfo, HEARTBEAT_TIMEOUT_CODE, NO_STATUS_RECEIVED};
use crate::message::Frame;
use crate::transport::{Connector, EventSink, RawEvent, RawSocket};
use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

enum Outbound {
    Frame(Frame),
    Close(Option<CloseFrame<'static>>),
}

const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_millis(1_000);

/// Opens sockets with `connect_async_tls_with_config`.
///
/// `wss://` endpoints go through rustls with the webpki root store.
#[derive(Debug, Clone, Copy)]
pub struct TungsteniteConnector {
    /// Bound on the close handshake; a peer that does not answer our Close
    /// frame within it is dropped.
    close_timeout: Duration,
}

impl TungsteniteConnector {
    pub fn new(close_timeout: Duration) -> Self {
        Self { close_timeout }
    }
}

impl Default for TungsteniteConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CLOSE_TIMEOUT)
    }
}

impl Connector for TungsteniteConnector {
    fn open(&self, endpoint: &str, protocols: &[String], sink: EventSink) -> Box<dyn RawSocket> {
        let (tx, rx) = mpsc::unbounded_channel();
        let abort = CancellationToken::new();

        tokio::spawn(run_socket(
            endpoint.to_string(),
            protocols.to_vec(),
            sink,
            rx,
            abort.clone(),
            self.close_timeout,
        ));

        Box::new(TungsteniteSocket { tx, abort })
    }
}

struct TungsteniteSocket {
    tx: mpsc::UnboundedSender<Outbound>,
    /// Cancels a still-pending handshake.
    abort: CancellationToken,
}

impl RawSocket for TungsteniteSocket {
    fn send(&mut self, frame: Frame) -> WsResult<()> {
        self.tx
            .send(Outbound::Frame(frame))
            .map_err(|_| WsError::SendFailed("socket task has exited".to_string()))
    }

    fn close(&mut self, code: Option<u16>, reason: Option<&str>) {
        self.abort.cancel();
        let frame = code.map(|code| CloseFrame {
            code: CloseCode::from(code),
            reason: Cow::Owned(reason.unwrap_or_default().to_string()),
        });
        let _ = self.tx.send(Outbound::Close(frame));
    }
}

/// Build the handshake request, offering `protocols` via `Sec-WebSocket-Protocol`.
pub fn build_request(endpoint: &str, protocols: &[String]) -> WsResult<Request> {
    let mut request = endpoint.into_client_request()?;
    if !protocols.is_empty() {
        let value = HeaderValue::from_str(&protocols.join(", "))
            .map_err(|e| WsError::ConnectionFailed(format!("invalid sub-protocol list: {e}")))?;
        request.headers_mut().insert("Sec-WebSocket-Protocol", value);
    }
    Ok(request)
}

async fn run_socket(
    endpoint: String,
    protocols: Vec<String>,
    sink: EventSink,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    abort: CancellationToken,
    close_timeout: Duration,
) {
    let request = match build_request(&endpoint, &protocols) {
        Ok(request) => request,
        Err(e) => {
            sink.emit(RawEvent::Error(e.to_string()));
            sink.emit(RawEvent::Close(CloseInfo::abnormal("invalid request")));
            return;
        }
    };

    debug!(url = %endpoint, generation = sink.generation(), "Opening WebSocket");

    // TCP_NODELAY for lower latency
    let ws_stream = tokio::select! {
        () = abort.cancelled() => {
            sink.emit(RawEvent::Close(CloseInfo::abnormal("connect aborted")));
            return;
        }
        result = connect_async_tls_with_config(request, None, true, None) => match result {
            Ok((stream, _response)) => stream,
            Err(e) => {
                sink.emit(RawEvent::Error(e.to_string()));
                sink.emit(RawEvent::Close(CloseInfo::abnormal("connect failed")));
                return;
            }
        },
    };

    sink.emit(RawEvent::Open);
    let (mut write, mut read) = ws_stream.split();
    let mut close_info: Option<CloseInfo> = None;
    // Our own close, reported if the peer drops without answering it.
    let mut requested: Option<CloseInfo> = None;
    // Armed once either side starts the close handshake.
    let mut closing = false;
    let close_deadline = tokio::time::sleep(close_timeout);
    tokio::pin!(close_deadline);

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        sink.emit(RawEvent::Message(Frame::Text(text)));
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        sink.emit(RawEvent::Message(Frame::Binary(bytes)));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        // Keep reading so tungstenite can finish the close handshake.
                        let info = frame
                            .map(|f| CloseInfo::new(f.code.into(), f.reason.to_string()))
                            .unwrap_or_else(|| CloseInfo::new(NO_STATUS_RECEIVED, ""));
                        debug!(code = info.code, reason = %info.reason, "Close frame received");
                        close_info = Some(info);
                        if !closing {
                            closing = true;
                            close_deadline.as_mut().reset(Instant::now() + close_timeout);
                        }
                    }
                    // Protocol ping/pong is answered by tungstenite itself.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        if let Some(info) = close_info.take().or_else(|| requested.take()) {
                            sink.emit(RawEvent::Close(info));
                        } else {
                            warn!(error = %e, "WebSocket read error");
                            sink.emit(RawEvent::Error(e.to_string()));
                            sink.emit(RawEvent::Close(CloseInfo::abnormal(e.to_string())));
                        }
                        return;
                    }
                    None => {
                        let info = close_info
                            .take()
                            .or_else(|| requested.take())
                            .unwrap_or_else(|| CloseInfo::abnormal("stream ended"));
                        sink.emit(RawEvent::Close(info));
                        return;
                    }
                }
            }

            () = &mut close_deadline, if closing => {
                debug!(
                    timeout_ms = close_timeout.as_millis() as u64,
                    "Close handshake timed out, dropping connection"
                );
                let info = close_info
                    .take()
                    .or_else(|| requested.take())
                    .unwrap_or_else(|| CloseInfo::abnormal("close handshake timed out"));
                sink.emit(RawEvent::Close(info));
                return;
            }

            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(Outbound::Frame(frame)) => {
                        if let Err(e) = write.send(frame.into()).await {
                            warn!(error = %e, "WebSocket write error");
                            sink.emit(RawEvent::Error(e.to_string()));
                            sink.emit(RawEvent::Close(CloseInfo::abnormal(e.to_string())));
                            return;
                        }
                    }
                    Some(Outbound::Close(frame)) => {
                        if requested.is_some() {
                            continue;
                        }
                        let info = match &frame {
                            Some(f) => CloseInfo::new(f.code.into(), f.reason.to_string()),
                            None => CloseInfo::new(NO_STATUS_RECEIVED, ""),
                        };
                        let sent = match timeout(close_timeout, write.send(Message::Close(frame))).await {
                            Ok(Ok(())) => true,
                            Ok(Err(e)) => {
                                debug!(error = %e, "Failed to send Close frame");
                                false
                            }
                            Err(_) => {
                                debug!("Timed out sending Close frame");
                                false
                            }
                        };
                        // A peer that missed its heartbeat is not waited on.
                        if !sent || info.code == HEARTBEAT_TIMEOUT_CODE {
                            sink.emit(RawEvent::Close(close_info.take().unwrap_or(info)));
                            return;
                        }
                        requested = Some(info);
                        if !closing {
                            closing = true;
                            close_deadline.as_mut().reset(Instant::now() + close_timeout);
                        }
                    }
                    None => {
                        // Handle dropped: the socket belongs to a superseded generation.
                        let _ = timeout(close_timeout, write.send(Message::Close(None))).await;
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_without_protocols() {
        let request = build_request("ws://localhost:9001/feed", &[]).unwrap();
        assert_eq!(request.uri(), "ws://localhost:9001/feed");
        assert!(request.headers().get("Sec-WebSocket-Protocol").is_none());
    }

    #[test]
    fn test_build_request_offers_protocols_in_order() {
        let protocols = vec!["v2.json".to_string(), "v1.json".to_string()];
        let request = build_request("wss://example.com", &protocols).unwrap();
        assert_eq!(
            request.headers().get("Sec-WebSocket-Protocol").unwrap(),
            "v2.json, v1.json"
        );
    }

    #[test]
    fn test_build_request_rejects_bad_url() {
        assert!(build_request("not a url", &[]).is_err());
    }

    #[test]
    fn test_default_close_timeout() {
        assert_eq!(
            TungsteniteConnector::default().close_timeout,
            Duration::from_millis(1_000)
        );
    }

    #[test]
    fn test_frame_into_message() {
        assert_eq!(Message::from(Frame::Text("hi".into())), Message::Text("hi".into()));
        assert_eq!(Message::from(Frame::Binary(vec![1])), Message::Binary(vec![1]));
    }
}
