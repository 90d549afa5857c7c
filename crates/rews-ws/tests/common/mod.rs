//! In-memory raw socket used to drive the connection state machine.

#![allow(dead_code)]

pub mod mock_server;

use parking_lot::Mutex;
use rews_ws::{
    CloseInfo, Connector, EventSink, Frame, RawEvent, RawSocket, SocketEvent, WsError, WsResult,
    ABNORMAL_CLOSURE,
};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct AttemptState {
    sent: Vec<Frame>,
    close_requests: Vec<(Option<u16>, Option<String>)>,
    closed: bool,
}

/// One connection attempt made through the mock connector.
#[derive(Clone)]
pub struct MockAttempt {
    pub endpoint: String,
    pub protocols: Vec<String>,
    sink: EventSink,
    state: Arc<Mutex<AttemptState>>,
}

impl MockAttempt {
    pub fn generation(&self) -> u64 {
        self.sink.generation()
    }

    pub fn open(&self) {
        self.sink.emit(RawEvent::Open);
    }

    pub fn text(&self, text: &str) {
        self.sink.emit(RawEvent::Message(Frame::Text(text.to_string())));
    }

    pub fn binary(&self, bytes: &[u8]) {
        self.sink.emit(RawEvent::Message(Frame::Binary(bytes.to_vec())));
    }

    /// Transport error followed by an abnormal close.
    pub fn fail(&self, error: &str) {
        self.state.lock().closed = true;
        self.sink.emit(RawEvent::Error(error.to_string()));
        self.sink.emit(RawEvent::Close(CloseInfo::abnormal(error)));
    }

    /// Peer closed the connection.
    pub fn remote_close(&self, code: u16, reason: &str) {
        self.state.lock().closed = true;
        self.sink.emit(RawEvent::Close(CloseInfo::new(code, reason)));
    }

    pub fn sent(&self) -> Vec<Frame> {
        self.state.lock().sent.clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|f| f.as_text().map(str::to_string))
            .collect()
    }

    pub fn close_requests(&self) -> Vec<(Option<u16>, Option<String>)> {
        self.state.lock().close_requests.clone()
    }
}

struct MockSocket {
    sink: EventSink,
    state: Arc<Mutex<AttemptState>>,
}

impl RawSocket for MockSocket {
    fn send(&mut self, frame: Frame) -> WsResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(WsError::SendFailed("mock socket closed".to_string()));
        }
        state.sent.push(frame);
        Ok(())
    }

    fn close(&mut self, code: Option<u16>, reason: Option<&str>) {
        let mut state = self.state.lock();
        state
            .close_requests
            .push((code, reason.map(str::to_string)));
        if !state.closed {
            state.closed = true;
            self.sink.emit(RawEvent::Close(CloseInfo::new(
                code.unwrap_or(ABNORMAL_CLOSURE),
                reason.unwrap_or_default(),
            )));
        }
    }
}

pub struct MockConnector {
    attempts_tx: mpsc::UnboundedSender<MockAttempt>,
    log: Arc<Mutex<Vec<MockAttempt>>>,
}

impl Connector for MockConnector {
    fn open(&self, endpoint: &str, protocols: &[String], sink: EventSink) -> Box<dyn RawSocket> {
        let state = Arc::new(Mutex::new(AttemptState::default()));
        let attempt = MockAttempt {
            endpoint: endpoint.to_string(),
            protocols: protocols.to_vec(),
            sink: sink.clone(),
            state: state.clone(),
        };
        self.log.lock().push(attempt.clone());
        let _ = self.attempts_tx.send(attempt);
        Box::new(MockSocket { sink, state })
    }
}

/// Test-side view of the connector.
pub struct MockHarness {
    attempts_rx: mpsc::UnboundedReceiver<MockAttempt>,
    log: Arc<Mutex<Vec<MockAttempt>>>,
}

impl MockHarness {
    /// Wait for the next connection attempt.
    pub async fn next_attempt(&mut self) -> MockAttempt {
        self.attempts_rx.recv().await.expect("connector dropped")
    }

    pub fn attempt_count(&self) -> usize {
        self.log.lock().len()
    }
}

pub fn mock_connector() -> (MockConnector, MockHarness) {
    let (attempts_tx, attempts_rx) = mpsc::unbounded_channel();
    let log = Arc::new(Mutex::new(Vec::new()));
    (
        MockConnector {
            attempts_tx,
            log: log.clone(),
        },
        MockHarness { attempts_rx, log },
    )
}

/// Let the connection task process everything queued so far.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Drain events received so far.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<SocketEvent>) -> Vec<SocketEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
