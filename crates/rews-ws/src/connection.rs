//! WebSocket connection manager.
//!
//! Handles connection lifecycle, automatic reconnection with linear backoff,
//! heartbeat supervision and buffering of outbound frames while disconnected.
//!
//! All state lives in a single task. Caller handles, raw socket callbacks and
//! timers post into that task's queue and are processed one at a time, so the
//! state machine needs no locking. Every raw event and timer is stamped with
//! the connection generation that produced it; once a newer generation has
//! started, anything stamped with an older one is ignored.

use crate::config::SocketConfig;
use crate::error::{WsError, WsResult};
use crate::event::{CloseInfo, EventKind, SocketEvent, HEARTBEAT_TIMEOUT_CODE, NORMAL_CLOSURE};
use crate::event_bus::{EventBus, ListenerId};
use crate::heartbeat::{FrameVerdict, HeartbeatMonitor, HeartbeatStats, HeartbeatTimer, HeartbeatTimerKind};
use crate::message::{Frame, Incoming, Payload};
use crate::outbound::OutboundBuffer;
use crate::reconnect::ReconnectPolicy;
use crate::transport::{Connector, EventSink, RawEvent, RawSocket};
use crate::tungstenite::TungsteniteConnector;
use futures_util::StreamExt;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::time::delay_queue::{self, DelayQueue};
use tracing::{debug, error, info, warn};

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the raw socket to open.
    Connecting,
    Connected,
    /// Waiting out the backoff delay before the next attempt.
    Reconnecting,
    /// Close requested by the user or after a heartbeat timeout, waiting for
    /// the transport to confirm.
    Closing,
    /// Retired: closed by the user or reconnect limit exhausted.
    Closed,
}

/// Work item for the connection task.
#[derive(Debug)]
pub(crate) enum Signal {
    Command(Command),
    Transport { generation: u64, event: RawEvent },
}

#[derive(Debug)]
pub(crate) enum Command {
    Send(Frame),
    Close { code: u16, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    ConnectTimeout,
    Reconnect,
    Heartbeat(HeartbeatTimerKind, u64),
}

#[derive(Debug, Clone, Copy)]
struct TimerEntry {
    generation: u64,
    kind: TimerKind,
}

/// Status readable from any handle.
#[derive(Debug)]
struct SocketStatus {
    state: RwLock<ConnectionState>,
    reconnect_attempts: RwLock<u32>,
    generation: RwLock<u64>,
    pending: RwLock<usize>,
    heartbeat: RwLock<HeartbeatStats>,
}

impl SocketStatus {
    fn new() -> Self {
        Self {
            state: RwLock::new(ConnectionState::Connecting),
            reconnect_attempts: RwLock::new(0),
            generation: RwLock::new(0),
            pending: RwLock::new(0),
            heartbeat: RwLock::new(HeartbeatStats::default()),
        }
    }
}

type SocketEventBus = EventBus<EventKind, SocketEvent>;

/// The state machine driving one resilient socket.
struct ConnectionManager {
    config: SocketConfig,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    heartbeat: HeartbeatMonitor,
    pending: OutboundBuffer,
    events: Arc<SocketEventBus>,
    status: Arc<SocketStatus>,
    signal_tx: mpsc::UnboundedSender<Signal>,
    signal_rx: mpsc::UnboundedReceiver<Signal>,
    timers: DelayQueue<TimerEntry>,
    /// Only one heartbeat timer is queued at a time.
    heartbeat_key: Option<delay_queue::Key>,
    state: ConnectionState,
    generation: u64,
    reconnect_attempts: u32,
    user_closed: bool,
    /// Reconnect limit reached; retire once the raw socket is gone.
    exhausted: bool,
    give_up_sent: bool,
    /// Raw socket of the current generation.
    raw: Option<Box<dyn RawSocket>>,
    /// The current raw socket reported open and is usable for sends.
    is_open: bool,
    /// Generation for which a retry timer is already armed.
    retry_scheduled: Option<u64>,
}

impl ConnectionManager {
    fn new(
        config: SocketConfig,
        connector: Arc<dyn Connector>,
        events: Arc<SocketEventBus>,
        status: Arc<SocketStatus>,
        signal_tx: mpsc::UnboundedSender<Signal>,
        signal_rx: mpsc::UnboundedReceiver<Signal>,
    ) -> Self {
        Self {
            policy: ReconnectPolicy::from_config(&config),
            heartbeat: HeartbeatMonitor::new(&config),
            pending: OutboundBuffer::new(config.max_pending),
            config,
            connector,
            events,
            status,
            signal_tx,
            signal_rx,
            timers: DelayQueue::new(),
            heartbeat_key: None,
            state: ConnectionState::Connecting,
            generation: 0,
            reconnect_attempts: 0,
            user_closed: false,
            exhausted: false,
            give_up_sent: false,
            raw: None,
            is_open: false,
            retry_scheduled: None,
        }
    }

    async fn run(mut self, finished: CancellationToken) {
        self.connect();

        while !self.is_finished() {
            tokio::select! {
                signal = self.signal_rx.recv() => {
                    match signal {
                        Some(signal) => self.handle_signal(signal),
                        None => break,
                    }
                }
                Some(expired) = self.timers.next(), if !self.timers.is_empty() => {
                    if self.heartbeat_key == Some(expired.key()) {
                        self.heartbeat_key = None;
                    }
                    self.handle_timer(expired.into_inner());
                }
            }
        }

        self.set_state(ConnectionState::Closed);
        info!(url = %self.config.url, "Resilient socket retired");
        finished.cancel();
    }

    fn is_finished(&self) -> bool {
        (self.user_closed || self.exhausted) && self.raw.is_none()
    }

    // ------------------------------------------------------------------
    // Connection manager
    // ------------------------------------------------------------------

    fn connect(&mut self) {
        self.generation += 1;
        self.is_open = false;
        *self.status.generation.write() = self.generation;
        self.set_state(ConnectionState::Connecting);

        info!(
            url = %self.config.url,
            generation = self.generation,
            attempt = self.reconnect_attempts,
            "Connecting to WebSocket"
        );

        let sink = EventSink::new(self.generation, self.signal_tx.clone());
        // Replacing the socket drops the previous generation's handle.
        self.raw = Some(
            self.connector
                .open(&self.config.url, &self.config.protocols, sink),
        );
        self.arm(TimerKind::ConnectTimeout, self.config.connect_timeout());
    }

    fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Command(Command::Send(frame)) => self.send(frame),
            Signal::Command(Command::Close { code, reason }) => self.close(code, &reason),
            Signal::Transport { generation, event } => {
                if generation != self.generation {
                    debug!(generation, current = self.generation, "Ignoring stale transport event");
                    return;
                }
                match event {
                    RawEvent::Open => self.on_open(),
                    RawEvent::Message(frame) => self.on_message(frame),
                    RawEvent::Error(error) => self.on_error(error),
                    RawEvent::Close(info) => self.on_close(info),
                }
            }
        }
    }

    fn on_open(&mut self) {
        match self.state {
            ConnectionState::Connecting => {}
            ConnectionState::Closing => {
                // close() raced the handshake
                if let Some(raw) = self.raw.as_mut() {
                    raw.close(Some(NORMAL_CLOSURE), Some("closed by user"));
                }
                return;
            }
            state => {
                debug!(?state, "Ignoring open for an abandoned attempt");
                return;
            }
        }

        self.is_open = true;
        self.reconnect_attempts = 0;
        *self.status.reconnect_attempts.write() = 0;
        self.set_state(ConnectionState::Connected);
        info!(url = %self.config.url, generation = self.generation, "WebSocket connected");

        self.dispatch(SocketEvent::Open {
            generation: self.generation,
        });

        if let Some(timer) = self.heartbeat.start() {
            self.arm_heartbeat(timer);
        }

        self.flush();
    }

    fn on_message(&mut self, frame: Frame) {
        if self.config.debug {
            debug!(generation = self.generation, ?frame, "WebSocket message");
        }

        let (verdict, timer) = self.heartbeat.on_message(&frame);
        if let Some(timer) = timer {
            self.arm_heartbeat(timer);
        }
        if verdict == FrameVerdict::Consumed {
            self.sync_heartbeat_stats();
            return;
        }

        let incoming = Incoming::decode(frame, self.config.parse_incoming);
        self.dispatch(SocketEvent::Message(incoming));
    }

    fn on_error(&mut self, error: String) {
        warn!(generation = self.generation, %error, "WebSocket error");
        self.stop_heartbeat();
        self.is_open = false;

        self.dispatch(SocketEvent::Error(error));

        if !self.user_closed {
            self.schedule_retry("error");
        }
    }

    fn on_close(&mut self, info: CloseInfo) {
        self.stop_heartbeat();
        self.is_open = false;
        self.raw = None;

        if info.is_normal() || self.user_closed {
            info!(code = info.code, reason = %info.reason, "WebSocket closed");
        } else {
            warn!(code = info.code, reason = %info.reason, "WebSocket closed abnormally");
        }

        self.dispatch(SocketEvent::Close(info));

        if self.exhausted {
            self.give_up();
        } else if !self.user_closed {
            self.schedule_retry("close");
        }
    }

    fn send(&mut self, frame: Frame) {
        if self.user_closed || self.exhausted {
            warn!("Socket is closed, dropping message");
            return;
        }

        if !self.is_open {
            debug!(state = ?self.state, "Not connected, buffering message");
            self.buffer(frame);
            return;
        }

        if self.config.debug {
            debug!(?frame, "Sending frame");
        }
        if let Err(e) = self.transmit(frame.clone()) {
            warn!(error = %e, "Send failed, buffering until reconnect");
            self.is_open = false;
            self.buffer(frame);
        }
    }

    fn close(&mut self, code: u16, reason: &str) {
        if self.user_closed {
            debug!("Close already requested");
            return;
        }
        self.user_closed = true;
        self.stop_heartbeat();
        self.is_open = false;
        info!(code, reason, "Closing WebSocket");

        if !self.pending.is_empty() {
            warn!(count = self.pending.len(), "Discarding buffered messages on close");
            self.pending.clear();
            self.sync_pending();
        }

        if self.raw.is_none() {
            self.set_state(ConnectionState::Closed);
            return;
        }
        self.set_state(ConnectionState::Closing);
        if let Some(raw) = self.raw.as_mut() {
            raw.close(Some(code), Some(reason));
        }
    }

    fn transmit(&mut self, frame: Frame) -> WsResult<()> {
        match self.raw.as_mut() {
            Some(raw) => raw.send(frame),
            None => Err(WsError::SendFailed(
                "no socket for current generation".to_string(),
            )),
        }
    }

    // ------------------------------------------------------------------
    // Reconnect policy
    // ------------------------------------------------------------------

    fn schedule_retry(&mut self, reason: &str) {
        if self.user_closed || self.exhausted {
            return;
        }
        if self.retry_scheduled == Some(self.generation) {
            debug!(reason, "Retry already scheduled for this generation");
            return;
        }
        if !self.policy.should_retry(self.reconnect_attempts) {
            self.exhausted = true;
            self.give_up();
            return;
        }

        let delay = self.policy.delay(self.reconnect_attempts);
        self.retry_scheduled = Some(self.generation);
        self.set_state(ConnectionState::Reconnecting);
        warn!(
            attempt = self.reconnect_attempts + 1,
            delay_ms = delay.as_millis() as u64,
            reason,
            "Reconnecting"
        );
        self.arm(TimerKind::Reconnect, delay);
    }

    /// Emit `give-up` once the raw socket is gone.
    fn give_up(&mut self) {
        if self.give_up_sent || self.raw.is_some() {
            return;
        }
        self.give_up_sent = true;
        error!(
            attempts = self.reconnect_attempts,
            url = %self.config.url,
            "Max reconnection attempts reached"
        );
        if !self.pending.is_empty() {
            warn!(count = self.pending.len(), "Discarding buffered messages");
            self.pending.clear();
            self.sync_pending();
        }
        self.set_state(ConnectionState::Closed);
        self.dispatch(SocketEvent::GiveUp {
            attempts: self.reconnect_attempts,
        });
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    fn arm(&mut self, kind: TimerKind, delay: Duration) {
        self.timers.insert(
            TimerEntry {
                generation: self.generation,
                kind,
            },
            delay,
        );
    }

    fn handle_timer(&mut self, entry: TimerEntry) {
        if entry.generation != self.generation {
            debug!(generation = entry.generation, kind = ?entry.kind, "Ignoring stale timer");
            return;
        }

        match entry.kind {
            TimerKind::ConnectTimeout => {
                if self.state != ConnectionState::Connecting {
                    return;
                }
                warn!(
                    url = %self.config.url,
                    timeout_ms = self.config.connect_timeout_ms,
                    "WebSocket connect timeout"
                );
                if let Some(raw) = self.raw.as_mut() {
                    raw.close(None, None);
                }
                self.schedule_retry("connect timeout");
            }
            TimerKind::Reconnect => {
                if self.user_closed || self.exhausted {
                    return;
                }
                self.reconnect_attempts += 1;
                *self.status.reconnect_attempts.write() = self.reconnect_attempts;
                self.connect();
            }
            TimerKind::Heartbeat(HeartbeatTimerKind::Interval, beat) => {
                if let Some((ping, ack)) = self.heartbeat.on_interval(beat) {
                    if let Err(e) = self.transmit(ping) {
                        warn!(error = %e, "Failed to send heartbeat ping");
                    }
                    self.arm_heartbeat(ack);
                    self.sync_heartbeat_stats();
                }
            }
            TimerKind::Heartbeat(HeartbeatTimerKind::Ack, beat) => {
                if self.heartbeat.on_ack_timeout(beat) {
                    error!(
                        timeout_ms = self.config.heartbeat_ack_timeout_ms,
                        "Heartbeat timeout"
                    );
                    self.is_open = false;
                    self.set_state(ConnectionState::Closing);
                    self.sync_heartbeat_stats();
                    if let Some(raw) = self.raw.as_mut() {
                        raw.close(Some(HEARTBEAT_TIMEOUT_CODE), Some("heartbeat timeout"));
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Heartbeat monitor
    // ------------------------------------------------------------------

    fn arm_heartbeat(&mut self, timer: HeartbeatTimer) {
        if let Some(key) = self.heartbeat_key.take() {
            self.timers.remove(&key);
        }
        let key = self.timers.insert(
            TimerEntry {
                generation: self.generation,
                kind: TimerKind::Heartbeat(timer.kind, timer.beat),
            },
            timer.delay,
        );
        self.heartbeat_key = Some(key);
    }

    fn stop_heartbeat(&mut self) {
        self.heartbeat.stop();
        if let Some(key) = self.heartbeat_key.take() {
            self.timers.remove(&key);
        }
        self.sync_heartbeat_stats();
    }

    // ------------------------------------------------------------------
    // Outbound buffer
    // ------------------------------------------------------------------

    fn buffer(&mut self, frame: Frame) {
        self.pending.enqueue(frame);
        self.sync_pending();
    }

    /// Transmit everything buffered before the open, in order.
    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let mut batch = self.pending.drain();
        let total = batch.len();
        while let Some(frame) = batch.pop_front() {
            if let Err(e) = self.transmit(frame.clone()) {
                warn!(error = %e, remaining = batch.len() + 1, "Flush interrupted, keeping messages buffered");
                batch.push_front(frame);
                self.pending.requeue_front(batch);
                self.is_open = false;
                self.sync_pending();
                return;
            }
        }

        self.sync_pending();
        debug!(count = total, "Flushed buffered messages");
    }

    // ------------------------------------------------------------------
    // Event dispatcher
    // ------------------------------------------------------------------

    fn dispatch(&self, event: SocketEvent) {
        self.events.emit(event.kind(), &event);
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        *self.status.state.write() = state;
    }

    fn sync_pending(&self) {
        *self.status.pending.write() = self.pending.len();
    }

    fn sync_heartbeat_stats(&self) {
        *self.status.heartbeat.write() = self.heartbeat.stats();
    }
}

struct Inner {
    url: String,
    signal_tx: mpsc::UnboundedSender<Signal>,
    events: Arc<SocketEventBus>,
    status: Arc<SocketStatus>,
    finished: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Last handle gone: retire the socket.
        let _ = self.signal_tx.send(Signal::Command(Command::Close {
            code: NORMAL_CLOSURE,
            reason: String::new(),
        }));
    }
}

/// Resilient WebSocket client handle.
///
/// Creating the socket starts the first connection attempt immediately. The
/// socket then reconnects on its own after every close or error until
/// [`close`](Self::close) is called or the reconnect limit is exhausted.
///
/// Handles are cheap to clone. When the last handle is dropped the socket is
/// closed with code 1000.
///
/// ```ignore
/// let socket = ResilientSocket::connect(SocketConfig::new("wss://example.com/feed"))?;
/// let mut events = socket.subscribe();
/// socket.send(r#"{"op":"subscribe"}"#);
/// while let Some(event) = events.recv().await {
///     println!("{event:?}");
/// }
/// ```
#[derive(Clone)]
pub struct ResilientSocket {
    inner: Arc<Inner>,
}

impl ResilientSocket {
    /// Connect using tokio-tungstenite. Must be called within a tokio runtime.
    pub fn connect(config: SocketConfig) -> WsResult<Self> {
        crate::init_crypto();
        let connector = TungsteniteConnector::new(config.close_timeout());
        Self::with_connector(config, connector)
    }

    /// Connect through a custom raw socket implementation.
    pub fn with_connector<C: Connector>(config: SocketConfig, connector: C) -> WsResult<Self> {
        config.validate()?;

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let events = Arc::new(SocketEventBus::new());
        let status = Arc::new(SocketStatus::new());
        let finished = CancellationToken::new();
        let url = config.url.clone();

        let manager = ConnectionManager::new(
            config,
            Arc::new(connector),
            events.clone(),
            status.clone(),
            signal_tx.clone(),
            signal_rx,
        );
        tokio::spawn(manager.run(finished.clone()));

        Ok(Self {
            inner: Arc::new(Inner {
                url,
                signal_tx,
                events,
                status,
                finished,
            }),
        })
    }

    /// Send a payload, or buffer it until the next successful open.
    ///
    /// Never fails: encode failures and sends after retirement are logged
    /// and the message is dropped.
    pub fn send(&self, payload: impl Into<Payload>) {
        match payload.into().encode() {
            Ok(frame) => self.enqueue(frame),
            Err(e) => warn!(error = %e, "Failed to encode payload, dropping message"),
        }
    }

    /// Serialize `value` as JSON and send it.
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) {
        match Payload::json(value).and_then(Payload::encode) {
            Ok(frame) => self.enqueue(frame),
            Err(e) => warn!(error = %e, "Failed to encode payload, dropping message"),
        }
    }

    fn enqueue(&self, frame: Frame) {
        if self
            .inner
            .signal_tx
            .send(Signal::Command(Command::Send(frame)))
            .is_err()
        {
            warn!(url = %self.inner.url, "Socket retired, dropping message");
        }
    }

    /// Close the connection and stop reconnecting. Idempotent.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.inner.signal_tx.send(Signal::Command(Command::Close {
            code,
            reason: reason.to_string(),
        }));
    }

    /// Close with code 1000.
    pub fn shutdown(&self) {
        self.close(NORMAL_CLOSURE, "");
    }

    /// Register a listener for one event kind.
    pub fn add_listener<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&SocketEvent) + Send + Sync + 'static,
    {
        self.inner.events.add_listener(kind, callback)
    }

    /// Returns whether the listener was registered.
    pub fn remove_listener(&self, kind: EventKind, id: ListenerId) -> bool {
        self.inner.events.remove_listener(kind, id)
    }

    /// Receive every event through a channel.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SocketEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        for kind in EventKind::ALL {
            let tx = tx.clone();
            self.inner.events.add_listener(kind, move |event| {
                let _ = tx.send(event.clone());
            });
        }
        rx
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.status.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Reconnect attempts since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        *self.inner.status.reconnect_attempts.read()
    }

    /// Generation of the current (or last) connection attempt.
    pub fn generation(&self) -> u64 {
        *self.inner.status.generation.read()
    }

    /// Messages waiting for the next open.
    pub fn pending_len(&self) -> usize {
        *self.inner.status.pending.read()
    }

    pub fn heartbeat_stats(&self) -> HeartbeatStats {
        *self.inner.status.heartbeat.read()
    }

    /// Whether the socket has retired.
    pub fn is_closed(&self) -> bool {
        self.inner.finished.is_cancelled()
    }

    /// Wait until the socket has retired.
    pub async fn closed(&self) {
        self.inner.finished.cancelled().await;
    }
}

impl std::fmt::Debug for ResilientSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientSocket")
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .field("reconnect_attempts", &self.reconnect_attempts())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullConnector;

    struct NullSocket;

    impl RawSocket for NullSocket {
        fn send(&mut self, _frame: Frame) -> WsResult<()> {
            Ok(())
        }

        fn close(&mut self, _code: Option<u16>, _reason: Option<&str>) {}
    }

    impl Connector for NullConnector {
        fn open(&self, _endpoint: &str, _protocols: &[String], _sink: EventSink) -> Box<dyn RawSocket> {
            Box::new(NullSocket)
        }
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let result = ResilientSocket::with_connector(SocketConfig::new("ftp://nope"), NullConnector);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_initial_state_is_connecting() {
        let socket =
            ResilientSocket::with_connector(SocketConfig::new("ws://localhost:1"), NullConnector)
                .unwrap();
        assert_eq!(socket.state(), ConnectionState::Connecting);
        assert_eq!(socket.reconnect_attempts(), 0);
        assert!(!socket.is_closed());
        assert_eq!(socket.url(), "ws://localhost:1");
    }
}
