//! Main application orchestration.
//!
//! Coordinates:
//! - The resilient socket and its event stream
//! - Subscription messages replayed after every open
//! - Stdin lines forwarded as outbound messages
//! - Metrics and periodic session summaries

use crate::config::{AppConfig, OutputFormat};
use crate::error::AppResult;
use parking_lot::Mutex;
use rews_telemetry::{Metrics, SessionReporter};
use rews_ws::{
    ConnectionState, EventKind, Incoming, ResilientSocket, SocketEvent, ABNORMAL_CLOSURE,
    HEARTBEAT_TIMEOUT_CODE,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Main application.
pub struct Application {
    config: AppConfig,
    reporter: SessionReporter,
}

impl Application {
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;
        let reporter = SessionReporter::new(config.socket.url.clone());
        Ok(Self { config, reporter })
    }

    /// Run until ctrl-c or until the socket retires.
    pub async fn run(self) -> AppResult<()> {
        let socket = ResilientSocket::connect(self.config.socket.clone())?;
        info!(url = %socket.url(), "Socket created");

        register_metrics(&socket);
        let mut events = socket.subscribe();

        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;
        let mut stats_interval = tokio::time::interval(self.config.stats_interval());
        stats_interval.tick().await;

        let mut heartbeat_poll = tokio::time::interval(
            self.config
                .socket
                .heartbeat_interval()
                .max(Duration::from_secs(1)),
        );
        let mut last_pong = None;

        loop {
            tokio::select! {
                Some(event) = events.recv() => {
                    if let SocketEvent::Open { generation } = &event {
                        debug!(generation, count = self.config.subscribe.len(), "Sending subscriptions");
                        for message in &self.config.subscribe {
                            socket.send_json(message);
                            Metrics::ws_msg_queued("json");
                        }
                    }
                    record_state(socket.state());
                    self.print_event(&event);
                }

                line = stdin.next_line(), if stdin_open => {
                    match line {
                        Ok(Some(line)) => send_line(&socket, line),
                        Ok(None) => {
                            debug!("stdin closed");
                            stdin_open = false;
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to read stdin");
                            stdin_open = false;
                        }
                    }
                }

                _ = heartbeat_poll.tick() => {
                    record_state(socket.state());
                    if !self.config.socket.heartbeat_enabled {
                        continue;
                    }
                    let stats = socket.heartbeat_stats();
                    if stats.last_pong.is_some() && stats.last_pong != last_pong {
                        last_pong = stats.last_pong;
                        if let Some(rtt_ms) = stats.last_rtt_ms {
                            Metrics::heartbeat_rtt(rtt_ms as f64);
                        }
                    }
                }

                _ = stats_interval.tick() => {
                    self.reporter.output_summary();
                }

                _ = socket.closed() => {
                    info!("Socket retired");
                    break;
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.shutdown(&socket, &mut events).await;
        record_state(ConnectionState::Closed);

        self.reporter.output_summary();
        if self.config.print_metrics_on_exit {
            println!("{}", Metrics::encode()?);
        }

        Ok(())
    }

    async fn shutdown(&self, socket: &ResilientSocket, events: &mut mpsc::UnboundedReceiver<SocketEvent>) {
        if socket.is_closed() {
            return;
        }

        info!("Closing socket");
        socket.shutdown();
        if tokio::time::timeout(self.config.close_grace(), socket.closed())
            .await
            .is_err()
        {
            warn!(
                grace_ms = self.config.close_grace_ms,
                "Close handshake did not complete"
            );
        }

        while let Ok(event) = events.try_recv() {
            self.print_event(&event);
        }
    }

    fn print_event(&self, event: &SocketEvent) {
        match self.config.output {
            OutputFormat::Pretty => println!("{}", format_pretty(event)),
            OutputFormat::Json => println!("{}", format_json(event)),
        }
    }
}

/// Forward one stdin line. Lines holding valid JSON are counted as json.
fn send_line(socket: &ResilientSocket, line: String) {
    let line = line.trim_end().to_string();
    if line.is_empty() {
        return;
    }
    let kind = if serde_json::from_str::<serde_json::Value>(&line).is_ok() {
        "json"
    } else {
        "text"
    };
    socket.send(line);
    Metrics::ws_msg_queued(kind);
}

/// Wire socket events to Prometheus metrics.
///
/// A reconnect is counted when an open follows an earlier generation, labelled
/// with the reason of the close that preceded it. The state gauge is not
/// touched here; listeners cannot tell a user close from one that will be
/// retried, so the run loop mirrors `socket.state()` instead.
fn register_metrics(socket: &ResilientSocket) {
    let last_close_reason: Arc<Mutex<Option<&'static str>>> = Arc::new(Mutex::new(None));

    record_state(socket.state());

    let reason = last_close_reason.clone();
    socket.add_listener(EventKind::Open, move |event| {
        Metrics::ws_connected();
        if let SocketEvent::Open { generation } = event {
            if *generation > 1 {
                Metrics::ws_reconnect(reason.lock().take().unwrap_or("unknown"));
            }
        }
    });

    let reason = last_close_reason;
    socket.add_listener(EventKind::Close, move |event| {
        Metrics::ws_disconnected();
        if let SocketEvent::Close(info) = event {
            *reason.lock() = Some(close_reason(info.code));
        }
    });

    socket.add_listener(EventKind::Error, |_| Metrics::ws_error());

    socket.add_listener(EventKind::Message, |event| {
        if let SocketEvent::Message(message) = event {
            Metrics::ws_msg_received(message_kind(message));
        }
    });

    socket.add_listener(EventKind::GiveUp, |_| Metrics::ws_give_up());
}

/// Mirror the socket state into the state gauge.
fn record_state(state: ConnectionState) {
    Metrics::ws_state_set(state_label(state));
}

fn close_reason(code: u16) -> &'static str {
    match code {
        HEARTBEAT_TIMEOUT_CODE => "heartbeat",
        ABNORMAL_CLOSURE => "abnormal",
        _ => "close",
    }
}

fn state_label(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Connecting => "connecting",
        ConnectionState::Connected => "connected",
        ConnectionState::Reconnecting => "reconnecting",
        ConnectionState::Closing => "closing",
        ConnectionState::Closed => "closed",
    }
}

fn message_kind(message: &Incoming) -> &'static str {
    match message {
        Incoming::Json(_) => "json",
        Incoming::Text(_) => "text",
        Incoming::Binary(_) => "binary",
    }
}

fn format_pretty(event: &SocketEvent) -> String {
    match event {
        SocketEvent::Open { generation } => format!("[open] generation={generation}"),
        SocketEvent::Message(Incoming::Json(value)) => format!("[json] {value}"),
        SocketEvent::Message(Incoming::Text(text)) => format!("[text] {text}"),
        SocketEvent::Message(Incoming::Binary(bytes)) => {
            format!("[binary] {} bytes", bytes.len())
        }
        SocketEvent::Close(info) => format!("[close] code={} reason={:?}", info.code, info.reason),
        SocketEvent::Error(error) => format!("[error] {error}"),
        SocketEvent::GiveUp { attempts } => format!("[give-up] attempts={attempts}"),
    }
}

fn format_json(event: &SocketEvent) -> serde_json::Value {
    let kind = event.kind().as_str();
    match event {
        SocketEvent::Open { generation } => json!({"event": kind, "generation": generation}),
        SocketEvent::Message(Incoming::Json(value)) => json!({"event": kind, "data": value}),
        SocketEvent::Message(Incoming::Text(text)) => json!({"event": kind, "text": text}),
        SocketEvent::Message(Incoming::Binary(bytes)) => {
            json!({"event": kind, "binary_len": bytes.len()})
        }
        SocketEvent::Close(info) => {
            json!({"event": kind, "code": info.code, "reason": info.reason})
        }
        SocketEvent::Error(error) => json!({"event": kind, "error": error}),
        SocketEvent::GiveUp { attempts } => json!({"event": kind, "attempts": attempts}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rews_ws::CloseInfo;

    #[test]
    fn test_close_reason_labels() {
        assert_eq!(close_reason(4000), "heartbeat");
        assert_eq!(close_reason(1006), "abnormal");
        assert_eq!(close_reason(1001), "close");
    }

    #[test]
    fn test_record_state_sets_single_gauge() {
        use rews_telemetry::metrics::{WS_STATE, WS_STATES};

        record_state(ConnectionState::Closing);
        let active: Vec<_> = WS_STATES
            .iter()
            .filter(|s| WS_STATE.with_label_values(&[s]).get() == 1.0)
            .collect();
        assert_eq!(active, vec![&"closing"]);
    }

    #[test]
    fn test_format_pretty() {
        assert_eq!(
            format_pretty(&SocketEvent::Open { generation: 3 }),
            "[open] generation=3"
        );
        assert_eq!(
            format_pretty(&SocketEvent::Message(Incoming::Binary(vec![0; 4]))),
            "[binary] 4 bytes"
        );
        assert_eq!(
            format_pretty(&SocketEvent::Close(CloseInfo::new(1000, "bye"))),
            "[close] code=1000 reason=\"bye\""
        );
    }

    #[test]
    fn test_format_json() {
        let value = format_json(&SocketEvent::Message(Incoming::Json(json!({"px": 1}))));
        assert_eq!(value, json!({"event": "message", "data": {"px": 1}}));

        let value = format_json(&SocketEvent::GiveUp { attempts: 2 });
        assert_eq!(value, json!({"event": "give-up", "attempts": 2}));
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(Application::new(AppConfig::new("not a url")).is_err());
    }
}
