//! Mock WebSocket server for transport tests.
//!
//! Provides a local server that can:
//! - Accept connections and record the offered sub-protocols
//! - Answer application-level `ping` with `pong`
//! - Echo every other text message
//! - Drop all clients on demand

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};

#[derive(Default)]
struct ServerLog {
    messages: Vec<String>,
    connections: u32,
    protocols: Vec<Option<String>>,
}

/// A mock WebSocket server for testing.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    kick_tx: broadcast::Sender<()>,
    log: Arc<Mutex<ServerLog>>,
}

impl MockWsServer {
    /// Start a new mock WebSocket server on an available port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let log = Arc::new(Mutex::new(ServerLog::default()));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (kick_tx, _) = broadcast::channel::<()>(4);

        let log_clone = log.clone();
        let kick_clone = kick_tx.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        tokio::spawn(handle_connection(
                            stream,
                            log_clone.clone(),
                            kick_clone.subscribe(),
                        ));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            kick_tx,
            log,
        }
    }

    /// Get the server's WebSocket URL.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn connection_count(&self) -> u32 {
        self.log.lock().await.connections
    }

    pub async fn received_messages(&self) -> Vec<String> {
        self.log.lock().await.messages.clone()
    }

    /// `Sec-WebSocket-Protocol` offered by each client, in connection order.
    pub async fn offered_protocols(&self) -> Vec<Option<String>> {
        self.log.lock().await.protocols.clone()
    }

    /// Close every open connection with code 1001.
    pub fn kick_all(&self) {
        let _ = self.kick_tx.send(());
    }

    /// Stop accepting connections.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    log: Arc<Mutex<ServerLog>>,
    mut kick_rx: broadcast::Receiver<()>,
) {
    let mut offered = None;
    let callback = |request: &Request, mut response: Response| {
        if let Some(value) = request.headers().get("Sec-WebSocket-Protocol") {
            let value = value.to_str().unwrap_or_default().to_string();
            // Select the client's first preference.
            if let Some(first) = value.split(',').next() {
                if let Ok(selected) = HeaderValue::from_str(first.trim()) {
                    response
                        .headers_mut()
                        .insert("Sec-WebSocket-Protocol", selected);
                }
            }
            offered = Some(value);
        }
        Ok::<_, ErrorResponse>(response)
    };

    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    {
        let mut log = log.lock().await;
        log.connections += 1;
        log.protocols.push(offered);
    }

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        log.lock().await.messages.push(text.clone());
                        let reply = if text == "ping" { "pong".to_string() } else { text };
                        let _ = write.send(Message::Text(reply)).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) => {
                        // Flushes tungstenite's queued close reply.
                        let _ = write.close().await;
                        break;
                    }
                    Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
            _ = kick_rx.recv() => {
                let frame = CloseFrame {
                    code: CloseCode::Away,
                    reason: "server restart".into(),
                };
                let _ = write.send(Message::Close(Some(frame))).await;
                break;
            }
        }
    }
}
