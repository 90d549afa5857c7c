//! Interactive resilient WebSocket client.
//!
//! Connects to a single endpoint, prints inbound events and forwards stdin
//! lines as outbound messages. Reconnection, heartbeat and buffering are
//! handled by `rews-ws`.

pub mod app;
pub mod config;
pub mod error;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
