//! Prometheus metrics and structured logging for rews clients.
//!
//! - Prometheus metrics for connection state, reconnects and throughput
//! - Structured JSON logging with tracing
//! - Session summary output on shutdown

pub mod error;
pub mod logging;
pub mod metrics;
pub mod session_stats;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
pub use session_stats::{SessionReporter, SessionStats};
