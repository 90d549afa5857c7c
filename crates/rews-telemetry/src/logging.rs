//! Logging setup for rews binaries.
//!
//! Everything goes through one global `tracing-subscriber` registry. With
//! `RUST_ENV=production` each event is a JSON object carrying its span
//! stack, ready for a log shipper; any other value (or none) gives the
//! multi-line pretty layout with target and thread name.

use crate::error::{TelemetryError, TelemetryResult};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset. Reconnects, heartbeat pings and
/// buffer flushes are logged at debug by the socket crate, so it is let
/// through at that level while dependencies stay at info.
pub const DEFAULT_FILTER: &str = "info,rews_ws=debug,rews_cli=debug";

fn json_output(rust_env: Option<&str>) -> bool {
    rust_env == Some("production")
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging() -> TelemetryResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let rust_env = std::env::var("RUST_ENV").ok();

    let result = if json_output(rust_env.as_deref()) {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_thread_names(true),
            )
            .try_init()
    };

    result.map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}
