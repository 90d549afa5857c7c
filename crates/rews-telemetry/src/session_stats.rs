//! Session summary built from the process-wide metrics.
//!
//! Logged when a client shuts down:
//! - opens, reconnects (by reason), errors, give-ups
//! - messages queued for sending and received
//! - heartbeat RTT distribution (P50/P95/P99)

use crate::metrics::{
    HEARTBEAT_RTT_MS, WS_ERRORS_TOTAL, WS_GIVE_UP_TOTAL, WS_MSGS_RECEIVED_TOTAL,
    WS_MSGS_QUEUED_TOTAL, WS_OPEN_TOTAL, WS_RECONNECT_TOTAL,
};
use chrono::{DateTime, Utc};
use prometheus::core::Collector;
use prometheus::proto::Bucket;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

const MESSAGE_KINDS: [&str; 3] = ["text", "json", "binary"];

/// Statistics for one client session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub url: String,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub opens: u64,
    pub reconnects: BTreeMap<String, u64>,
    pub errors: u64,
    pub give_ups: u64,
    pub msgs_queued: u64,
    pub msgs_received: u64,
    pub rtt_p50_ms: f64,
    pub rtt_p95_ms: f64,
    pub rtt_p99_ms: f64,
}

impl SessionStats {
    pub fn reconnects_total(&self) -> u64 {
        self.reconnects.values().sum()
    }
}

/// Session statistics reporter.
pub struct SessionReporter {
    url: String,
    start_time: DateTime<Utc>,
}

impl SessionReporter {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            start_time: Utc::now(),
        }
    }

    /// Snapshot the current statistics.
    pub fn get_stats(&self) -> SessionStats {
        let (rtt_p50_ms, rtt_p95_ms, rtt_p99_ms) = rtt_percentiles();

        SessionStats {
            url: self.url.clone(),
            started_at: self.start_time,
            uptime_secs: (Utc::now() - self.start_time).num_seconds(),
            opens: WS_OPEN_TOTAL.get(),
            reconnects: reconnects_by_reason(),
            errors: WS_ERRORS_TOTAL.get(),
            give_ups: WS_GIVE_UP_TOTAL.get(),
            msgs_queued: sum_by_kind(&WS_MSGS_QUEUED_TOTAL),
            msgs_received: sum_by_kind(&WS_MSGS_RECEIVED_TOTAL),
            rtt_p50_ms,
            rtt_p95_ms,
            rtt_p99_ms,
        }
    }

    /// Output the session summary to logs.
    pub fn output_summary(&self) {
        let s = self.get_stats();
        let hours = s.uptime_secs / 3600;
        let minutes = (s.uptime_secs / 60) % 60;

        info!("========== Session Summary ==========");
        info!(
            "{} since {} ({} hours {} minutes)",
            s.url,
            s.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            hours,
            minutes
        );
        info!(
            "  Opens: {}, reconnects: {} {:?}",
            s.opens,
            s.reconnects_total(),
            s.reconnects
        );
        info!("  Errors: {}, give-ups: {}", s.errors, s.give_ups);
        info!(
            "  Messages: queued {}, received {}",
            s.msgs_queued, s.msgs_received
        );
        info!(
            "  Heartbeat RTT (ms): P50={:.1}, P95={:.1}, P99={:.1}",
            s.rtt_p50_ms, s.rtt_p95_ms, s.rtt_p99_ms
        );
        info!("=====================================");
    }

    /// JSON-formatted statistics.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self.get_stats()).unwrap_or_default()
    }
}

fn sum_by_kind(counter: &prometheus::CounterVec) -> u64 {
    MESSAGE_KINDS
        .iter()
        .map(|kind| counter.with_label_values(&[kind]).get() as u64)
        .sum()
}

fn reconnects_by_reason() -> BTreeMap<String, u64> {
    let mut out = BTreeMap::new();
    for mf in WS_RECONNECT_TOTAL.collect() {
        for m in mf.get_metric() {
            let reason = m
                .get_label()
                .first()
                .map(|pair| pair.get_value().to_string())
                .unwrap_or_default();
            out.insert(reason, m.get_counter().get_value() as u64);
        }
    }
    out
}

/// Returns (p50, p95, p99).
fn rtt_percentiles() -> (f64, f64, f64) {
    for mf in HEARTBEAT_RTT_MS.collect() {
        for m in mf.get_metric() {
            let h = m.get_histogram();
            let count = h.get_sample_count();
            if count == 0 {
                return (0.0, 0.0, 0.0);
            }
            let buckets = h.get_bucket();
            return (
                percentile_from_buckets(buckets, count, 0.50),
                percentile_from_buckets(buckets, count, 0.95),
                percentile_from_buckets(buckets, count, 0.99),
            );
        }
    }
    (0.0, 0.0, 0.0)
}

/// Percentile from cumulative buckets with linear interpolation inside the
/// matching bucket.
fn percentile_from_buckets(buckets: &[Bucket], total_count: u64, percentile: f64) -> f64 {
    let target = (total_count as f64 * percentile) as u64;
    let mut prev_bound = 0.0;
    let mut prev_count = 0u64;

    for bucket in buckets {
        let upper_bound = bucket.get_upper_bound();
        let cumulative_count = bucket.get_cumulative_count();

        if cumulative_count >= target {
            let bucket_count = cumulative_count - prev_count;
            if bucket_count == 0 {
                return upper_bound;
            }
            let position = (target - prev_count) as f64 / bucket_count as f64;
            return prev_bound + position * (upper_bound - prev_bound);
        }

        prev_bound = upper_bound;
        prev_count = cumulative_count;
    }

    buckets.last().map(|b| b.get_upper_bound()).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;

    fn bucket(upper: f64, cumulative: u64) -> Bucket {
        let mut b = Bucket::default();
        b.set_upper_bound(upper);
        b.set_cumulative_count(cumulative);
        b
    }

    #[test]
    fn test_percentile_interpolates_within_bucket() {
        let buckets = vec![bucket(10.0, 0), bucket(20.0, 10)];
        assert_eq!(percentile_from_buckets(&buckets, 10, 0.5), 15.0);
        assert_eq!(percentile_from_buckets(&buckets, 10, 1.0), 20.0);
    }

    #[test]
    fn test_percentile_beyond_buckets_uses_last_bound() {
        let buckets = vec![bucket(10.0, 2)];
        assert_eq!(percentile_from_buckets(&buckets, 4, 0.99), 10.0);
    }

    #[test]
    fn test_stats_reflect_recorded_metrics() {
        let reporter = SessionReporter::new("ws://localhost:9000");
        let before = reporter.get_stats();

        Metrics::ws_msg_queued("json");
        Metrics::ws_msg_received("text");
        Metrics::ws_reconnect("close");

        let after = reporter.get_stats();
        assert_eq!(after.url, "ws://localhost:9000");
        assert!(after.msgs_queued > before.msgs_queued);
        assert!(after.msgs_received > before.msgs_received);
        assert!(after.reconnects_total() > before.reconnects_total());
        assert!(reporter.to_json().get("reconnects").is_some());
    }
}
