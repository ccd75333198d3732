//! Prometheus metrics for detour.
//!
//! Tracks transaction outcomes, hook execution, traffic shaping and origin
//! latency.
use crate::hooks::Phase;
use crate::throttle::Leg;
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec, Encoder,
    HistogramVec, TextEncoder,
};
use std::time::Duration;
use tracing::warn;

lazy_static! {
    /// Total number of transactions finished, by outcome
    pub static ref TRANSACTIONS_TOTAL: CounterVec = register_counter_vec!(
        "detour_transactions_total",
        "Total number of transactions processed by the proxy",
        &["outcome"]  // outcome: ok|hook|transport|origin|shaping_config|timeout
    )
    .unwrap();

    /// End-to-end transaction duration
    pub static ref TRANSACTION_DURATION_MS: HistogramVec = register_histogram_vec!(
        "detour_transaction_duration_ms",
        "Total transaction duration including hooks, shaping and origin dispatch",
        &["outcome"],
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap();

    /// Transactions answered during request interception
    pub static ref ORIGIN_BYPASS_TOTAL: Counter = register_counter!(
        "detour_origin_bypass_total",
        "Total number of transactions whose response was supplied by a hook"
    )
    .unwrap();

    /// Hook execution duration, including time spent waiting on a continuation
    pub static ref HOOK_DURATION_MS: HistogramVec = register_histogram_vec!(
        "detour_hook_duration_ms",
        "Histogram of hook execution time in milliseconds",
        &["phase", "result"],  // result: ok|error
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 25.0, 50.0, 100.0, 500.0]
    )
    .unwrap();

    /// Bytes released by the traffic shaper
    pub static ref SHAPED_BYTES_TOTAL: CounterVec = register_counter_vec!(
        "detour_shaped_bytes_total",
        "Total number of body bytes transmitted",
        &["leg"]  // leg: request|response
    )
    .unwrap();

    pub static ref TRANSFER_DURATION_MS: HistogramVec = register_histogram_vec!(
        "detour_transfer_duration_ms",
        "Histogram of body transmission time in milliseconds",
        &["leg"],
        vec![1.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]
    )
    .unwrap();

    /// Origin dispatch duration
    pub static ref ORIGIN_DURATION_MS: HistogramVec = register_histogram_vec!(
        "detour_origin_duration_ms",
        "Duration of origin dispatch",
        &["result"],
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap();
}

fn millis(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}

/// Collect and return all metrics in Prometheus text format
pub fn collect_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %err, "failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

pub fn record_transaction(outcome: &str, elapsed: Duration) {
    TRANSACTIONS_TOTAL.with_label_values(&[outcome]).inc();
    TRANSACTION_DURATION_MS
        .with_label_values(&[outcome])
        .observe(millis(elapsed));
}

pub fn record_bypass() {
    ORIGIN_BYPASS_TOTAL.inc();
}

pub fn record_hook(phase: Phase, elapsed: Duration, result: &str) {
    HOOK_DURATION_MS
        .with_label_values(&[phase.as_str(), result])
        .observe(millis(elapsed));
}

pub fn record_transfer(leg: Leg, bytes: u64, elapsed: Duration) {
    SHAPED_BYTES_TOTAL
        .with_label_values(&[leg.as_str()])
        .inc_by(bytes as f64);
    TRANSFER_DURATION_MS
        .with_label_values(&[leg.as_str()])
        .observe(millis(elapsed));
}

pub fn record_origin(elapsed: Duration, result: &str) {
    ORIGIN_DURATION_MS
        .with_label_values(&[result])
        .observe(millis(elapsed));
}
