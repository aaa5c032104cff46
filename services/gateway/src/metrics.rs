//! Prometheus metrics exposition
//!
//! Metrics recorded by the gateway itself:
//!
//! - `gateway_requests_total` (counter): labels `route`, `status`
//! - `gateway_request_duration_seconds` (histogram): label `route`
//!
//! The failover engine records `gateway_upstream_attempts_total` and
//! `gateway_cooldowns_total` through the same global recorder.

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Histogram bounds from 5ms up to the longest plausible streamed completion.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("gateway_request_duration_seconds".to_string()),
            DURATION_BUCKETS,
        )
        .expect("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Explicit buckets make `gateway_request_duration_seconds` render as a
/// histogram (`_bucket` lines) rather than a summary.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed client request.
///
/// For streamed responses the duration covers time to first byte, not the
/// whole stream.
pub fn record_request(route: &'static str, status: u16, duration_secs: f64) {
    metrics::counter!("gateway_requests_total", "route" => route, "status" => status.to_string())
        .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "route" => route)
        .record(duration_secs);
}
