//! Retrieval metrics using the native Prometheus client.
//!
//! Metrics are domain-specific rather than generic event counters.
//! Use traces for event-level granularity during investigations.

use lightclient_types::RequestKind;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Encoder, Gauge, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Domain-specific metrics for the retrieval engine.
pub struct Metrics {
    // === Queries ===
    pub odr_started: CounterVec,
    pub odr_completed: CounterVec,
    pub odr_failed: CounterVec,
    pub odr_latency: HistogramVec,
    pub odr_deduplicated: CounterVec,
    pub odr_cache_hits: CounterVec,

    // === Distributor ===
    pub dist_pending: Gauge,
    pub dist_in_flight: Gauge,
    pub dist_attempts: CounterVec,
    pub dist_attempt_timeouts: CounterVec,

    // === Peers ===
    pub peers_connected: Gauge,
    pub peer_failures: CounterVec,
    pub verification_failures: CounterVec,

    // === Ranking ===
    pub ranking_flushes: Counter,
}

impl Metrics {
    fn new() -> Self {
        // Latency buckets: 5ms to 60s
        let latency_buckets = vec![
            0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
        ];

        Self {
            odr_started: register_counter_vec!(
                "lightclient_odr_requests_started_total",
                "Retrievals that went to the network, by kind",
                &["kind"]
            )
            .unwrap(),
            odr_completed: register_counter_vec!(
                "lightclient_odr_requests_completed_total",
                "Retrievals that produced a verified value, by kind",
                &["kind"]
            )
            .unwrap(),
            odr_failed: register_counter_vec!(
                "lightclient_odr_requests_failed_total",
                "Retrievals that failed, by kind and reason",
                &["kind", "reason"]
            )
            .unwrap(),
            odr_latency: register_histogram_vec!(
                "lightclient_odr_latency_seconds",
                "Time from first waiter to verified value, by kind",
                &["kind"],
                latency_buckets
            )
            .unwrap(),
            odr_deduplicated: register_counter_vec!(
                "lightclient_odr_deduplicated_total",
                "Callers attached to an already in-flight retrieval, by kind",
                &["kind"]
            )
            .unwrap(),
            odr_cache_hits: register_counter_vec!(
                "lightclient_odr_cache_hits_total",
                "Retrievals served from the local byte-store, by kind",
                &["kind"]
            )
            .unwrap(),

            dist_pending: register_gauge!(
                "lightclient_distributor_pending",
                "Requests waiting for an idle peer"
            )
            .unwrap(),
            dist_in_flight: register_gauge!(
                "lightclient_distributor_in_flight",
                "Requests currently assigned to a peer"
            )
            .unwrap(),
            dist_attempts: register_counter_vec!(
                "lightclient_distributor_attempts_total",
                "Requests sent to a peer, by kind",
                &["kind"]
            )
            .unwrap(),
            dist_attempt_timeouts: register_counter_vec!(
                "lightclient_distributor_attempt_timeouts_total",
                "Attempts a peer failed to answer in time, by kind",
                &["kind"]
            )
            .unwrap(),

            peers_connected: register_gauge!(
                "lightclient_peers_connected",
                "Servers currently registered with the distributor"
            )
            .unwrap(),
            peer_failures: register_counter_vec!(
                "lightclient_peer_failures_total",
                "Peer-level failures by reason",
                &["reason"]
            )
            .unwrap(),
            verification_failures: register_counter_vec!(
                "lightclient_verification_failures_total",
                "Responses rejected by verification, by kind",
                &["kind"]
            )
            .unwrap(),

            ranking_flushes: register_counter!(
                "lightclient_ranking_flushes_total",
                "Server ranking writes to the byte-store"
            )
            .unwrap(),
        }
    }
}

/// Get the global metrics instance.
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

/// Record a retrieval that went to the network.
pub fn record_odr_started(kind: RequestKind) {
    metrics()
        .odr_started
        .with_label_values(&[kind.as_str()])
        .inc();
}

/// Record a verified retrieval and its latency.
pub fn record_odr_completed(kind: RequestKind, latency_secs: f64) {
    let m = metrics();
    m.odr_completed.with_label_values(&[kind.as_str()]).inc();
    m.odr_latency
        .with_label_values(&[kind.as_str()])
        .observe(latency_secs);
}

/// Record a failed retrieval.
///
/// Reason should be a short snake_case identifier (e.g. "no_peers", "timeout").
pub fn record_odr_failed(kind: RequestKind, reason: &str) {
    metrics()
        .odr_failed
        .with_label_values(&[kind.as_str(), reason])
        .inc();
}

/// Record a caller that joined an in-flight retrieval.
pub fn record_deduplicated(kind: RequestKind) {
    metrics()
        .odr_deduplicated
        .with_label_values(&[kind.as_str()])
        .inc();
}

/// Record a retrieval served from the local cache.
pub fn record_cache_hit(kind: RequestKind) {
    metrics()
        .odr_cache_hits
        .with_label_values(&[kind.as_str()])
        .inc();
}

/// Update distributor queue gauges.
pub fn set_distributor_load(pending: usize, in_flight: usize) {
    let m = metrics();
    m.dist_pending.set(pending as f64);
    m.dist_in_flight.set(in_flight as f64);
}

/// Record a request sent to a peer.
pub fn record_attempt(kind: RequestKind) {
    metrics()
        .dist_attempts
        .with_label_values(&[kind.as_str()])
        .inc();
}

/// Record an attempt that timed out.
pub fn record_attempt_timeout(kind: RequestKind) {
    metrics()
        .dist_attempt_timeouts
        .with_label_values(&[kind.as_str()])
        .inc();
}

/// Update connected peer count.
pub fn set_peers_connected(count: usize) {
    metrics().peers_connected.set(count as f64);
}

/// Record a peer-level failure.
///
/// Reason should be one of "timeout", "disconnect", "send", "invalid".
pub fn record_peer_failure(reason: &str) {
    metrics()
        .peer_failures
        .with_label_values(&[reason])
        .inc();
}

/// Record a response that failed verification.
pub fn record_verification_failure(kind: RequestKind) {
    metrics()
        .verification_failures
        .with_label_values(&[kind.as_str()])
        .inc();
}

/// Record a ranking flush.
pub fn record_ranking_flush() {
    metrics().ranking_flushes.inc();
}

/// Render the default registry in the Prometheus text format.
pub fn gather_text() -> String {
    // Make sure our families exist even before the first event.
    let _ = metrics();

    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
