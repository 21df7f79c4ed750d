//! Prometheus Metrics Definitions
//!
//! Defines all subnet-mirror metrics with appropriate labels and types.
//! Exposes `/_mirror/metrics` for Prometheus scraping.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use mirror_storage::{CacheStats, ReadSource, RefreshOutcome};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge_vec, register_histogram_vec, Counter,
    CounterVec, Encoder, GaugeVec, HistogramVec, TextEncoder,
};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Upstream latency buckets (seconds). CLI calls routinely take many seconds.
const UPSTREAM_LATENCY_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<MirrorMetrics>> = Lazy::new(MirrorMetrics::new);

/// Run `f` against the global metrics if they registered successfully.
pub fn with_metrics(f: impl FnOnce(&MirrorMetrics)) {
    if let Ok(metrics) = METRICS.as_ref() {
        f(metrics);
    }
}

/// Container for all subnet-mirror metrics.
#[derive(Clone)]
pub struct MirrorMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Cache lookup outcomes - labels: outcome
    pub cache_lookups_total: CounterVec,

    /// Upstream fetches - labels: source, status
    pub upstream_fetches_total: CounterVec,

    /// Upstream fetch duration - labels: source
    pub upstream_fetch_duration_seconds: HistogramVec,

    /// Background refresh cycles completed
    pub refresh_cycles_total: Counter,

    /// Per-entry background refresh outcomes - labels: outcome
    pub refresh_entries_total: CounterVec,

    /// Store counters as of the last scrape - labels: kind
    pub cache_store_events: GaugeVec,
}

impl MirrorMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "mirror_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_requests_total: {}", e)))?,

            http_request_duration_seconds: register_histogram_vec!(
                "mirror_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_request_duration_seconds: {}", e)))?,

            cache_lookups_total: register_counter_vec!(
                "mirror_cache_lookups_total",
                "Query lookups by outcome",
                &["outcome"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register cache_lookups_total: {}", e)))?,

            upstream_fetches_total: register_counter_vec!(
                "mirror_upstream_fetches_total",
                "Upstream fetches by source and result",
                &["source", "status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register upstream_fetches_total: {}", e)))?,

            upstream_fetch_duration_seconds: register_histogram_vec!(
                "mirror_upstream_fetch_duration_seconds",
                "Upstream fetch duration in seconds",
                &["source"],
                UPSTREAM_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register upstream_fetch_duration_seconds: {}", e)))?,

            refresh_cycles_total: register_counter!(
                "mirror_refresh_cycles_total",
                "Background refresh cycles completed"
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register refresh_cycles_total: {}", e)))?,

            refresh_entries_total: register_counter_vec!(
                "mirror_refresh_entries_total",
                "Background refresh attempts by outcome",
                &["outcome"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register refresh_entries_total: {}", e)))?,

            cache_store_events: register_gauge_vec!(
                "mirror_cache_store_events",
                "Cache store counters since startup",
                &["kind"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register cache_store_events: {}", e)))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// Record how a cached query was answered.
    pub fn record_cache_lookup(&self, source: ReadSource) {
        self.cache_lookups_total
            .with_label_values(&[source.as_str()])
            .inc();
    }

    /// Record a query that could not be answered (no data, no fallback).
    pub fn record_cache_failure(&self) {
        self.cache_lookups_total.with_label_values(&["error"]).inc();
    }

    /// Record a query that went straight upstream.
    pub fn record_bypass(&self) {
        self.cache_lookups_total.with_label_values(&["bypass"]).inc();
    }

    /// Record an upstream fetch.
    pub fn record_fetch(&self, source: &str, success: bool, duration_secs: f64) {
        let status = if success { "success" } else { "error" };
        self.upstream_fetches_total
            .with_label_values(&[source, status])
            .inc();
        self.upstream_fetch_duration_seconds
            .with_label_values(&[source])
            .observe(duration_secs);
    }

    pub fn record_refresh_cycle(&self) {
        self.refresh_cycles_total.inc();
    }

    pub fn record_refresh_outcome(&self, outcome: &RefreshOutcome) {
        self.refresh_entries_total
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    /// Copy store counters into gauges.
    pub fn observe_store(&self, stats: &CacheStats) {
        for (kind, value) in [
            ("hits", stats.hits),
            ("misses", stats.misses),
            ("corrupt_entries", stats.corrupt_entries),
            ("writes", stats.writes),
            ("write_failures", stats.write_failures),
        ] {
            self.cache_store_events
                .with_label_values(&[kind])
                .set(value as f64);
        }
    }
}

/// Handler for GET /_mirror/metrics.
///
/// Returns Prometheus text format metrics.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    with_metrics(|m| m.observe_store(&state.cache.backend_stats()));

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_core::FetchError;
    use prometheus::core::Collector;

    #[test]
    fn test_metrics_creation() -> Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))?;
        assert!(!metrics.http_requests_total.desc().is_empty());
        Ok(())
    }

    #[test]
    fn test_record_cache_lookups() -> Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))?;
        let before = metrics.cache_lookups_total.with_label_values(&["hit"]).get();
        metrics.record_cache_lookup(ReadSource::Cache);
        metrics.record_cache_lookup(ReadSource::Upstream);
        metrics.record_bypass();
        assert!(metrics.cache_lookups_total.with_label_values(&["hit"]).get() >= before + 1.0);
        Ok(())
    }

    #[test]
    fn test_record_refresh() -> Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))?;
        metrics.record_refresh_cycle();
        metrics.record_refresh_outcome(&RefreshOutcome::Refreshed);
        metrics.record_refresh_outcome(&RefreshOutcome::FetchFailed(FetchError::EmptyResult {
            source_name: "/balances".to_string(),
        }));
        assert!(metrics.refresh_cycles_total.get() >= 1.0);
        assert!(
            metrics
                .refresh_entries_total
                .with_label_values(&["fetch_failed"])
                .get()
                >= 1.0
        );
        Ok(())
    }

    #[test]
    fn test_observe_store_sets_gauges() -> Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))?;
        metrics.observe_store(&CacheStats {
            hits: 3,
            misses: 1,
            corrupt_entries: 0,
            writes: 4,
            write_failures: 2,
        });
        assert_eq!(
            metrics
                .cache_store_events
                .with_label_values(&["write_failures"])
                .get(),
            2.0
        );
        Ok(())
    }
}
