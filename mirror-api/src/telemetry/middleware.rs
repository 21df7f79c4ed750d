//! Axum Middleware for HTTP Request Tracing and Metrics
//!
//! Wraps every request in a tracing span and records Prometheus metrics
//! for it.

use axum::{extract::Request, middleware::Next, response::Response};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Instant;
use tracing::{info_span, Instrument};

use super::metrics::with_metrics;

static NUMERIC_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/\d+(/|$)").expect("Invalid ID regex"));

/// Metric label for a request path.
///
/// Numeric segments are collapsed, and paths that were not served are
/// grouped under one label so arbitrary client paths cannot explode label
/// cardinality.
fn route_label(path: &str, status: u16) -> String {
    if status == 404 {
        return "unmatched".to_string();
    }
    NUMERIC_SEGMENT.replace_all(path, "/{id}$1").into_owned()
}

/// Observability middleware for Axum.
///
/// 1. Tracing span per request
/// 2. Prometheus metrics recording
/// 3. Request completion logging
pub async fn observability_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let query = request.uri().query().unwrap_or("").to_string();

    let span = info_span!(
        "http_request",
        http.method = %method,
        http.target = %path,
        http.query = %query,
    );

    let response = next.run(request).instrument(span).await;

    let duration = start.elapsed();
    let status = response.status();
    let label = route_label(&path, status.as_u16());
    with_metrics(|m| {
        m.record_http_request(method.as_str(), &label, status.as_u16(), duration.as_secs_f64())
    });

    tracing::info!(
        method = %method,
        path = %path,
        query = %query,
        status = status.as_u16(),
        duration_ms = duration.as_millis(),
        "Request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_label_numeric_id() {
        assert_eq!(route_label("/metrics/12345", 200), "/metrics/{id}");
    }

    #[test]
    fn test_route_label_plain() {
        assert_eq!(route_label("/subnet-list", 200), "/subnet-list");
        assert_eq!(route_label("/_mirror/health", 200), "/_mirror/health");
    }

    #[test]
    fn test_route_label_not_found_is_grouped() {
        assert_eq!(route_label("/wp-admin/setup.php", 404), "unmatched");
    }
}
