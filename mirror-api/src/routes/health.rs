//! Health Check Endpoints
//!
//! - /_mirror/health - Cache store reachability plus cache statistics
//! - /_mirror/health/ping - Simple liveness check
//! - /_mirror/health/live - Process alive check

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use mirror_storage::{CacheBackend, CacheStats, ReadThroughStats};
use serde::Serialize;

use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

/// Health check response
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HealthDetails>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthDetails {
    pub cache: CacheHealth,
    pub version: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Known requests, one per cached key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<usize>,
    pub ttl_seconds: u64,
    pub hit_rate: f64,
    pub store: CacheStats,
    pub read_through: ReadThroughStats,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /_mirror/health/ping - Simple pong response
pub async fn ping() -> impl IntoResponse {
    (StatusCode::OK, "pong")
}

/// GET /_mirror/health/live - Process liveness check
pub async fn liveness() -> impl IntoResponse {
    let response = HealthResponse {
        status: HealthStatus::Healthy,
        message: Some("Process is alive".to_string()),
        details: None,
    };
    (StatusCode::OK, Json(response))
}

/// GET /_mirror/health - Cache store check with statistics
///
/// Degraded when the store has recorded write failures; unhealthy (503)
/// when known requests cannot be listed.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let start = std::time::Instant::now();
    let store = state.cache.backend_stats();

    let (status, entries, error) = match state.cache.backend().list_known_requests().await {
        Ok(records) if store.write_failures > 0 => (HealthStatus::Degraded, Some(records.len()), None),
        Ok(records) => (HealthStatus::Healthy, Some(records.len()), None),
        Err(e) => (
            HealthStatus::Unhealthy,
            None,
            Some(format!("Cache store check failed: {}", e)),
        ),
    };

    let cache = CacheHealth {
        status,
        latency_ms: Some(start.elapsed().as_millis() as u64),
        error,
        entries,
        ttl_seconds: state.cache.freshness().ttl().as_secs(),
        hit_rate: store.hit_rate(),
        store,
        read_through: state.cache.stats(),
    };

    let response = HealthResponse {
        status,
        message: None,
        details: Some(HealthDetails {
            cache,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: state.start_time.elapsed().as_secs(),
        }),
    };

    let status_code = if status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status_code, Json(response))
}
