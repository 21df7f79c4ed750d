//! HTTP Routes Module
//!
//! - `/_mirror/health*` and `/_mirror/metrics`: operational endpoints,
//!   matched before any query handling and never cached
//! - every other GET path: the cached query surface

pub mod health;
pub mod query;

use axum::{middleware::from_fn, routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::constants::OPS_PREFIX;
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

/// Operational endpoints, nested under [`OPS_PREFIX`].
fn ops_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/ping", get(health::ping))
        .route("/health/live", get(health::liveness))
        .route("/metrics", get(metrics_handler))
}

/// Build the full application router.
pub fn create_router(state: AppState) -> Router {
    let queries = get(query::query_handler).with_state(state.clone());

    Router::new()
        .nest(OPS_PREFIX, ops_router())
        .fallback_service(queries)
        .layer(from_fn(observability_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
