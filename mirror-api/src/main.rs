//! subnet-mirror Server Entry Point
//!
//! Loads configuration, opens the cache, starts the background refresher
//! and serves HTTP until Ctrl-C.

use std::sync::Arc;

use axum::Router;
use mirror_api::telemetry::{init_tracer, TelemetryConfig};
use mirror_api::{
    cache_refresh_task, create_router, ApiConfig, ApiError, ApiResult, AppState, RefreshScope,
};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracer(&telemetry_config)?;

    let config = ApiConfig::from_env()?;
    let state = AppState::from_config(config.clone())?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let refresher = if config.refresh.enabled {
        let scope = RefreshScope::from_config(&config, &state.sources);
        Some(tokio::spawn(cache_refresh_task(
            Arc::clone(&state.cache),
            Arc::clone(&state.sources),
            scope,
            config.refresh.clone(),
            shutdown_rx,
        )))
    } else {
        tracing::info!("Background refresh disabled");
        None
    };

    let app: Router = create_router(state);

    let addr = config.bind_addr;
    tracing::info!(%addr, "Starting subnet-mirror server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Some(handle) = refresher {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Cache refresh task ended abnormally");
        }
    }

    Ok(())
}
