//! Query surface: every non-operational GET path.
//!
//! Resolution order:
//! 1. ignored paths answer 404 without touching anything
//! 2. paths no source serves answer 404 without touching the cache
//! 3. bypass paths are fetched live and never cached
//! 4. everything else is served read-through from the cache
//!
//! Only the parameters a source reads become part of the request, so junk
//! parameters cannot mint cache entries.

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::{header, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use mirror_core::{normalize_path, FetchError};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::telemetry::with_metrics;

/// Header naming how the payload was produced.
pub const CACHE_STATUS_HEADER: &str = "x-mirror-cache";

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

fn text_response(payload: impl Into<axum::body::Body>, cache_status: &'static str) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN)),
            (
                header::HeaderName::from_static(CACHE_STATUS_HEADER),
                HeaderValue::from_static(cache_status),
            ),
        ],
        payload.into(),
    )
        .into_response()
}

/// GET /<path>?<params> - serve one query.
pub async fn query_handler(
    State(state): State<AppState>,
    uri: Uri,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> ApiResult<Response> {
    let path = normalize_path(uri.path());

    if state.config.is_ignored(&path) {
        tracing::trace!(path = %path, "Ignored path");
        return Err(ApiError::not_found("Not found"));
    }

    if !state.sources.serves(&path) {
        tracing::debug!(path = %path, "Unknown query path");
        return Err(ApiError::from_fetch(
            &path,
            &FetchError::UnknownPath { path: path.clone() },
        ));
    }

    let Query(pairs) = query.map_err(|e| {
        tracing::debug!(path = %path, error = %e, "Malformed query string");
        ApiError::not_found("Invalid query string")
    })?;
    let request = state.sources.request_for(&path, pairs);

    if state.config.is_bypassed(&path) {
        with_metrics(|m| m.record_bypass());
        let payload = state
            .cache
            .fetch_uncached(&request, state.sources.as_ref())
            .await
            .map_err(|e| ApiError::from_fetch(&path, &e))?;
        return Ok(text_response(payload, "bypass"));
    }

    match state.cache.get(&request, state.sources.as_ref()).await {
        Ok(read) => {
            with_metrics(|m| m.record_cache_lookup(read.source()));
            let source = read.source().as_str();
            Ok(text_response(read.into_payload(), source))
        }
        Err(e) => {
            with_metrics(|m| m.record_cache_failure());
            Err(ApiError::from_fetch(&path, &e))
        }
    }
}
