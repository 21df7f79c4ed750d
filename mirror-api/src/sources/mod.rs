//! Upstream data sources.
//!
//! Each supported query path is served by one [`Fetcher`]. The
//! [`SourceRegistry`] maps paths to fetchers and is itself the fetcher the
//! cache calls. Sources declare the query parameters they read; anything
//! else a client sends is dropped before the request is fingerprinted.

pub mod balances;
pub mod btcli;
pub mod metagraph;
pub mod metrics_feed;
pub mod registrations;
pub mod subnet_list;
pub mod table;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use mirror_core::{normalize_path, FetchError, QueryParams, QueryRequest};
use mirror_storage::Fetcher;

use crate::config::SourceConfig;
use crate::error::ApiResult;
use crate::telemetry::with_metrics;

pub use balances::BalancesSource;
pub use btcli::BtcliRunner;
pub use metagraph::MetagraphSource;
pub use metrics_feed::MetricsFeedSource;
pub use registrations::RegistrationsSource;
pub use subnet_list::SubnetListSource;

#[derive(Clone)]
struct RegisteredSource {
    fetcher: Arc<dyn Fetcher>,
    params: Vec<String>,
}

/// Path-to-fetcher dispatch table.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<String, RegisteredSource>,
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("paths", &self.paths())
            .finish()
    }
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `path` with a `fetcher` that reads no query parameters.
    pub fn with_source(self, path: &str, fetcher: Arc<dyn Fetcher>) -> Self {
        self.with_source_accepting(path, fetcher, &[])
    }

    /// Serve `path` with `fetcher`, keeping only the named query parameters.
    pub fn with_source_accepting(
        mut self,
        path: &str,
        fetcher: Arc<dyn Fetcher>,
        params: &[&str],
    ) -> Self {
        let params = params.iter().map(|p| p.to_string()).collect();
        self.sources
            .insert(normalize_path(path), RegisteredSource { fetcher, params });
        self
    }

    /// Register every built-in source plus one per configured metrics feed.
    pub fn from_config(config: &SourceConfig) -> ApiResult<Self> {
        let runner = Arc::new(BtcliRunner::from_config(config));
        let mut registry = Self::new()
            .with_source(
                subnet_list::PATH,
                Arc::new(SubnetListSource::new(Arc::clone(&runner))),
            )
            .with_source_accepting(
                metagraph::PATH,
                Arc::new(MetagraphSource::new(Arc::clone(&runner))),
                metagraph::PARAMS,
            )
            .with_source(
                balances::PATH,
                Arc::new(BalancesSource::new(
                    Arc::clone(&runner),
                    config.wallet_path.clone(),
                )),
            )
            .with_source(
                registrations::PATH,
                Arc::new(RegistrationsSource::new(config.registration_log_dir.clone())),
            );

        if !config.metrics_feeds.is_empty() {
            let client = metrics_feed::build_client(config.fetch_timeout)?;
            for feed in &config.metrics_feeds {
                registry = registry.with_source(
                    &feed.path(),
                    Arc::new(MetricsFeedSource::new(feed, client.clone(), config.fetch_timeout)),
                );
            }
        }

        tracing::info!(paths = ?registry.paths(), "Sources registered");
        Ok(registry)
    }

    /// True when some source answers `path`.
    pub fn serves(&self, path: &str) -> bool {
        self.sources.contains_key(path)
    }

    /// Build the request for `path`, dropping parameters its source does
    /// not read so they cannot mint new cache keys.
    pub fn request_for<I>(&self, path: &str, pairs: I) -> QueryRequest
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let accepted = self
            .sources
            .get(path)
            .map(|source| source.params.as_slice())
            .unwrap_or_default();
        let (kept, dropped): (Vec<_>, Vec<_>) = pairs
            .into_iter()
            .partition(|(name, _)| accepted.iter().any(|p| p == name));
        if !dropped.is_empty() {
            tracing::debug!(
                path = %path,
                dropped = ?dropped.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>(),
                "Ignoring unsupported query parameters"
            );
        }
        QueryRequest::new(path, QueryParams::from_pairs(kept))
    }

    /// Registered paths, sorted.
    pub fn paths(&self) -> Vec<&str> {
        self.sources.keys().map(String::as_str).collect()
    }
}

#[async_trait]
impl Fetcher for SourceRegistry {
    async fn fetch(&self, request: &QueryRequest) -> Result<String, FetchError> {
        let Some(source) = self.sources.get(request.path()) else {
            return Err(FetchError::UnknownPath {
                path: request.path().to_string(),
            });
        };

        let start = Instant::now();
        let result = source.fetcher.fetch(request).await;
        let elapsed = start.elapsed();
        with_metrics(|m| m.record_fetch(request.path(), result.is_ok(), elapsed.as_secs_f64()));

        match &result {
            Ok(payload) => tracing::debug!(
                path = %request.path(),
                bytes = payload.len(),
                duration_ms = elapsed.as_millis(),
                "Upstream fetch completed"
            ),
            Err(e) if e.is_transient() => tracing::warn!(
                path = %request.path(),
                error = %e,
                duration_ms = elapsed.as_millis(),
                "Upstream fetch failed"
            ),
            Err(e) => tracing::debug!(
                path = %request.path(),
                error = %e,
                "Request rejected by source"
            ),
        }
        result
    }
}
