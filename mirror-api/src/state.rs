//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::Instant;

use mirror_storage::{FileCacheStore, ReadThroughCache};

use crate::config::ApiConfig;
use crate::error::ApiResult;
use crate::sources::SourceRegistry;

/// The read-through cache over the on-disk store.
pub type ApiCache = ReadThroughCache<FileCacheStore>;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<ApiCache>,
    /// Fetchers for every served query path.
    pub sources: Arc<SourceRegistry>,
    pub config: Arc<ApiConfig>,
    pub start_time: Instant,
}

impl AppState {
    /// Open the cache store and register sources from `config`.
    pub fn from_config(config: ApiConfig) -> ApiResult<Self> {
        let store = FileCacheStore::open(&config.cache.dir)?;
        tracing::info!(
            cache_dir = %store.root().display(),
            ttl_secs = config.cache.ttl.as_secs(),
            serve_stale_on_error = config.cache.serve_stale_on_error,
            "Cache store opened"
        );
        let cache = ReadThroughCache::new(Arc::new(store), config.cache.to_cache_config());
        let sources = SourceRegistry::from_config(&config.sources)?;
        Ok(Self::from_parts(Arc::new(cache), Arc::new(sources), config))
    }

    pub fn from_parts(cache: Arc<ApiCache>, sources: Arc<SourceRegistry>, config: ApiConfig) -> Self {
        Self {
            cache,
            sources,
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }
}

crate::impl_from_ref!(Arc<ApiCache>, cache);
crate::impl_from_ref!(Arc<SourceRegistry>, sources);
crate::impl_from_ref!(Arc<ApiConfig>, config);
crate::impl_from_ref!(Instant, start_time);
