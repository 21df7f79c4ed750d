//! Read-through cache in front of an upstream [`Fetcher`].
//!
//! Two actors go through this type: inbound requests call [`ReadThroughCache::get`]
//! and the background job calls [`ReadThroughCache::refresh_if_stale`]. Both
//! take the key's single-flight gate before calling the fetcher, so at most
//! one upstream call per key is in flight. The backend's own per-key file lock
//! is taken inside the gate and only around file I/O.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mirror_core::{CacheKey, FetchError, MirrorError, QueryRequest};
use serde::Serialize;

use super::clock::Clock;
use super::freshness::{CacheRead, Freshness, ReadSource};
use super::key_locks::KeyLocks;
use super::traits::{CacheBackend, CacheEntry, CacheStats, RequestRecord};

/// Configuration for the read-through cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Freshness window for entries.
    pub ttl: Duration,
    /// Serve a stale entry instead of failing when the upstream fetch fails.
    pub serve_stale_on_error: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            serve_stale_on_error: false,
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the entry TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Enable or disable the stale fallback.
    pub fn with_serve_stale_on_error(mut self, enabled: bool) -> Self {
        self.serve_stale_on_error = enabled;
        self
    }
}

/// Upstream data source for cache misses.
///
/// Implementations bound their own latency (subprocess or HTTP timeouts);
/// the cache adds none.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Produce the text payload for `request`.
    async fn fetch(&self, request: &QueryRequest) -> Result<String, FetchError>;
}

#[async_trait]
impl<F: Fetcher + ?Sized> Fetcher for Arc<F> {
    async fn fetch(&self, request: &QueryRequest) -> Result<String, FetchError> {
        (**self).fetch(request).await
    }
}

/// Result of one background refresh attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Entry was still fresh; no upstream call made.
    Skipped,
    /// Fetched and written.
    Refreshed,
    /// Upstream failed; the existing entry (if any) was left in place.
    FetchFailed(FetchError),
    /// Upstream succeeded but the payload could not be persisted.
    WriteFailed(MirrorError),
}

impl RefreshOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Refreshed => "refreshed",
            Self::FetchFailed(_) => "fetch_failed",
            Self::WriteFailed(_) => "write_failed",
        }
    }
}

/// Counters for the read-through layer, alongside the backend's [`CacheStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReadThroughStats {
    /// Fresh entries served without waiting.
    pub fresh_hits: u64,
    /// Requests served by another request's refresh of the same key.
    pub coalesced: u64,
    /// Lookups that found an entry past its TTL.
    pub stale_reads: u64,
    /// Upstream calls made by inbound requests.
    pub inline_fetches: u64,
    /// Inbound upstream calls that failed.
    pub inline_fetch_failures: u64,
    /// Stale entries served after an upstream failure.
    pub stale_fallbacks: u64,
    /// Requests that skipped the cache entirely.
    pub bypassed: u64,
    /// Background refreshes that wrote a new entry.
    pub background_refreshes: u64,
    /// Background checks that found the entry fresh.
    pub background_skips: u64,
    /// Background refreshes that failed to fetch or write.
    pub background_failures: u64,
}

#[derive(Debug, Default)]
struct ReadThroughCounters {
    fresh_hits: AtomicU64,
    coalesced: AtomicU64,
    stale_reads: AtomicU64,
    inline_fetches: AtomicU64,
    inline_fetch_failures: AtomicU64,
    stale_fallbacks: AtomicU64,
    bypassed: AtomicU64,
    background_refreshes: AtomicU64,
    background_skips: AtomicU64,
    background_failures: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl ReadThroughCounters {
    fn snapshot(&self) -> ReadThroughStats {
        ReadThroughStats {
            fresh_hits: self.fresh_hits.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            stale_reads: self.stale_reads.load(Ordering::Relaxed),
            inline_fetches: self.inline_fetches.load(Ordering::Relaxed),
            inline_fetch_failures: self.inline_fetch_failures.load(Ordering::Relaxed),
            stale_fallbacks: self.stale_fallbacks.load(Ordering::Relaxed),
            bypassed: self.bypassed.load(Ordering::Relaxed),
            background_refreshes: self.background_refreshes.load(Ordering::Relaxed),
            background_skips: self.background_skips.load(Ordering::Relaxed),
            background_failures: self.background_failures.load(Ordering::Relaxed),
        }
    }
}

/// Reject payloads that carry no data.
pub fn require_payload(request: &QueryRequest, payload: String) -> Result<String, FetchError> {
    if payload.trim().is_empty() {
        return Err(FetchError::EmptyResult {
            source_name: request.path().to_string(),
        });
    }
    Ok(payload)
}

/// Read-through cache with single-flight refresh per key.
///
/// # Example
///
/// ```ignore
/// let store = Arc::new(FileCacheStore::open("./cache")?);
/// let cache = ReadThroughCache::new(store, CacheConfig::new().with_ttl(ttl));
///
/// let read = cache.get(&request, &sources).await?;
/// if read.was_cache_hit() { /* no upstream call */ }
/// ```
pub struct ReadThroughCache<B: CacheBackend> {
    backend: Arc<B>,
    clock: Arc<dyn Clock>,
    freshness: Freshness,
    config: CacheConfig,
    gates: KeyLocks,
    counters: ReadThroughCounters,
}

impl<B: CacheBackend> std::fmt::Debug for ReadThroughCache<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadThroughCache")
            .field("config", &self.config)
            .field("gates", &self.gates.len())
            .finish()
    }
}

impl<B: CacheBackend> ReadThroughCache<B> {
    /// Create a cache that ages entries by the wall clock.
    pub fn new(backend: Arc<B>, config: CacheConfig) -> Self {
        Self::with_clock(backend, config, Arc::new(super::clock::SystemClock))
    }

    /// Create a cache that ages entries by `clock`.
    ///
    /// Use the same clock the backend stamps writes with.
    pub fn with_clock(backend: Arc<B>, config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            clock,
            freshness: Freshness::new(config.ttl),
            config,
            gates: KeyLocks::new(),
            counters: ReadThroughCounters::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn freshness(&self) -> Freshness {
        self.freshness
    }

    pub fn stats(&self) -> ReadThroughStats {
        self.counters.snapshot()
    }

    pub fn backend_stats(&self) -> CacheStats {
        self.backend.stats()
    }

    /// Serve `request` from the cache, calling `fetcher` on a miss or stale entry.
    ///
    /// Concurrent callers for the same key share one upstream call. A fetch
    /// failure never touches the stored entry. A write failure is logged and
    /// the fetched payload is still returned.
    ///
    /// The request record is rewritten after every successful upstream
    /// fetch made here; hits leave it as is.
    pub async fn get<F>(&self, request: &QueryRequest, fetcher: &F) -> Result<CacheRead, FetchError>
    where
        F: Fetcher + ?Sized,
    {
        let key = request.cache_key();

        if let Some(entry) = self.lookup(&key).await {
            if self.freshness.is_fresh(entry.last_written, self.clock.now()) {
                bump(&self.counters.fresh_hits);
                return Ok(CacheRead::new(entry.payload, entry.last_written, ReadSource::Cache));
            }
            bump(&self.counters.stale_reads);
        }

        let _gate = self.gates.lock(&key).await;

        // Whoever held the gate before us may have refreshed the key.
        let existing = self.lookup(&key).await;
        if let Some(entry) = &existing {
            if self.freshness.is_fresh(entry.last_written, self.clock.now()) {
                bump(&self.counters.coalesced);
                return Ok(CacheRead::new(
                    entry.payload.clone(),
                    entry.last_written,
                    ReadSource::Coalesced,
                ));
            }
        }

        bump(&self.counters.inline_fetches);
        let fetched = fetcher
            .fetch(request)
            .await
            .and_then(|payload| require_payload(request, payload));

        match fetched {
            Ok(payload) => {
                let payload = payload.into_bytes();
                let written_at = match self.backend.write(&key, &payload).await {
                    Ok(written_at) => written_at,
                    Err(e) => {
                        tracing::error!(key = %key, path = %request.path(), error = %e, "Failed to write cache entry");
                        self.clock.now()
                    }
                };
                if let Err(e) = self.backend.record_request(&key, request).await {
                    tracing::error!(key = %key, path = %request.path(), error = %e, "Failed to record request");
                }
                Ok(CacheRead::new(payload, written_at, ReadSource::Upstream))
            }
            Err(e) => {
                bump(&self.counters.inline_fetch_failures);
                match existing {
                    Some(entry) if self.config.serve_stale_on_error => {
                        bump(&self.counters.stale_fallbacks);
                        tracing::warn!(key = %key, path = %request.path(), error = %e, "Upstream failed, serving stale entry");
                        Ok(CacheRead::new(
                            entry.payload,
                            entry.last_written,
                            ReadSource::StaleFallback,
                        ))
                    }
                    _ => {
                        tracing::warn!(key = %key, path = %request.path(), error = %e, "Upstream fetch failed");
                        Err(e)
                    }
                }
            }
        }
    }

    /// Call `fetcher` without reading or writing the cache.
    pub async fn fetch_uncached<F>(&self, request: &QueryRequest, fetcher: &F) -> Result<String, FetchError>
    where
        F: Fetcher + ?Sized,
    {
        bump(&self.counters.bypassed);
        fetcher
            .fetch(request)
            .await
            .and_then(|payload| require_payload(request, payload))
    }

    /// Refresh the entry behind `record` if it is missing or stale.
    ///
    /// A failed fetch leaves the current entry in place.
    pub async fn refresh_if_stale<F>(&self, record: &RequestRecord, fetcher: &F) -> RefreshOutcome
    where
        F: Fetcher + ?Sized,
    {
        let key = &record.key;
        let _gate = self.gates.lock(key).await;

        match self.backend.age(key).await {
            Ok(Some(age)) if self.freshness.is_fresh_age(age) => {
                bump(&self.counters.background_skips);
                tracing::trace!(key = %key, age_secs = age.as_secs(), "Entry fresh, skipping refresh");
                return RefreshOutcome::Skipped;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Could not read entry age, refreshing");
            }
        }

        let fetched = fetcher
            .fetch(&record.request)
            .await
            .and_then(|payload| require_payload(&record.request, payload));

        let outcome = match fetched {
            Ok(payload) => match self.backend.write(key, payload.as_bytes()).await {
                Ok(_) => RefreshOutcome::Refreshed,
                Err(e) => {
                    tracing::error!(key = %key, path = %record.request.path(), error = %e, "Failed to write refreshed entry");
                    RefreshOutcome::WriteFailed(e)
                }
            },
            Err(e) => {
                tracing::warn!(key = %key, path = %record.request.path(), error = %e, "Background refresh failed, keeping existing entry");
                RefreshOutcome::FetchFailed(e)
            }
        };

        match outcome {
            RefreshOutcome::Refreshed => bump(&self.counters.background_refreshes),
            _ => bump(&self.counters.background_failures),
        }
        outcome
    }

    async fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        match self.backend.read(key).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::file_backend::FileCacheStore;
    use mirror_core::QueryParams;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    struct StubFetcher {
        reply: Result<String, FetchError>,
        calls: AtomicUsize,
    }

    impl StubFetcher {
        fn ok(payload: &str) -> Self {
            Self {
                reply: Ok(payload.to_string()),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                reply: Err(FetchError::Upstream {
                    source_name: "stub".to_string(),
                    reason: "node unreachable".to_string(),
                }),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn fetch(&self, _request: &QueryRequest) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone()
        }
    }

    fn setup(config: CacheConfig) -> (ReadThroughCache<FileCacheStore>, ManualClock, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let clock = ManualClock::new();
        let store = FileCacheStore::open_with_clock(temp_dir.path(), Arc::new(clock.clone()))
            .expect("Failed to open store");
        let cache = ReadThroughCache::with_clock(Arc::new(store), config, Arc::new(clock.clone()));
        (cache, clock, temp_dir)
    }

    fn subnet_list() -> QueryRequest {
        QueryRequest::new("/subnet-list", QueryParams::new())
    }

    #[tokio::test]
    async fn test_miss_fetches_and_records() {
        let (cache, _clock, _dir) = setup(CacheConfig::default());
        let fetcher = StubFetcher::ok("netuid,name\n1,alpha\n");

        let read = cache.get(&subnet_list(), &fetcher).await.expect("get should succeed");
        assert_eq!(read.source(), ReadSource::Upstream);
        assert_eq!(read.payload(), b"netuid,name\n1,alpha\n");
        assert_eq!(fetcher.calls(), 1);

        let records = cache.backend().list_known_requests().await.expect("list");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].request, subnet_list());
    }

    #[tokio::test]
    async fn test_fresh_hit_skips_fetcher() {
        let (cache, clock, _dir) = setup(CacheConfig::default());
        let fetcher = StubFetcher::ok("payload");

        let first = cache.get(&subnet_list(), &fetcher).await.expect("first");
        clock.advance(Duration::from_secs(10));
        let second = cache.get(&subnet_list(), &fetcher).await.expect("second");

        assert_eq!(fetcher.calls(), 1);
        assert_eq!(second.source(), ReadSource::Cache);
        assert_eq!(second.written_at(), first.written_at());
        assert_eq!(cache.stats().fresh_hits, 1);
    }

    #[tokio::test]
    async fn test_request_record_follows_fetches_not_hits() {
        let ttl = Duration::from_secs(300);
        let (cache, clock, _dir) = setup(CacheConfig::new().with_ttl(ttl));
        let fetcher = StubFetcher::ok("payload");
        let recorded_at = |records: Vec<RequestRecord>| records[0].recorded_at;

        cache.get(&subnet_list(), &fetcher).await.expect("miss");
        let first = recorded_at(cache.backend().list_known_requests().await.expect("list"));

        clock.advance(Duration::from_secs(10));
        cache.get(&subnet_list(), &fetcher).await.expect("hit");
        let after_hit = recorded_at(cache.backend().list_known_requests().await.expect("list"));
        assert_eq!(after_hit, first);

        clock.advance(ttl);
        cache.get(&subnet_list(), &fetcher).await.expect("refetch");
        let after_refetch = recorded_at(cache.backend().list_known_requests().await.expect("list"));
        assert!(after_refetch > first);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_empty_payload_is_not_cached() {
        let (cache, _clock, _dir) = setup(CacheConfig::default());
        let fetcher = StubFetcher::ok("  \n");

        let err = cache.get(&subnet_list(), &fetcher).await.expect_err("empty should fail");
        assert!(matches!(err, FetchError::EmptyResult { .. }));
        assert!(cache
            .backend()
            .read(&subnet_list().cache_key())
            .await
            .expect("read")
            .is_none());
    }

    #[tokio::test]
    async fn test_stale_fallback_when_enabled() {
        let (cache, clock, _dir) =
            setup(CacheConfig::new().with_ttl(Duration::from_secs(60)).with_serve_stale_on_error(true));

        cache
            .get(&subnet_list(), &StubFetcher::ok("old"))
            .await
            .expect("seed");
        clock.advance(Duration::from_secs(120));

        let read = cache
            .get(&subnet_list(), &StubFetcher::failing())
            .await
            .expect("stale fallback");
        assert_eq!(read.source(), ReadSource::StaleFallback);
        assert_eq!(read.payload(), b"old");
    }

    #[tokio::test]
    async fn test_stale_fetch_failure_without_fallback() {
        let (cache, clock, _dir) = setup(CacheConfig::new().with_ttl(Duration::from_secs(60)));

        cache
            .get(&subnet_list(), &StubFetcher::ok("old"))
            .await
            .expect("seed");
        clock.advance(Duration::from_secs(120));

        let result = cache.get(&subnet_list(), &StubFetcher::failing()).await;
        assert!(result.is_err());

        // The stale entry is still there for a later refresh.
        let entry = cache
            .backend()
            .read(&subnet_list().cache_key())
            .await
            .expect("read")
            .expect("entry kept");
        assert_eq!(entry.payload, b"old".to_vec());
    }

    #[tokio::test]
    async fn test_refresh_if_stale_skips_fresh_and_refreshes_stale() {
        let (cache, clock, _dir) = setup(CacheConfig::new().with_ttl(Duration::from_secs(60)));
        let fetcher = StubFetcher::ok("v1");
        cache.get(&subnet_list(), &fetcher).await.expect("seed");

        let record = cache
            .backend()
            .list_known_requests()
            .await
            .expect("list")
            .remove(0);

        assert_eq!(cache.refresh_if_stale(&record, &fetcher).await, RefreshOutcome::Skipped);
        assert_eq!(fetcher.calls(), 1);

        clock.advance(Duration::from_secs(61));
        assert_eq!(cache.refresh_if_stale(&record, &fetcher).await, RefreshOutcome::Refreshed);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_entry() {
        let (cache, clock, _dir) = setup(CacheConfig::new().with_ttl(Duration::from_secs(60)));
        cache
            .get(&subnet_list(), &StubFetcher::ok("kept"))
            .await
            .expect("seed");
        let record = cache
            .backend()
            .list_known_requests()
            .await
            .expect("list")
            .remove(0);

        clock.advance(Duration::from_secs(90));
        let outcome = cache.refresh_if_stale(&record, &StubFetcher::failing()).await;
        assert!(matches!(outcome, RefreshOutcome::FetchFailed(_)));

        let entry = cache
            .backend()
            .read(&record.key)
            .await
            .expect("read")
            .expect("entry kept");
        assert_eq!(entry.payload, b"kept".to_vec());
        assert_eq!(cache.stats().background_failures, 1);
    }

    #[tokio::test]
    async fn test_fetch_uncached_never_touches_store() {
        let (cache, _clock, _dir) = setup(CacheConfig::default());
        let fetcher = StubFetcher::ok("live");
        let request = QueryRequest::new("/metrics/emissions", QueryParams::new());

        for _ in 0..3 {
            let payload = cache.fetch_uncached(&request, &fetcher).await.expect("fetch");
            assert_eq!(payload, "live");
        }
        assert_eq!(fetcher.calls(), 3);
        assert_eq!(cache.backend_stats().writes, 0);
        assert!(cache.backend().list_known_requests().await.expect("list").is_empty());
    }

    #[test]
    fn test_cache_config_builder() {
        let config = CacheConfig::new()
            .with_ttl(Duration::from_secs(1800))
            .with_serve_stale_on_error(true);

        assert_eq!(config.ttl, Duration::from_secs(1800));
        assert!(config.serve_stale_on_error);
    }
}
