//! subnet-mirror Test Utilities
//!
//! Shared test infrastructure for the workspace:
//! - Scripted fetchers that count and time their calls
//! - Proptest generators for paths, params and requests
//! - Fixtures for temp-dir backed stores and caches
//! - Assertions for cache reads

// Re-export core types for convenience
pub use mirror_core::{
    compute_key, CacheKey, FetchError, MirrorError, MirrorResult, QueryParams, QueryRequest,
    StorageError, Timestamp,
};
pub use mirror_storage::{
    CacheBackend, CacheConfig, CacheRead, Clock, FileCacheStore, Fetcher, ManualClock, ReadSource,
    ReadThroughCache, RequestRecord,
};

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

// ============================================================================
// MOCK FETCHERS
// ============================================================================

type Responder = dyn Fn(&QueryRequest, usize) -> Result<String, FetchError> + Send + Sync;

/// Scripted [`Fetcher`] that records every call.
///
/// The responder receives the request and the 1-based call number. An
/// optional delay is slept before answering, which keeps calls in flight
/// long enough for concurrency tests to overlap them.
pub struct MockFetcher {
    responder: RwLock<Arc<Responder>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    log: Mutex<Vec<QueryRequest>>,
}

impl std::fmt::Debug for MockFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockFetcher")
            .field("delay", &self.delay)
            .field("calls", &self.calls())
            .finish()
    }
}

impl MockFetcher {
    pub fn new<R>(responder: R) -> Self
    where
        R: Fn(&QueryRequest, usize) -> Result<String, FetchError> + Send + Sync + 'static,
    {
        Self {
            responder: RwLock::new(Arc::new(responder)),
            delay: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with `payload`.
    pub fn always(payload: impl Into<String>) -> Self {
        let payload = payload.into();
        Self::new(move |_, _| Ok(payload.clone()))
    }

    /// Answer `"{prefix}{n}"` on the n-th call, so each fetch is distinguishable.
    pub fn versioned(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self::new(move |_, n| Ok(format!("{}{}", prefix, n)))
    }

    /// Always fail with `error`.
    pub fn failing(error: FetchError) -> Self {
        Self::new(move |_, _| Err(error.clone()))
    }

    /// Fail with a transient upstream error.
    pub fn unreachable() -> Self {
        Self::failing(FetchError::Upstream {
            source_name: "mock".to_string(),
            reason: "node unreachable".to_string(),
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Swap the responder for subsequent calls.
    pub fn respond_with<R>(&self, responder: R)
    where
        R: Fn(&QueryRequest, usize) -> Result<String, FetchError> + Send + Sync + 'static,
    {
        let mut slot = self.responder.write().unwrap_or_else(|e| e.into_inner());
        *slot = Arc::new(responder);
    }

    /// Number of calls started so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were in flight at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Requests seen, in call order.
    pub fn requests(&self) -> Vec<QueryRequest> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &QueryRequest) -> Result<String, FetchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let responder = Arc::clone(&self.responder.read().unwrap_or_else(|e| e.into_inner()));
        let result = responder(request, call);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest generators for request identity.

    use super::*;
    use proptest::prelude::*;

    /// A normalized request path of one to three segments.
    pub fn arb_path() -> impl Strategy<Value = String> {
        prop::collection::vec("[a-z][a-z0-9-]{0,11}", 1..4)
            .prop_map(|segments| format!("/{}", segments.join("/")))
    }

    /// Raw query pairs, possibly with repeated names.
    pub fn arb_pairs() -> impl Strategy<Value = Vec<(String, String)>> {
        prop::collection::vec(("[a-z]{1,8}", "[a-zA-Z0-9,]{0,10}"), 0..6)
    }

    pub fn arb_params() -> impl Strategy<Value = QueryParams> {
        arb_pairs().prop_map(QueryParams::from_pairs)
    }

    pub fn arb_query_request() -> impl Strategy<Value = QueryRequest> {
        (arb_path(), arb_params()).prop_map(|(path, params)| QueryRequest::new(&path, params))
    }

    /// A non-empty CSV-like payload.
    pub fn arb_payload() -> impl Strategy<Value = String> {
        prop::collection::vec("[a-z0-9]{1,6}(,[a-z0-9]{1,6}){0,4}", 1..20)
            .prop_map(|rows| format!("{}\n", rows.join("\n")))
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built stores, caches and requests.

    use super::*;
    use tempfile::TempDir;

    /// A [`FileCacheStore`] in a temp dir, driven by a manual clock.
    ///
    /// Keep the `TempDir` alive for as long as the store is used.
    pub fn temp_store() -> (Arc<FileCacheStore>, ManualClock, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let clock = ManualClock::new();
        let store = FileCacheStore::open_with_clock(temp_dir.path(), Arc::new(clock.clone()))
            .expect("Failed to open cache store");
        (Arc::new(store), clock, temp_dir)
    }

    /// A read-through cache over a temp store, sharing one manual clock.
    pub struct TestCache {
        pub cache: Arc<ReadThroughCache<FileCacheStore>>,
        pub store: Arc<FileCacheStore>,
        pub clock: ManualClock,
        pub dir: TempDir,
    }

    pub fn temp_cache(config: CacheConfig) -> TestCache {
        let (store, clock, dir) = temp_store();
        let cache = ReadThroughCache::with_clock(Arc::clone(&store), config, Arc::new(clock.clone()));
        TestCache {
            cache: Arc::new(cache),
            store,
            clock,
            dir,
        }
    }

    /// A cache with the given TTL and no stale fallback.
    pub fn temp_cache_with_ttl(ttl: Duration) -> TestCache {
        temp_cache(CacheConfig::new().with_ttl(ttl))
    }

    pub fn subnet_list_request() -> QueryRequest {
        QueryRequest::new("/subnet-list", QueryParams::new())
    }

    pub fn metagraph_request(netuids: &str) -> QueryRequest {
        QueryRequest::new("/metagraph", QueryParams::from_pairs([("netuid", netuids)]))
    }

    pub fn balances_request() -> QueryRequest {
        QueryRequest::new("/balances", QueryParams::new())
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on cache reads.

    use super::*;

    /// Assert the read came from the cache without an upstream call.
    #[track_caller]
    pub fn assert_cache_hit(read: &CacheRead) {
        assert!(
            read.was_cache_hit(),
            "Expected a cache hit, got {:?}",
            read.source()
        );
    }

    /// Assert the read was produced by an upstream fetch.
    #[track_caller]
    pub fn assert_fetched(read: &CacheRead) {
        assert_eq!(read.source(), ReadSource::Upstream, "Expected an upstream fetch");
    }

    #[track_caller]
    pub fn assert_payload(read: &CacheRead, expected: &str) {
        assert_eq!(
            String::from_utf8_lossy(read.payload()),
            expected,
            "Unexpected payload"
        );
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_versioned_fetcher_counts_calls() {
        let fetcher = MockFetcher::versioned("v");
        let request = fixtures::subnet_list_request();

        assert_eq!(fetcher.fetch(&request).await, Ok("v1".to_string()));
        assert_eq!(fetcher.fetch(&request).await, Ok("v2".to_string()));
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(fetcher.requests(), vec![request.clone(), request]);
    }

    #[tokio::test]
    async fn test_respond_with_switches_behavior() {
        let fetcher = MockFetcher::always("ok");
        let request = fixtures::balances_request();
        assert!(fetcher.fetch(&request).await.is_ok());

        fetcher.respond_with(|_, _| {
            Err(FetchError::EmptyResult {
                source_name: "mock".to_string(),
            })
        });
        assert!(fetcher.fetch(&request).await.is_err());
    }

    #[tokio::test]
    async fn test_temp_cache_fixture_shares_clock() {
        let fixture = fixtures::temp_cache_with_ttl(Duration::from_secs(60));
        let fetcher = MockFetcher::always("a,b\n");

        let read = fixture
            .cache
            .get(&fixtures::subnet_list_request(), &fetcher)
            .await
            .expect("get should succeed");
        assertions::assert_fetched(&read);

        let age = fixture
            .store
            .age(&fixtures::subnet_list_request().cache_key())
            .await
            .expect("age")
            .expect("entry exists");
        assert_eq!(age, Duration::ZERO);
    }

    proptest! {
        #[test]
        fn prop_generated_requests_are_normalized(request in generators::arb_query_request()) {
            prop_assert!(request.path().starts_with('/'));
            prop_assert!(!request.path().contains("//"));
        }

        #[test]
        fn prop_generated_payloads_are_non_empty(payload in generators::arb_payload()) {
            prop_assert!(!payload.trim().is_empty());
        }
    }
}
