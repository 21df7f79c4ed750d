//! Cache Refresh Background Task
//!
//! Periodically walks every known request and re-fetches the ones whose
//! cache entry is missing or older than the TTL, so that clients mostly
//! see fresh hits without waiting on the upstream.
//!
//! A refresh never blocks unrelated keys: each entry goes through the same
//! per-key gate as inline requests, and at most `concurrency` entries are
//! refreshed at once. A failed refresh leaves the existing entry in place.
//!
//! # Configuration
//!
//! ```rust
//! use mirror_api::jobs::RefreshConfig;
//! use std::time::Duration;
//!
//! let config = RefreshConfig {
//!     enabled: true,
//!     interval: Duration::from_secs(60), // Scan every minute
//!     concurrency: 4,                    // Up to 4 upstream calls at once
//! };
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{self, StreamExt};
use mirror_core::ConfigError;
use mirror_storage::{CacheBackend, Fetcher, ReadThroughCache, RefreshOutcome};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::{parse_flag, parse_var, ApiConfig};
use crate::constants::{DEFAULT_REFRESH_CONCURRENCY, DEFAULT_REFRESH_INTERVAL_SECS};
use crate::sources::SourceRegistry;
use crate::telemetry::with_metrics;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the cache refresh background task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshConfig {
    /// Whether the task runs at all (default: true)
    pub enabled: bool,

    /// How often to scan known requests (default: 60 seconds).
    /// Must not exceed the cache TTL.
    pub interval: Duration,

    /// Maximum entries refreshed concurrently within one cycle (default: 4)
    pub concurrency: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
            concurrency: DEFAULT_REFRESH_CONCURRENCY,
        }
    }
}

impl RefreshConfig {
    /// Read the refresh settings through `lookup`.
    ///
    /// # Environment Variables
    /// - `MIRROR_REFRESH_ENABLED`: run the task (default: true)
    /// - `MIRROR_REFRESH_INTERVAL_SECS`: scan interval (default: 60)
    /// - `MIRROR_REFRESH_CONCURRENCY`: concurrent refreshes per cycle (default: 4)
    pub fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            enabled: parse_flag(lookup, "MIRROR_REFRESH_ENABLED", true)?,
            interval: Duration::from_secs(parse_var(
                lookup,
                "MIRROR_REFRESH_INTERVAL_SECS",
                DEFAULT_REFRESH_INTERVAL_SECS,
            )?),
            concurrency: parse_var(lookup, "MIRROR_REFRESH_CONCURRENCY", DEFAULT_REFRESH_CONCURRENCY)?,
        })
    }
}

// ============================================================================
// SCOPE
// ============================================================================

/// Which recorded requests the task may refresh.
#[derive(Debug, Clone, Default)]
pub struct RefreshScope {
    excluded: HashSet<String>,
    allowed: Option<HashSet<String>>,
}

impl RefreshScope {
    /// Every recorded request.
    pub fn all() -> Self {
        Self::default()
    }

    /// Never refresh these paths.
    pub fn excluding<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Only refresh these paths.
    pub fn restricted_to<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    /// Served paths minus ignored and bypassed ones.
    pub fn from_config(config: &ApiConfig, sources: &SourceRegistry) -> Self {
        Self::all()
            .restricted_to(sources.paths())
            .excluding(config.ignored_paths.iter().cloned())
            .excluding(config.bypass_paths.iter().cloned())
    }

    pub fn includes(&self, path: &str) -> bool {
        !self.excluded.contains(path)
            && self.allowed.as_ref().map_or(true, |allowed| allowed.contains(path))
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for refresh activity since startup.
#[derive(Debug, Default)]
pub struct RefreshMetrics {
    /// Cycles completed
    pub cycles: AtomicU64,

    /// Entries re-fetched and written
    pub refreshed: AtomicU64,

    /// Entries found fresh
    pub skipped: AtomicU64,

    /// Records outside the refresh scope
    pub excluded: AtomicU64,

    /// Fetch or write failures
    pub failures: AtomicU64,

    /// Cycles that could not list known requests
    pub scan_errors: AtomicU64,
}

impl RefreshMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> RefreshSnapshot {
        RefreshSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            refreshed: self.refreshed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            excluded: self.excluded.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            scan_errors: self.scan_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of refresh metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSnapshot {
    pub cycles: u64,
    pub refreshed: u64,
    pub skipped: u64,
    pub excluded: u64,
    pub failures: u64,
    pub scan_errors: u64,
}

/// Result of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub scanned: usize,
    pub excluded: usize,
    pub refreshed: usize,
    pub skipped: usize,
    pub failed: usize,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Background task that keeps known cache entries fresh.
///
/// Runs one cycle per `config.interval` (the first immediately) until the
/// shutdown signal is received, then logs a final summary and returns the
/// collected metrics.
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = tokio::spawn(cache_refresh_task(cache, sources, scope, config, shutdown_rx));
///
/// // On shutdown
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await?;
/// ```
pub async fn cache_refresh_task<B, F>(
    cache: Arc<ReadThroughCache<B>>,
    fetcher: Arc<F>,
    scope: RefreshScope,
    config: RefreshConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<RefreshMetrics>
where
    B: CacheBackend + 'static,
    F: Fetcher + ?Sized + 'static,
{
    let metrics = Arc::new(RefreshMetrics::new());

    let mut refresh_interval = interval(config.interval);
    refresh_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        interval_secs = config.interval.as_secs(),
        concurrency = config.concurrency,
        ttl_secs = cache.freshness().ttl().as_secs(),
        "Cache refresh task started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Cache refresh task shutting down");
                    break;
                }
            }

            _ = refresh_interval.tick() => {
                run_refresh_cycle(&cache, fetcher.as_ref(), &scope, config.concurrency, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        cycles = snapshot.cycles,
        refreshed = snapshot.refreshed,
        skipped = snapshot.skipped,
        excluded = snapshot.excluded,
        failures = snapshot.failures,
        scan_errors = snapshot.scan_errors,
        "Cache refresh task completed"
    );

    metrics
}

/// Perform one refresh cycle over every known request.
pub async fn run_refresh_cycle<B, F>(
    cache: &ReadThroughCache<B>,
    fetcher: &F,
    scope: &RefreshScope,
    concurrency: usize,
    metrics: &RefreshMetrics,
) -> CycleSummary
where
    B: CacheBackend,
    F: Fetcher + ?Sized,
{
    let start = Instant::now();
    let mut summary = CycleSummary::default();

    let records = match cache.backend().list_known_requests().await {
        Ok(records) => records,
        Err(e) => {
            tracing::error!(error = %e, "Failed to list known requests");
            metrics.scan_errors.fetch_add(1, Ordering::Relaxed);
            return summary;
        }
    };
    summary.scanned = records.len();

    let (in_scope, out_of_scope): (Vec<_>, Vec<_>) = records
        .into_iter()
        .partition(|record| scope.includes(record.request.path()));
    summary.excluded = out_of_scope.len();
    metrics
        .excluded
        .fetch_add(out_of_scope.len() as u64, Ordering::Relaxed);

    let outcomes: Vec<RefreshOutcome> = stream::iter(in_scope)
        .map(|record| async move { cache.refresh_if_stale(&record, fetcher).await })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    for outcome in &outcomes {
        with_metrics(|m| m.record_refresh_outcome(outcome));
        match outcome {
            RefreshOutcome::Skipped => {
                summary.skipped += 1;
                metrics.skipped.fetch_add(1, Ordering::Relaxed);
            }
            RefreshOutcome::Refreshed => {
                summary.refreshed += 1;
                metrics.refreshed.fetch_add(1, Ordering::Relaxed);
            }
            RefreshOutcome::FetchFailed(_) | RefreshOutcome::WriteFailed(_) => {
                summary.failed += 1;
                metrics.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    metrics.cycles.fetch_add(1, Ordering::Relaxed);
    with_metrics(|m| m.record_refresh_cycle());

    if summary.refreshed > 0 || summary.failed > 0 {
        tracing::info!(
            scanned = summary.scanned,
            refreshed = summary.refreshed,
            skipped = summary.skipped,
            failed = summary.failed,
            duration_ms = start.elapsed().as_millis(),
            "Cache refresh cycle completed"
        );
    } else {
        tracing::trace!(scanned = summary.scanned, "Cache refresh cycle completed with nothing stale");
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_test_utils::fixtures::{
        balances_request, metagraph_request, subnet_list_request, temp_cache_with_ttl,
    };
    use mirror_test_utils::MockFetcher;

    const TTL: Duration = Duration::from_secs(300);

    #[test]
    fn test_config_default() {
        let config = RefreshConfig::default();
        assert!(config.enabled);
        assert_eq!(config.interval, Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS));
        assert_eq!(config.concurrency, DEFAULT_REFRESH_CONCURRENCY);
    }

    #[test]
    fn test_config_from_lookup() {
        let lookup = |key: &str| match key {
            "MIRROR_REFRESH_ENABLED" => Some("false".to_string()),
            "MIRROR_REFRESH_CONCURRENCY" => Some("8".to_string()),
            _ => None,
        };
        let config = RefreshConfig::from_lookup(&lookup).expect("valid");
        assert!(!config.enabled);
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.interval, Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS));
    }

    #[test]
    fn test_scope() {
        let scope = RefreshScope::all()
            .restricted_to(["/subnet-list", "/metrics/prices"])
            .excluding(["/metrics/prices"]);
        assert!(scope.includes("/subnet-list"));
        assert!(!scope.includes("/metrics/prices"));
        assert!(!scope.includes("/favicon.ico"));
        assert!(RefreshScope::all().includes("/anything"));
    }

    #[tokio::test]
    async fn test_cycle_refreshes_only_stale_entries() {
        let fixture = temp_cache_with_ttl(TTL);
        let fetcher = MockFetcher::versioned("v");
        fixture.cache.get(&subnet_list_request(), &fetcher).await.expect("seed");
        fixture.clock.advance(TTL);
        fixture.cache.get(&metagraph_request("1"), &fetcher).await.expect("seed");
        assert_eq!(fetcher.calls(), 2);

        let metrics = RefreshMetrics::new();
        let summary =
            run_refresh_cycle(&fixture.cache, &fetcher, &RefreshScope::all(), 4, &metrics).await;

        assert_eq!(
            summary,
            CycleSummary {
                scanned: 2,
                excluded: 0,
                refreshed: 1,
                skipped: 1,
                failed: 0,
            }
        );
        assert_eq!(fetcher.calls(), 3);
        assert_eq!(fetcher.requests()[2], subnet_list_request());
    }

    #[tokio::test]
    async fn test_cycle_skips_out_of_scope_requests() {
        let fixture = temp_cache_with_ttl(TTL);
        let fetcher = MockFetcher::versioned("v");
        fixture.cache.get(&subnet_list_request(), &fetcher).await.expect("seed");
        fixture.cache.get(&balances_request(), &fetcher).await.expect("seed");
        fixture.clock.advance(TTL * 2);

        let scope = RefreshScope::all().excluding(["/balances"]);
        let metrics = RefreshMetrics::new();
        let summary = run_refresh_cycle(&fixture.cache, &fetcher, &scope, 4, &metrics).await;

        assert_eq!(summary.excluded, 1);
        assert_eq!(summary.refreshed, 1);
        assert_eq!(metrics.snapshot().excluded, 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_entry() {
        let fixture = temp_cache_with_ttl(TTL);
        let fetcher = MockFetcher::always("original");
        fixture.cache.get(&subnet_list_request(), &fetcher).await.expect("seed");
        fixture.clock.advance(TTL);

        let failing = MockFetcher::unreachable();
        let metrics = RefreshMetrics::new();
        let summary =
            run_refresh_cycle(&fixture.cache, &failing, &RefreshScope::all(), 4, &metrics).await;
        assert_eq!(summary.failed, 1);
        assert_eq!(metrics.snapshot().failures, 1);

        let entry = fixture
            .store
            .read(&subnet_list_request().cache_key())
            .await
            .expect("read")
            .expect("entry kept");
        assert_eq!(entry.payload, b"original");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cycle_respects_concurrency_limit() {
        let fixture = temp_cache_with_ttl(TTL);
        let seed = MockFetcher::always("seed");
        for netuid in 0..6 {
            fixture
                .cache
                .get(&metagraph_request(&netuid.to_string()), &seed)
                .await
                .expect("seed");
        }
        fixture.clock.advance(TTL);

        let slow = MockFetcher::always("fresh").with_delay(Duration::from_millis(100));
        let metrics = RefreshMetrics::new();
        let summary =
            run_refresh_cycle(&fixture.cache, &slow, &RefreshScope::all(), 2, &metrics).await;

        assert_eq!(summary.refreshed, 6);
        assert!(slow.max_in_flight() <= 2);
    }

    #[tokio::test]
    async fn test_task_stops_on_shutdown() {
        let fixture = temp_cache_with_ttl(TTL);
        let fetcher = Arc::new(MockFetcher::versioned("v"));
        fixture.cache.get(&subnet_list_request(), fetcher.as_ref()).await.expect("seed");
        fixture.clock.advance(TTL);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(cache_refresh_task(
            Arc::clone(&fixture.cache),
            Arc::clone(&fetcher),
            RefreshScope::all(),
            RefreshConfig {
                interval: Duration::from_millis(20),
                ..RefreshConfig::default()
            },
            shutdown_rx,
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).expect("send shutdown");
        let metrics = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("task should stop")
            .expect("task should not panic");

        let snapshot = metrics.snapshot();
        assert!(snapshot.cycles >= 1);
        assert_eq!(snapshot.refreshed, 1);
        assert_eq!(fetcher.calls(), 2);
    }
}
