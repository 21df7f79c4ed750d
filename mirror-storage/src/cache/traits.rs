//! Cache backend trait and the records it stores.
//!
//! The backend owns the persisted state; the inline server and the background
//! refresher only ever go through these operations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mirror_core::{CacheKey, MirrorResult, QueryRequest, Timestamp};
use serde::{Deserialize, Serialize};

/// A cached payload and when it was last written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Opaque payload bytes (delimited text in practice).
    pub payload: Vec<u8>,
    /// Timestamp of the last successful write.
    pub last_written: Timestamp,
}

/// The last request seen for a key, kept so the key can be refreshed without
/// live traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub key: CacheKey,
    pub request: QueryRequest,
    pub recorded_at: Timestamp,
}

/// Storage for cache entries and request records, addressed by [`CacheKey`].
///
/// # Concurrency
///
/// Operations on the same key are mutually exclusive; operations on
/// different keys never wait on each other. A `read` never observes a
/// partially written payload.
///
/// # Failure semantics
///
/// `read` folds "absent", "empty" and "corrupt" into `Ok(None)`. An `Err`
/// means the storage itself failed; callers treat both as a miss.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Read the entry for `key`.
    async fn read(&self, key: &CacheKey) -> MirrorResult<Option<CacheEntry>>;

    /// Persist `payload` for `key`, returning the new `last_written`.
    async fn write(&self, key: &CacheKey, payload: &[u8]) -> MirrorResult<Timestamp>;

    /// Persist or overwrite the request record for `key`.
    async fn record_request(&self, key: &CacheKey, request: &QueryRequest) -> MirrorResult<()>;

    /// All persisted request records, in no particular order.
    async fn list_known_requests(&self) -> MirrorResult<Vec<RequestRecord>>;

    /// Time since the entry's last write, or `None` if there is no entry.
    async fn age(&self, key: &CacheKey) -> MirrorResult<Option<Duration>>;

    /// Snapshot of the backend's counters.
    fn stats(&self) -> CacheStats;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Reads that found a usable entry (fresh or stale).
    pub hits: u64,
    /// Reads that found nothing usable.
    pub misses: u64,
    /// Entries that existed but could not be parsed.
    pub corrupt_entries: u64,
    /// Successful writes.
    pub writes: u64,
    /// Failed writes.
    pub write_failures: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Lock-free counters behind [`CacheStats`].
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub corrupt_entries: AtomicU64,
    pub writes: AtomicU64,
    pub write_failures: AtomicU64,
}

impl StatsCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            corrupt_entries: self.corrupt_entries.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}
