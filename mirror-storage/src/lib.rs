//! subnet-mirror storage - the query cache
//!
//! On-disk cache entries and request records, per-key locking, and the
//! read-through layer shared by the HTTP server and the background refresher.

pub mod cache;

pub use cache::{
    CacheBackend, CacheConfig, CacheEntry, CacheRead, CacheStats, Clock, FileCacheStore, Fetcher,
    Freshness, ManualClock, ReadSource, ReadThroughCache, ReadThroughStats, RefreshOutcome,
    RequestRecord, SystemClock,
};
