//! File-backed query cache with explicit freshness.
//!
//! Entries are addressed by [`mirror_core::CacheKey`] and never hide their age:
//! every read through [`ReadThroughCache`] returns a [`CacheRead`] carrying
//! when the payload was written and how it was obtained.
//!
//! # Locking
//!
//! Two per-key lock maps are involved, always taken in this order:
//!
//! 1. the read-through gate, held across an upstream fetch and the write
//!    that follows it, so concurrent misses for one key share one fetch;
//! 2. the store's file lock, held only around the file read or write.
//!
//! Different keys never contend on either map.
//!
//! # Example
//!
//! ```ignore
//! let store = Arc::new(FileCacheStore::open("./cache")?);
//! let cache = ReadThroughCache::new(store, CacheConfig::new().with_ttl(ttl));
//!
//! let read = cache.get(&request, &sources).await?;
//! if read.source() == ReadSource::StaleFallback {
//!     tracing::debug!(written_at = %read.written_at(), "served an older entry");
//! }
//! ```

pub mod clock;
pub mod file_backend;
pub mod freshness;
pub mod key_locks;
pub mod read_through;
pub mod traits;

pub use clock::{elapsed_between, Clock, ManualClock, SystemClock};
pub use file_backend::FileCacheStore;
pub use freshness::{CacheRead, Freshness, ReadSource};
pub use key_locks::{KeyGuard, KeyLocks};
pub use read_through::{
    require_payload, CacheConfig, Fetcher, ReadThroughCache, ReadThroughStats, RefreshOutcome,
};
pub use traits::{CacheBackend, CacheEntry, CacheStats, RequestRecord};
