//! Freshness contracts for cache reads.
//!
//! Freshness is derived, never stored: an entry is fresh while
//! `now - last_written < ttl`.

use std::time::Duration;

use mirror_core::Timestamp;

use super::clock::elapsed_between;

/// TTL-based freshness policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Freshness {
    ttl: Duration,
}

impl Freshness {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// True while the entry is younger than the TTL.
    pub fn is_fresh(&self, last_written: Timestamp, now: Timestamp) -> bool {
        elapsed_between(last_written, now) < self.ttl
    }

    /// Same rule as [`Freshness::is_fresh`], for an age already computed by the store.
    pub fn is_fresh_age(&self, age: Duration) -> bool {
        age < self.ttl
    }
}

/// How a [`CacheRead`] was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadSource {
    /// Fresh entry found on the first lookup.
    Cache,
    /// Another request refreshed the key while this one waited for it.
    Coalesced,
    /// This request called the fetcher and wrote the result.
    Upstream,
    /// The fetcher failed and a stale entry was served instead.
    StaleFallback,
}

impl ReadSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "hit",
            Self::Coalesced => "coalesced",
            Self::Upstream => "miss",
            Self::StaleFallback => "stale_fallback",
        }
    }
}

/// Result of a read-through lookup, carrying staleness metadata.
#[derive(Debug, Clone)]
pub struct CacheRead {
    payload: Vec<u8>,
    written_at: Timestamp,
    source: ReadSource,
}

impl CacheRead {
    pub fn new(payload: Vec<u8>, written_at: Timestamp, source: ReadSource) -> Self {
        Self {
            payload,
            written_at,
            source,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// When the payload was last written to the cache (or fetched).
    pub fn written_at(&self) -> Timestamp {
        self.written_at
    }

    pub fn source(&self) -> ReadSource {
        self.source
    }

    /// True when no upstream call was made by this request.
    pub fn was_cache_hit(&self) -> bool {
        matches!(self.source, ReadSource::Cache | ReadSource::Coalesced)
    }
}
