//! Per-key async mutual exclusion.
//!
//! Each [`CacheKey`] maps to its own `tokio::sync::Mutex`, so work on one key
//! never blocks work on another. A slot lives only while some task holds or
//! waits on it; the last guard to release removes it from the map.

use std::sync::Arc;

use dashmap::DashMap;
use mirror_core::CacheKey;
use tokio::sync::{Mutex, OwnedMutexGuard};

type Slots = DashMap<CacheKey, Arc<Mutex<()>>>;

/// Guard held while a key is locked. Dropping it releases the key.
#[derive(Debug)]
pub struct KeyGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: CacheKey,
    slots: Arc<Slots>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // `remove_if` holds the shard lock, so no waiter can clone the slot
        // between the count check and the removal.
        self.slots
            .remove_if(&self.key, |_, slot| Arc::strong_count(slot) == 1);
    }
}

#[derive(Debug, Default)]
pub struct KeyLocks {
    slots: Arc<Slots>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        // The shard guard from `entry` is dropped before we await on the mutex.
        self.slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &CacheKey) -> KeyGuard {
        let guard = self.slot(key).lock_owned().await;
        KeyGuard {
            guard: Some(guard),
            key: key.clone(),
            slots: Arc::clone(&self.slots),
        }
    }

    /// Number of keys currently held or awaited.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
