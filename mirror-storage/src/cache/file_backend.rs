//! File-backed cache store.
//!
//! # Layout
//!
//! ```text
//! <root>/entries/<key>.entry    [last_written millis: i64 LE][payload bytes]
//! <root>/requests/<key>.json    RequestRecord as JSON
//! ```
//!
//! # Write safety
//!
//! Every file is written to a temp file in the same directory, fsynced and
//! renamed over the target, all while the key's lock is held. Readers take
//! the same lock, and even without it a rename never exposes a half-written
//! file.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use mirror_core::{CacheKey, MirrorResult, QueryRequest, StorageError, Timestamp};
use tokio::io::AsyncReadExt;

use super::clock::{elapsed_between, Clock, SystemClock};
use super::key_locks::KeyLocks;
use super::traits::{CacheBackend, CacheEntry, CacheStats, RequestRecord, StatsCounters};

const ENTRIES_DIR: &str = "entries";
const REQUESTS_DIR: &str = "requests";
const ENTRY_EXT: &str = "entry";
const RECORD_EXT: &str = "json";
const TEMP_PREFIX: &str = ".tmp-";

/// Size of the timestamp header in an entry file.
const HEADER_LEN: usize = 8;

/// On-disk cache store with per-key locking.
///
/// # Example
///
/// ```ignore
/// use mirror_storage::cache::FileCacheStore;
///
/// let store = FileCacheStore::open("/var/cache/subnet-mirror")?;
/// let key = request.cache_key();
/// store.write(&key, b"netuid,name\n1,alpha\n").await?;
/// let entry = store.read(&key).await?;
/// ```
#[derive(Debug)]
pub struct FileCacheStore {
    root: PathBuf,
    entries_dir: PathBuf,
    requests_dir: PathBuf,
    locks: KeyLocks,
    clock: Arc<dyn Clock>,
    stats: StatsCounters,
}

impl FileCacheStore {
    /// Open (creating if needed) a store rooted at `root`, using the wall clock.
    pub fn open<P: AsRef<Path>>(root: P) -> MirrorResult<Self> {
        Self::open_with_clock(root, Arc::new(SystemClock))
    }

    /// Open a store that stamps and ages entries with `clock`.
    ///
    /// Leftover temp files from an interrupted write are removed.
    pub fn open_with_clock<P: AsRef<Path>>(root: P, clock: Arc<dyn Clock>) -> MirrorResult<Self> {
        let root = root.as_ref().to_path_buf();
        let entries_dir = root.join(ENTRIES_DIR);
        let requests_dir = root.join(REQUESTS_DIR);

        for dir in [&entries_dir, &requests_dir] {
            std::fs::create_dir_all(dir).map_err(|e| StorageError::DirectoryUnavailable {
                path: dir.display().to_string(),
                reason: e.to_string(),
            })?;
            remove_orphaned_temp_files(dir);
        }

        Ok(Self {
            root,
            entries_dir,
            requests_dir,
            locks: KeyLocks::new(),
            clock,
            stats: StatsCounters::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.entries_dir.join(format!("{}.{}", key, ENTRY_EXT))
    }

    fn record_path(&self, key: &CacheKey) -> PathBuf {
        self.requests_dir.join(format!("{}.{}", key, RECORD_EXT))
    }

    async fn persist(&self, dir: &Path, target: PathBuf, bytes: Vec<u8>, key: &CacheKey) -> MirrorResult<()> {
        let dir = dir.to_path_buf();
        let outcome =
            tokio::task::spawn_blocking(move || write_atomically(&dir, &target, &bytes)).await;
        let reason = match outcome {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e.to_string(),
            Err(e) => format!("write task failed: {}", e),
        };
        Err(StorageError::Io {
            key: key.to_string(),
            reason,
        }
        .into())
    }

    async fn read_record(&self, key: &CacheKey) -> MirrorResult<Option<RequestRecord>> {
        let _guard = self.locks.lock(key).await;
        let bytes = match tokio::fs::read(self.record_path(key)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::Io {
                    key: key.to_string(),
                    reason: e.to_string(),
                }
                .into())
            }
        };
        let record: RequestRecord =
            serde_json::from_slice(&bytes).map_err(|e| StorageError::CorruptRecord {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        if &record.key != key {
            return Err(StorageError::CorruptRecord {
                key: key.to_string(),
                reason: format!("record claims key {}", record.key),
            }
            .into());
        }
        Ok(Some(record))
    }
}

#[async_trait]
impl CacheBackend for FileCacheStore {
    async fn read(&self, key: &CacheKey) -> MirrorResult<Option<CacheEntry>> {
        let _guard = self.locks.lock(key).await;

        let bytes = match tokio::fs::read(self.entry_path(key)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                StatsCounters::bump(&self.stats.misses);
                return Ok(None);
            }
            Err(e) => {
                StatsCounters::bump(&self.stats.misses);
                return Err(StorageError::Io {
                    key: key.to_string(),
                    reason: e.to_string(),
                }
                .into());
            }
        };

        match decode_entry(key, &bytes) {
            Ok(Some(entry)) => {
                StatsCounters::bump(&self.stats.hits);
                Ok(Some(entry))
            }
            Ok(None) => {
                StatsCounters::bump(&self.stats.misses);
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Treating corrupt cache entry as a miss");
                StatsCounters::bump(&self.stats.corrupt_entries);
                StatsCounters::bump(&self.stats.misses);
                Ok(None)
            }
        }
    }

    async fn write(&self, key: &CacheKey, payload: &[u8]) -> MirrorResult<Timestamp> {
        let _guard = self.locks.lock(key).await;

        let written_at = self.clock.now();
        let bytes = encode_entry(written_at, payload);
        match self
            .persist(&self.entries_dir, self.entry_path(key), bytes, key)
            .await
        {
            Ok(()) => {
                StatsCounters::bump(&self.stats.writes);
                tracing::debug!(key = %key, bytes = payload.len(), "Cache entry written");
                Ok(written_at)
            }
            Err(e) => {
                StatsCounters::bump(&self.stats.write_failures);
                Err(e)
            }
        }
    }

    async fn record_request(&self, key: &CacheKey, request: &QueryRequest) -> MirrorResult<()> {
        let record = RequestRecord {
            key: key.clone(),
            request: request.clone(),
            recorded_at: self.clock.now(),
        };
        let bytes = serde_json::to_vec_pretty(&record).map_err(|e| StorageError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        let _guard = self.locks.lock(key).await;
        self.persist(&self.requests_dir, self.record_path(key), bytes, key)
            .await
    }

    async fn list_known_requests(&self) -> MirrorResult<Vec<RequestRecord>> {
        let mut dir = tokio::fs::read_dir(&self.requests_dir).await.map_err(|e| {
            StorageError::DirectoryUnavailable {
                path: self.requests_dir.display().to_string(),
                reason: e.to_string(),
            }
        })?;

        let mut records = Vec::new();
        loop {
            let dir_entry = match dir.next_entry().await {
                Ok(Some(dir_entry)) => dir_entry,
                Ok(None) => break,
                Err(e) => {
                    return Err(StorageError::DirectoryUnavailable {
                        path: self.requests_dir.display().to_string(),
                        reason: e.to_string(),
                    }
                    .into())
                }
            };

            let path = dir_entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            let Some(key) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(CacheKey::parse)
            else {
                continue;
            };

            match self.read_record(&key).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping unreadable request record");
                }
            }
        }

        Ok(records)
    }

    async fn age(&self, key: &CacheKey) -> MirrorResult<Option<Duration>> {
        let _guard = self.locks.lock(key).await;

        let mut file = match tokio::fs::File::open(self.entry_path(key)).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::Io {
                    key: key.to_string(),
                    reason: e.to_string(),
                }
                .into())
            }
        };

        let io_err = |e: std::io::Error| StorageError::Io {
            key: key.to_string(),
            reason: e.to_string(),
        };
        let len = file.metadata().await.map_err(io_err)?.len();
        // Empty and truncated entries read as missing, so they have no age.
        if len <= HEADER_LEN as u64 {
            return Ok(None);
        }

        let mut header = [0u8; HEADER_LEN];
        file.read_exact(&mut header).await.map_err(io_err)?;
        Ok(parse_timestamp(header).map(|written| elapsed_between(written, self.clock.now())))
    }

    fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }
}

// ============================================================================
// ENCODING
// ============================================================================

fn encode_entry(written_at: Timestamp, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(&written_at.timestamp_millis().to_le_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

fn parse_timestamp(header: [u8; HEADER_LEN]) -> Option<Timestamp> {
    DateTime::from_timestamp_millis(i64::from_le_bytes(header))
}

/// Decode an entry file.
///
/// `Ok(None)` for an entry with an empty payload, `Err` for a truncated header
/// or an out-of-range timestamp.
fn decode_entry(key: &CacheKey, bytes: &[u8]) -> Result<Option<CacheEntry>, StorageError> {
    let header: [u8; HEADER_LEN] = bytes
        .get(..HEADER_LEN)
        .and_then(|h| h.try_into().ok())
        .ok_or_else(|| StorageError::CorruptEntry {
            key: key.to_string(),
            reason: format!("{} bytes is shorter than the header", bytes.len()),
        })?;
    let last_written = parse_timestamp(header).ok_or_else(|| StorageError::CorruptEntry {
        key: key.to_string(),
        reason: "timestamp out of range".to_string(),
    })?;

    let payload = &bytes[HEADER_LEN..];
    if payload.is_empty() {
        return Ok(None);
    }
    Ok(Some(CacheEntry {
        payload: payload.to_vec(),
        last_written,
    }))
}

// ============================================================================
// FILESYSTEM HELPERS
// ============================================================================

fn write_atomically(dir: &Path, target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

fn remove_orphaned_temp_files(dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let is_temp = entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with(TEMP_PREFIX))
            .unwrap_or(false);
        if is_temp {
            if let Err(e) = std::fs::remove_file(entry.path()) {
                tracing::warn!(path = %entry.path().display(), error = %e, "Failed to remove orphaned temp file");
            }
        }
    }
}
