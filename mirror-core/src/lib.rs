//! subnet-mirror core - data types
//!
//! Pure data structures shared by the storage and API crates: request
//! identity, cache keys and the error taxonomy. No I/O lives here.

use chrono::{DateTime, Utc};

pub mod error;
pub mod key;
pub mod query;

pub use error::{ConfigError, FetchError, MirrorError, MirrorResult, StorageError};
pub use key::{compute_key, CacheKey, CACHE_KEY_LEN};
pub use query::{normalize_path, QueryParams, QueryRequest};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;
