//! Error types for subnet-mirror operations

use std::time::Duration;
use thiserror::Error;

/// Cache storage errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Cache I/O failed for {key}: {reason}")]
    Io { key: String, reason: String },

    #[error("Cache entry {key} is corrupt: {reason}")]
    CorruptEntry { key: String, reason: String },

    #[error("Request record {key} is corrupt: {reason}")]
    CorruptRecord { key: String, reason: String },

    #[error("Serialization failed for {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Cache directory unavailable at {path}: {reason}")]
    DirectoryUnavailable { path: String, reason: String },
}

/// Upstream fetch errors.
///
/// Every variant is a per-request failure; none of them corrupt a cache entry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("No source serves path {path}")]
    UnknownPath { path: String },

    #[error("Invalid value for parameter {param}: {value}")]
    InvalidParameter { param: String, value: String },

    #[error("Upstream {source_name} failed: {reason}")]
    Upstream { source_name: String, reason: String },

    #[error("Upstream {source_name} timed out after {after:?}")]
    Timeout { source_name: String, after: Duration },

    #[error("Upstream {source_name} returned an empty result")]
    EmptyResult { source_name: String },
}

impl FetchError {
    /// Whether retrying the same request later could succeed.
    ///
    /// Non-transient failures are caused by the request itself.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Upstream { .. } | Self::Timeout { .. } | Self::EmptyResult { .. })
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },
}

/// Master error type for all subnet-mirror errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MirrorError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for subnet-mirror operations.
pub type MirrorResult<T> = Result<T, MirrorError>;

// =============================================================================
// TESTS
// =============================================================================
