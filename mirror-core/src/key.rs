//! Request fingerprinting.
//!
//! A [`CacheKey`] is the SHA-256 of a length-prefixed canonical encoding of
//! the normalized path and the sorted parameter multimap. The hex digest is
//! used directly as the on-disk file stem, so keys are always 64 lowercase
//! hex characters.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::query::{normalize_path, QueryParams, QueryRequest};

/// Length of a hex-encoded key.
pub const CACHE_KEY_LEN: usize = 64;

/// Deterministic fingerprint of a `(path, params)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheKey(String);

impl CacheKey {
    /// Parse a key from its hex form (e.g. a file stem).
    ///
    /// Returns `None` for anything that is not 64 lowercase hex characters.
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == CACHE_KEY_LEN
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CacheKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("not a cache key: {}", value))
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

fn hash_field(hasher: &mut Sha256, tag: u8, bytes: &[u8]) {
    hasher.update([tag]);
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Compute the fingerprint for a request path and its parameters.
pub fn compute_key(path: &str, params: &QueryParams) -> CacheKey {
    let mut hasher = Sha256::new();
    hash_field(&mut hasher, b'P', normalize_path(path).as_bytes());
    for (name, values) in params.iter() {
        hash_field(&mut hasher, b'K', name.as_bytes());
        for value in values {
            hash_field(&mut hasher, b'V', value.as_bytes());
        }
    }
    CacheKey(hex::encode(hasher.finalize()))
}

impl QueryRequest {
    /// Fingerprint of this request.
    pub fn cache_key(&self) -> CacheKey {
        compute_key(self.path(), self.params())
    }
}
