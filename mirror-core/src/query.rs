//! Request identity: normalized path plus sorted query-parameter multimap.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Query-parameter multimap with a canonical ordering.
///
/// Keys are kept sorted by the underlying `BTreeMap`; values for a key are
/// sorted on insertion so that `?a=2&a=1` and `?a=1&a=2` compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryParams(BTreeMap<String, Vec<String>>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from raw `(name, value)` pairs as they appear in a query string.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut params = Self::new();
        for (name, value) in pairs {
            params.insert(name, value);
        }
        params
    }

    /// Add one value for `name`, keeping values sorted.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let values = self.0.entry(name.into()).or_default();
        let value = value.into();
        let pos = values.partition_point(|existing| existing <= &value);
        values.insert(pos, value);
    }

    /// All values for `name`, in canonical order.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.0.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First value for `name`, if any.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate `(name, values)` in sorted name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

/// Normalize a request path for fingerprinting and routing.
///
/// Ensures a single leading slash, collapses repeated slashes and drops a
/// trailing slash (except for the root path).
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return "/".to_string();
    }
    let mut normalized = String::with_capacity(path.len() + 1);
    for segment in segments {
        normalized.push('/');
        normalized.push_str(segment);
    }
    normalized
}

/// A replayable upstream query: what the inline server saw and what the
/// background refresher re-issues.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryRequest {
    path: String,
    params: QueryParams,
}

impl QueryRequest {
    /// Create a request; the path is normalized.
    pub fn new(path: &str, params: QueryParams) -> Self {
        Self {
            path: normalize_path(path),
            params,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn params(&self) -> &QueryParams {
        &self.params
    }
}
