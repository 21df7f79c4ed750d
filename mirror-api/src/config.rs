//! API Configuration Module
//!
//! Configuration is loaded from `MIRROR_*` environment variables with
//! defaults from [`crate::constants`]. Unlike a best-effort parse, a value
//! that is present but malformed is a startup error: a typo in a TTL should
//! not silently fall back to the default.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use mirror_core::{normalize_path, ConfigError};
use mirror_storage::CacheConfig;

use crate::constants::{
    DEFAULT_BIND_HOST, DEFAULT_BTCLI_PATH, DEFAULT_CACHE_DIR, DEFAULT_CACHE_TTL_SECS,
    DEFAULT_CHAIN_ENDPOINT, DEFAULT_FETCH_TIMEOUT_SECS, DEFAULT_IGNORED_PATHS, DEFAULT_PORT,
    DEFAULT_WALLET_SUBDIR, METRICS_FEED_PREFIX,
};
use crate::jobs::RefreshConfig;

// ============================================================================
// ENV HELPERS
// ============================================================================

/// Parse `field` with `FromStr`, or return `default` when unset or blank.
pub(crate) fn parse_var<T, F>(lookup: &F, field: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(field).map(|v| v.trim().to_string()) {
        None => Ok(default),
        Some(v) if v.is_empty() => Ok(default),
        Some(v) => v.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            field: field.to_string(),
            value: v.clone(),
            reason: e.to_string(),
        }),
    }
}

/// Parse a boolean flag (`true/false`, `1/0`, `yes/no`).
pub(crate) fn parse_flag<F>(lookup: &F, field: &str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(field) else {
        return Ok(default);
    };
    match raw.trim().to_lowercase().as_str() {
        "" => Ok(default),
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: raw,
            reason: "expected true or false".to_string(),
        }),
    }
}

/// Split a comma-separated list, dropping blanks. `None` when unset.
fn parse_list<F>(lookup: &F, field: &str) -> Option<Vec<String>>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(field).map(|s| {
        s.split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect()
    })
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

// ============================================================================
// CACHE SETTINGS
// ============================================================================

/// Where and how long query results are cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub dir: PathBuf,
    pub ttl: Duration,
    pub serve_stale_on_error: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_CACHE_DIR),
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            serve_stale_on_error: false,
        }
    }
}

impl CacheSettings {
    /// Environment variables:
    /// - `MIRROR_CACHE_DIR`: cache root (default: ./cache)
    /// - `MIRROR_CACHE_TTL_SECS`: freshness window (default: 300)
    /// - `MIRROR_SERVE_STALE_ON_ERROR`: serve stale data on upstream failure (default: false)
    pub fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            dir: lookup("MIRROR_CACHE_DIR")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR)),
            ttl: Duration::from_secs(parse_var(lookup, "MIRROR_CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS)?),
            serve_stale_on_error: parse_flag(lookup, "MIRROR_SERVE_STALE_ON_ERROR", false)?,
        })
    }

    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig::new()
            .with_ttl(self.ttl)
            .with_serve_stale_on_error(self.serve_stale_on_error)
    }
}

// ============================================================================
// SOURCE SETTINGS
// ============================================================================

/// An external metrics feed served at `/metrics/<name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsFeedConfig {
    pub name: String,
    pub url: String,
}

impl MetricsFeedConfig {
    pub fn path(&self) -> String {
        format!("{}{}", METRICS_FEED_PREFIX, self.name)
    }
}

/// Settings for the upstream data sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    /// Node CLI binary.
    pub btcli_path: PathBuf,
    /// Node endpoint handed to every CLI call.
    pub chain_endpoint: String,
    /// Wallet directory for the balances query.
    pub wallet_path: PathBuf,
    /// Directory scanned for registration logs.
    pub registration_log_dir: PathBuf,
    /// Bound on every subprocess and HTTP call.
    pub fetch_timeout: Duration,
    pub metrics_feeds: Vec<MetricsFeedConfig>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        let home = PathBuf::from(env_lookup("HOME").unwrap_or_else(|| ".".to_string()));
        Self {
            btcli_path: PathBuf::from(DEFAULT_BTCLI_PATH),
            chain_endpoint: DEFAULT_CHAIN_ENDPOINT.to_string(),
            wallet_path: home.join(DEFAULT_WALLET_SUBDIR),
            registration_log_dir: home,
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            metrics_feeds: Vec::new(),
        }
    }
}

impl SourceConfig {
    /// Environment variables:
    /// - `MIRROR_BTCLI_PATH` (default: /usr/local/bin/btcli)
    /// - `MIRROR_CHAIN_ENDPOINT` (default: the public finney entrypoint)
    /// - `MIRROR_WALLET_PATH` (default: ~/.bittensor/wallets/)
    /// - `MIRROR_REGISTRATION_LOG_DIR` (default: $HOME)
    /// - `MIRROR_FETCH_TIMEOUT_SECS` (default: 120)
    /// - `MIRROR_METRICS_FEEDS`: `name=url,...` (default: none)
    pub fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let home = PathBuf::from(lookup("HOME").unwrap_or_else(|| ".".to_string()));
        let non_blank = |field: &str| lookup(field).filter(|s| !s.trim().is_empty());

        let metrics_feeds = parse_list(lookup, "MIRROR_METRICS_FEEDS")
            .unwrap_or_default()
            .into_iter()
            .map(|entry| parse_feed(&entry))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            btcli_path: non_blank("MIRROR_BTCLI_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BTCLI_PATH)),
            chain_endpoint: non_blank("MIRROR_CHAIN_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_CHAIN_ENDPOINT.to_string()),
            wallet_path: non_blank("MIRROR_WALLET_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| home.join(DEFAULT_WALLET_SUBDIR)),
            registration_log_dir: non_blank("MIRROR_REGISTRATION_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or(home),
            fetch_timeout: Duration::from_secs(parse_var(
                lookup,
                "MIRROR_FETCH_TIMEOUT_SECS",
                DEFAULT_FETCH_TIMEOUT_SECS,
            )?),
            metrics_feeds,
        })
    }
}

fn parse_feed(entry: &str) -> Result<MetricsFeedConfig, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidValue {
        field: "MIRROR_METRICS_FEEDS".to_string(),
        value: entry.to_string(),
        reason: reason.to_string(),
    };

    let (name, url) = entry.split_once('=').ok_or_else(|| invalid("expected name=url"))?;
    let (name, url) = (name.trim(), url.trim());
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(invalid("feed name must be alphanumeric, '-' or '_'"));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(invalid("feed url must be http or https"));
    }
    Ok(MetricsFeedConfig {
        name: name.to_string(),
        url: url.to_string(),
    })
}

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub cache: CacheSettings,
    pub refresh: RefreshConfig,
    pub sources: SourceConfig,
    /// Paths answered with 404 without touching the cache.
    pub ignored_paths: Vec<String>,
    /// Paths always fetched live and never cached.
    pub bypass_paths: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        let sources = SourceConfig::default();
        Self {
            bind_addr: SocketAddr::new(DEFAULT_BIND_HOST, DEFAULT_PORT),
            cache: CacheSettings::default(),
            refresh: RefreshConfig::default(),
            bypass_paths: sources.metrics_feeds.iter().map(|f| f.path()).collect(),
            sources,
            ignored_paths: DEFAULT_IGNORED_PATHS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl ApiConfig {
    /// Load and validate configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env_lookup)
    }

    /// Load and validate configuration from an arbitrary variable source.
    ///
    /// Environment variables (besides those of the sub-configs):
    /// - `MIRROR_API_BIND`: listen host, IPv4 or IPv6 (default: 0.0.0.0)
    /// - `PORT` or `MIRROR_API_PORT`: listen port (default: 41337)
    /// - `MIRROR_IGNORED_PATHS`: comma list (default: /favicon.ico)
    /// - `MIRROR_BYPASS_PATHS`: comma list (default: every metrics feed path)
    pub fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let sources = SourceConfig::from_lookup(lookup)?;

        let ignored_paths = parse_list(lookup, "MIRROR_IGNORED_PATHS")
            .unwrap_or_else(|| DEFAULT_IGNORED_PATHS.iter().map(|p| p.to_string()).collect())
            .iter()
            .map(|p| normalize_path(p))
            .collect();
        let bypass_paths = parse_list(lookup, "MIRROR_BYPASS_PATHS")
            .unwrap_or_else(|| sources.metrics_feeds.iter().map(|f| f.path()).collect())
            .iter()
            .map(|p| normalize_path(p))
            .collect();

        let config = Self {
            bind_addr: resolve_bind_addr(lookup)?,
            cache: CacheSettings::from_lookup(lookup)?,
            refresh: RefreshConfig::from_lookup(lookup)?,
            sources,
            ignored_paths,
            bypass_paths,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would break the freshness guarantees.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "MIRROR_CACHE_TTL_SECS".to_string(),
                value: "0".to_string(),
                reason: "TTL must be positive".to_string(),
            });
        }
        if self.refresh.interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "MIRROR_REFRESH_INTERVAL_SECS".to_string(),
                value: "0".to_string(),
                reason: "interval must be positive".to_string(),
            });
        }
        if self.refresh.enabled && self.refresh.interval > self.cache.ttl {
            return Err(ConfigError::IncompatibleOptions {
                option_a: format!("MIRROR_REFRESH_INTERVAL_SECS={}", self.refresh.interval.as_secs()),
                option_b: format!("MIRROR_CACHE_TTL_SECS={}", self.cache.ttl.as_secs()),
            });
        }
        if self.refresh.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "MIRROR_REFRESH_CONCURRENCY".to_string(),
                value: "0".to_string(),
                reason: "at least one refresh must be allowed".to_string(),
            });
        }
        if self.sources.fetch_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "MIRROR_FETCH_TIMEOUT_SECS".to_string(),
                value: "0".to_string(),
                reason: "timeout must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn is_ignored(&self, path: &str) -> bool {
        self.ignored_paths.iter().any(|p| p == path)
    }

    pub fn is_bypassed(&self, path: &str) -> bool {
        self.bypass_paths.iter().any(|p| p == path)
    }
}

fn resolve_bind_addr<F>(lookup: &F) -> Result<SocketAddr, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let host = match lookup("MIRROR_API_BIND").filter(|h| !h.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidValue {
                field: "MIRROR_API_BIND".to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            })?,
        None => DEFAULT_BIND_HOST,
    };
    let port_field = if lookup("PORT").is_some() {
        "PORT"
    } else {
        "MIRROR_API_PORT"
    };
    let port: u16 = parse_var(lookup, port_field, DEFAULT_PORT)?;

    Ok(SocketAddr::new(host, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_with_empty_environment() {
        let config = ApiConfig::from_lookup(&lookup_from(&[("HOME", "/home/miner")]))
            .expect("defaults should be valid");

        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
        assert_eq!(config.cache.ttl, Duration::from_secs(DEFAULT_CACHE_TTL_SECS));
        assert!(!config.cache.serve_stale_on_error);
        assert!(config.refresh.enabled);
        assert_eq!(config.ignored_paths, vec!["/favicon.ico".to_string()]);
        assert!(config.bypass_paths.is_empty());
        assert_eq!(
            config.sources.wallet_path,
            PathBuf::from("/home/miner/.bittensor/wallets/")
        );
        assert_eq!(config.sources.registration_log_dir, PathBuf::from("/home/miner"));
    }

    #[test]
    fn test_port_precedence() {
        let config = ApiConfig::from_lookup(&lookup_from(&[
            ("PORT", "8080"),
            ("MIRROR_API_PORT", "9090"),
            ("MIRROR_API_BIND", "127.0.0.1"),
        ]))
        .expect("valid");
        assert_eq!(config.bind_addr, "127.0.0.1:8080".parse().expect("addr"));

        let config = ApiConfig::from_lookup(&lookup_from(&[("MIRROR_API_PORT", "9090")]))
            .expect("valid");
        assert_eq!(config.bind_addr.port(), 9090);
    }

    #[test]
    fn test_ipv6_bind_host() {
        let config = ApiConfig::from_lookup(&lookup_from(&[("MIRROR_API_BIND", "::"), ("PORT", "8080")]))
            .expect("valid");
        assert_eq!(config.bind_addr, "[::]:8080".parse().expect("addr"));

        let config = ApiConfig::from_lookup(&lookup_from(&[("MIRROR_API_BIND", "[::1]")]))
            .expect("valid");
        assert_eq!(config.bind_addr.ip(), "::1".parse::<IpAddr>().expect("ip"));
        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
    }

    #[test]
    fn test_invalid_bind_host_is_rejected() {
        let err = ApiConfig::from_lookup(&lookup_from(&[("MIRROR_API_BIND", "localhost:80")]))
            .expect_err("should reject");
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "MIRROR_API_BIND"));
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = ApiConfig::from_lookup(&lookup_from(&[("MIRROR_CACHE_TTL_SECS", "5m")]))
            .expect_err("should reject");
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "MIRROR_CACHE_TTL_SECS"));
    }

    #[test]
    fn test_interval_longer_than_ttl_is_rejected() {
        let err = ApiConfig::from_lookup(&lookup_from(&[
            ("MIRROR_CACHE_TTL_SECS", "30"),
            ("MIRROR_REFRESH_INTERVAL_SECS", "60"),
        ]))
        .expect_err("should reject");
        assert!(matches!(err, ConfigError::IncompatibleOptions { .. }));
    }

    #[test]
    fn test_interval_longer_than_ttl_allowed_when_refresh_disabled() {
        let config = ApiConfig::from_lookup(&lookup_from(&[
            ("MIRROR_CACHE_TTL_SECS", "30"),
            ("MIRROR_REFRESH_INTERVAL_SECS", "60"),
            ("MIRROR_REFRESH_ENABLED", "false"),
        ]))
        .expect("valid");
        assert!(!config.refresh.enabled);
    }

    #[test]
    fn test_zero_ttl_is_rejected() {
        assert!(ApiConfig::from_lookup(&lookup_from(&[("MIRROR_CACHE_TTL_SECS", "0")])).is_err());
    }

    #[test]
    fn test_metrics_feeds_become_bypass_paths() {
        let config = ApiConfig::from_lookup(&lookup_from(&[(
            "MIRROR_METRICS_FEEDS",
            "emissions=https://metrics.example/emissions, prices=http://10.0.0.2/prices",
        )]))
        .expect("valid");

        assert_eq!(config.sources.metrics_feeds.len(), 2);
        assert_eq!(config.sources.metrics_feeds[1].name, "prices");
        assert!(config.is_bypassed("/metrics/emissions"));
        assert!(config.is_bypassed("/metrics/prices"));
        assert!(!config.is_bypassed("/subnet-list"));
    }

    #[test]
    fn test_explicit_bypass_list_is_normalized() {
        let config = ApiConfig::from_lookup(&lookup_from(&[
            ("MIRROR_BYPASS_PATHS", "balances/, //registrations"),
            ("MIRROR_IGNORED_PATHS", "/favicon.ico,/robots.txt"),
        ]))
        .expect("valid");

        assert!(config.is_bypassed("/balances"));
        assert!(config.is_bypassed("/registrations"));
        assert!(config.is_ignored("/robots.txt"));
    }

    #[test]
    fn test_malformed_feed_is_rejected() {
        for bad in ["noequals", "=https://x", "bad name=https://x", "feed=ftp://x"] {
            let result = ApiConfig::from_lookup(&lookup_from(&[("MIRROR_METRICS_FEEDS", bad)]));
            assert!(result.is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_flags() {
        let lookup = lookup_from(&[("A", "yes"), ("B", "0"), ("C", "maybe")]);
        assert!(parse_flag(&lookup, "A", false).expect("valid"));
        assert!(!parse_flag(&lookup, "B", true).expect("valid"));
        assert!(parse_flag(&lookup, "C", true).is_err());
        assert!(parse_flag(&lookup, "MISSING", true).expect("default"));
    }

    #[test]
    fn test_cache_settings_to_cache_config() {
        let settings = CacheSettings {
            ttl: Duration::from_secs(42),
            serve_stale_on_error: true,
            ..Default::default()
        };
        let config = settings.to_cache_config();
        assert_eq!(config.ttl, Duration::from_secs(42));
        assert!(config.serve_stale_on_error);
    }
}
