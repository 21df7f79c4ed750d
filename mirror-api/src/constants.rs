//! Constants for the subnet-mirror API
//!
//! Defaults for every environment-driven setting live here so the config
//! module, the job module and their tests agree on them.

use std::net::{IpAddr, Ipv4Addr};

// ============================================================================
// SERVER
// ============================================================================

/// Default listen host: every IPv4 interface.
pub const DEFAULT_BIND_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// Default listen port.
pub const DEFAULT_PORT: u16 = 41337;

/// Prefix for the server's own endpoints; never routed to a source.
pub const OPS_PREFIX: &str = "/_mirror";

/// Paths answered with 404 before any cache lookup.
pub const DEFAULT_IGNORED_PATHS: &[&str] = &["/favicon.ico"];

// ============================================================================
// CACHE
// ============================================================================

/// Default cache root directory.
pub const DEFAULT_CACHE_DIR: &str = "./cache";

/// Default freshness window (5 minutes).
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

// ============================================================================
// BACKGROUND REFRESH
// ============================================================================

/// Default interval between refresh scans.
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 60;

/// Default number of keys refreshed at the same time.
pub const DEFAULT_REFRESH_CONCURRENCY: usize = 4;

// ============================================================================
// SOURCES
// ============================================================================

/// Default bound on a single upstream call.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 120;

/// Default node CLI binary.
pub const DEFAULT_BTCLI_PATH: &str = "/usr/local/bin/btcli";

/// Default node endpoint.
pub const DEFAULT_CHAIN_ENDPOINT: &str = "wss://entrypoint-finney.opentensor.ai:443";

/// Default wallet directory, relative to `$HOME`.
pub const DEFAULT_WALLET_SUBDIR: &str = ".bittensor/wallets/";

/// Terminal size given to the node CLI so its tables are not wrapped.
pub const CLI_TERMINAL_COLUMNS: u32 = 500;
pub const CLI_TERMINAL_LINES: u32 = 500;

/// Path prefix under which external metrics feeds are served.
pub const METRICS_FEED_PREFIX: &str = "/metrics/";

// ============================================================================
// LOGGING
// ============================================================================

/// Default `EnvFilter` directive when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "mirror_api=debug,mirror_storage=info,tower_http=info,info";
