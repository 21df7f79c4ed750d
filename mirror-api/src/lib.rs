//! subnet-mirror API - caching HTTP front for a Bittensor node
//!
//! Serves node query results (subnet list, metagraph, balances,
//! registrations, external metrics feeds) as CSV over HTTP. Results are
//! cached on disk for a TTL; a background job keeps known queries fresh
//! so clients rarely wait on the node CLI.

pub mod config;
pub mod constants;
pub mod error;
pub mod jobs;
pub mod macros;
pub mod routes;
pub mod sources;
pub mod state;
pub mod telemetry;

// Re-export commonly used types
pub use config::{ApiConfig, CacheSettings, MetricsFeedConfig, SourceConfig};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use jobs::{cache_refresh_task, RefreshConfig, RefreshScope};
pub use routes::create_router;
pub use sources::SourceRegistry;
pub use state::{ApiCache, AppState};
