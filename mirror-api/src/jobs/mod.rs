//! Background Jobs for subnet-mirror
//!
//! - `cache_refresh`: keeps known cache entries fresh
//!
//! # Usage
//!
//! ```ignore
//! use mirror_api::jobs::{cache_refresh_task, RefreshConfig, RefreshScope};
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! tokio::spawn(cache_refresh_task(cache, sources, RefreshScope::all(), RefreshConfig::default(), shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! ```

pub mod cache_refresh;

pub use cache_refresh::{
    cache_refresh_task, run_refresh_cycle, CycleSummary, RefreshConfig, RefreshMetrics,
    RefreshScope, RefreshSnapshot,
};
