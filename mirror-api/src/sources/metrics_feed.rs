//! `/metrics/<name>`: external metrics feeds proxied verbatim.

use std::time::Duration;

use async_trait::async_trait;
use mirror_core::{FetchError, QueryRequest};
use mirror_storage::Fetcher;

use crate::config::MetricsFeedConfig;
use crate::error::{ApiError, ApiResult};

/// Build the shared HTTP client for metrics feeds.
pub fn build_client(timeout: Duration) -> ApiResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("subnet-mirror/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ApiError::internal_error(format!("Failed to create HTTP client: {}", e)))
}

#[derive(Debug, Clone)]
pub struct MetricsFeedSource {
    name: String,
    url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl MetricsFeedSource {
    pub fn new(feed: &MetricsFeedConfig, client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            name: feed.name.clone(),
            url: feed.url.clone(),
            client,
            timeout,
        }
    }

    fn source_name(&self) -> String {
        format!("metrics/{}", self.name)
    }
}

#[async_trait]
impl Fetcher for MetricsFeedSource {
    async fn fetch(&self, _request: &QueryRequest) -> Result<String, FetchError> {
        let response = self.client.get(&self.url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout {
                    source_name: self.source_name(),
                    after: self.timeout,
                }
            } else {
                FetchError::Upstream {
                    source_name: self.source_name(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(feed = %self.name, status = %status, "Metrics feed returned an error status");
            return Err(FetchError::Upstream {
                source_name: self.source_name(),
                reason: format!("HTTP {}", status),
            });
        }

        response.text().await.map_err(|e| FetchError::Upstream {
            source_name: self.source_name(),
            reason: format!("failed to read body: {}", e),
        })
    }
}
