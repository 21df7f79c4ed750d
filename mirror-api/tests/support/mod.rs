//! Shared harness for router-level tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use mirror_api::sources::metagraph;
use mirror_api::{create_router, ApiConfig, AppState, SourceRegistry};
use mirror_storage::{CacheConfig, Fetcher};
use mirror_test_utils::fixtures::{temp_cache, TestCache};
use mirror_test_utils::MockFetcher;
use tower::ServiceExt;

pub const TTL: Duration = Duration::from_secs(300);
pub const FEED_PATH: &str = "/metrics/prices";

/// A router over a temp cache, with scripted fetchers behind every path.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub fixture: TestCache,
    /// Serves `/subnet-list`, `/metagraph` and `/balances`.
    pub fetcher: Arc<MockFetcher>,
    /// Serves the bypassed metrics feed.
    pub feed: Arc<MockFetcher>,
}

impl TestApp {
    pub fn new(fetcher: MockFetcher) -> Self {
        Self::with_cache_config(fetcher, CacheConfig::new().with_ttl(TTL))
    }

    pub fn with_cache_config(fetcher: MockFetcher, cache_config: CacheConfig) -> Self {
        let fixture = temp_cache(cache_config);
        let fetcher = Arc::new(fetcher);
        let feed = Arc::new(MockFetcher::versioned("feed-"));

        let sources = SourceRegistry::new()
            .with_source("/subnet-list", fetcher.clone() as Arc<dyn Fetcher>)
            .with_source_accepting(
                metagraph::PATH,
                fetcher.clone() as Arc<dyn Fetcher>,
                metagraph::PARAMS,
            )
            .with_source("/balances", fetcher.clone() as Arc<dyn Fetcher>)
            .with_source(FEED_PATH, feed.clone() as Arc<dyn Fetcher>);

        let config = ApiConfig {
            bypass_paths: vec![FEED_PATH.to_string()],
            ..Default::default()
        };

        let state = AppState::from_parts(Arc::clone(&fixture.cache), Arc::new(sources), config);
        Self {
            router: create_router(state.clone()),
            state,
            fixture,
            fetcher,
            feed,
        }
    }

    pub async fn get(&self, uri: &str) -> Response {
        self.send("GET", uri).await
    }

    pub async fn send(&self, method: &str, uri: &str) -> Response {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .expect("Failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("Router is infallible")
    }

    /// GET `uri` and return status plus body text.
    pub async fn get_text(&self, uri: &str) -> (StatusCode, String) {
        let response = self.get(uri).await;
        let status = response.status();
        (status, body_text(response).await)
    }
}

pub async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    String::from_utf8_lossy(&bytes).into_owned()
}

pub fn cache_status(response: &Response) -> Option<String> {
    response
        .headers()
        .get("x-mirror-cache")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
