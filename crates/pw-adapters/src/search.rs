//! Web search client for the pricing adapters
//!
//! Thin wrapper over a Brave-style search API. The key is injected at
//! construction; without one, every search resolves to an empty result set.
//! A one-second delay precedes every request to stay polite with the
//! upstream quota.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use pw_types::AppResult;

const DEFAULT_ENDPOINT: &str = "https://api.search.brave.com/res/v1/web/search";
const POLITENESS_DELAY: Duration = Duration::from_secs(1);

/// One web search hit; only the fields the extractors look at.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    web: WebResults,
}

#[derive(Debug, Default, Deserialize)]
struct WebResults {
    #[serde(default)]
    results: Vec<SearchResult>,
}

/// Shared search backend handle. Safe for concurrent use; holds no per-call
/// state beyond the connection pool.
pub struct WebSearch {
    client: Client,
    api_key: Option<String>,
    endpoint: String,
}

impl WebSearch {
    pub fn new(api_key: Option<String>, timeout: Duration) -> AppResult<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            api_key,
            endpoint: DEFAULT_ENDPOINT.to_string(),
        })
    }

    /// Point the client at a different endpoint (for testing).
    pub fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Run one search. Failures and non-200 responses are logged and produce
    /// an empty result set; the pipeline treats "no results" and "search
    /// unavailable" identically.
    pub async fn search(&self, query: &str, count: usize) -> Vec<SearchResult> {
        let Some(api_key) = &self.api_key else {
            debug!(query, "web search key not configured, skipping search");
            return Vec::new();
        };

        tokio::time::sleep(POLITENESS_DELAY).await;

        let response = self
            .client
            .get(&self.endpoint)
            .header("Accept", "application/json")
            .header("X-Subscription-Token", api_key)
            .query(&[("q", query), ("count", &count.to_string())])
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!(query, error = %e, "web search request failed");
                return Vec::new();
            }
        };

        if !response.status().is_success() {
            warn!(query, status = %response.status(), "web search returned non-success");
            return Vec::new();
        }

        match response.json::<SearchResponse>().await {
            Ok(body) => {
                debug!(query, results = body.web.results.len(), "web search completed");
                body.web.results
            }
            Err(e) => {
                warn!(query, error = %e, "web search response did not parse");
                Vec::new()
            }
        }
    }
}
