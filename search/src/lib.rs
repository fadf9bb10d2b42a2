//! Web-search API client.
//!
//! Wraps a SearxNG-compatible JSON search endpoint
//! (`GET {base}/search?q=...&format=json`). Any provider that speaks the
//! same response shape (`results[].title/url/content`) can be mounted by
//! pointing `search_base_url` at it.
//!
//! Failures never propagate: a transport error, a non-2xx status, or an
//! undecodable body all degrade to an empty result list with a warning log.
//! The orchestrator decides what an empty phase means.

use std::time::Duration;

use serde::Deserialize;

use dowse_types::RawHit;

/// Timeout for one search request.
const SEARCH_TIMEOUT_SECS: u64 = 10;

/// Client for a JSON web-search API.
#[derive(Debug, Clone)]
pub struct SearchClient {
    http: reqwest::Client,
    base_url: String,
}

/// Response shape of the search endpoint.
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    title: String,
    url: String,
    /// SearxNG calls the snippet `content`.
    #[serde(default)]
    content: String,
}

impl SearchClient {
    #[must_use]
    pub fn new(base_url: impl Into<String>, user_agent: &str) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(SEARCH_TIMEOUT_SECS))
            .build()
            .expect("build search HTTP client");

        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// Run one search, returning up to `max_results` hits in provider order.
    ///
    /// `origin_subquery` on each hit is set to `query`.
    pub async fn search(&self, query: &str, max_results: usize) -> Vec<RawHit> {
        let url = format!("{}/search", self.base_url.trim_end_matches('/'));

        let response = match self
            .http
            .get(&url)
            .query(&[("q", query), ("format", "json")])
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(query, error = %e, "search request failed");
                return Vec::new();
            }
        };

        if !response.status().is_success() {
            tracing::warn!(query, status = %response.status(), "search returned error status");
            return Vec::new();
        }

        let payload: SearchResponse = match response.json().await {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(query, error = %e, "search response was not decodable");
                return Vec::new();
            }
        };

        payload
            .results
            .into_iter()
            .take(max_results)
            .map(|r| RawHit {
                title: r.title,
                url: r.url,
                snippet: r.content,
                origin_subquery: query.to_string(),
            })
            .collect()
    }
}
