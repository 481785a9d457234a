use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{SearchBackend, parse_json, timed_search};
use crate::data_models::{SearchResponse, SearchResult};
use crate::errors::{ConfigError, FetchError};
use crate::http::HttpFetcher;
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryPolicy;

pub const NAME: &str = "serpapi";
const ENDPOINT: &str = "https://serpapi.com/search.json";

#[derive(Debug, Default, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    organic_results: Vec<OrganicResult>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    position: u64,
}

/// Google results through SerpAPI (`engine=google`).
pub struct SerpApiBackend {
    http: HttpFetcher,
    api_key: String,
    country: String,
    endpoint: String,
    timeout: Duration,
    rate_limiter: RateLimiter,
}

impl SerpApiBackend {
    pub fn new(client: Client, api_key: Option<String>) -> Result<SerpApiBackend, ConfigError> {
        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingCredential("SERPAPI_API_KEY"))?;
        Ok(SerpApiBackend {
            http: HttpFetcher::new(client, RetryPolicy::none()),
            api_key,
            country: "in".to_string(),
            endpoint: ENDPOINT.to_string(),
            timeout: Duration::from_secs(20),
            rate_limiter: RateLimiter::new(Duration::from_secs(1)),
        })
    }

    pub fn with_country(mut self, country: &str) -> Self {
        self.country = country.to_string();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_min_delay(mut self, min_delay: Duration) -> Self {
        self.rate_limiter = RateLimiter::new(min_delay);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.http.set_retry_policy(retry);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn fetch(&self, query: &str, num_results: usize) -> Result<Vec<SearchResult>, FetchError> {
        let num = num_results.max(1).to_string();
        let response = self
            .http
            .send(NAME, |client| {
                client
                    .get(&self.endpoint)
                    .query(&[
                        ("q", query),
                        ("engine", "google"),
                        ("num", num.as_str()),
                        ("hl", "en"),
                        ("gl", self.country.as_str()),
                        ("api_key", self.api_key.as_str()),
                    ])
                    .timeout(self.timeout)
            })
            .await?;
        let body = response.bytes().await?;
        let mut results = parse_results(&body);
        results.truncate(num_results);
        Ok(results)
    }
}

#[async_trait]
impl SearchBackend for SerpApiBackend {
    fn name(&self) -> &str {
        NAME
    }

    async fn search(&self, query: &str, num_results: usize) -> SearchResponse {
        timed_search(NAME, &self.rate_limiter, query, self.fetch(query, num_results)).await
    }
}

fn parse_results(body: &[u8]) -> Vec<SearchResult> {
    let Some(parsed) = parse_json::<ApiResponse>(NAME, body) else {
        return Vec::new();
    };
    parsed
        .organic_results
        .into_iter()
        .filter(|r| !r.title.is_empty() && !r.link.is_empty())
        .map(|r| SearchResult::new(r.title, r.link, r.snippet, NAME).with_meta("position", r.position))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_api_key() {
        let client = Client::new();
        assert!(matches!(
            SerpApiBackend::new(client.clone(), None),
            Err(ConfigError::MissingCredential("SERPAPI_API_KEY"))
        ));
        assert!(SerpApiBackend::new(client.clone(), Some("  ".into())).is_err());
        assert!(SerpApiBackend::new(client, Some("key".into())).is_ok());
    }

    #[test]
    fn test_parse_results() {
        let body = br#"{"search_metadata":{},"organic_results":[
            {"position":1,"title":"Rust","link":"https://www.rust-lang.org/","snippet":"A language"},
            {"position":2,"title":"No link"}
        ]}"#;
        let results = parse_results(body);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "https://www.rust-lang.org/");
        assert_eq!(results[0].metadata["position"], 1);
    }

    #[test]
    fn test_missing_organic_results() {
        assert!(parse_results(br#"{"error":"quota"}"#).is_empty());
    }
}
