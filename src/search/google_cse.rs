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

pub const NAME: &str = "google_cse";
const ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";
/// The Custom Search API rejects `num` above 10.
const MAX_NUM: usize = 10;

#[derive(Debug, Default, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
    #[serde(default, rename = "displayLink")]
    display_link: String,
}

/// Google Programmable Search. Unlike the other backends it retries
/// transient HTTP failures by default.
pub struct GoogleCseBackend {
    http: HttpFetcher,
    api_key: String,
    cx: String,
    endpoint: String,
    timeout: Duration,
    rate_limiter: RateLimiter,
}

impl GoogleCseBackend {
    pub fn new(
        client: Client,
        api_key: Option<String>,
        cx: Option<String>,
    ) -> Result<GoogleCseBackend, ConfigError> {
        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingCredential("GOOGLE_CSE_KEY"))?;
        let cx = cx
            .filter(|c| !c.trim().is_empty())
            .ok_or(ConfigError::MissingCredential("GOOGLE_CSE_CX"))?;
        Ok(GoogleCseBackend {
            http: HttpFetcher::new(client, RetryPolicy::http_default()),
            api_key,
            cx,
            endpoint: ENDPOINT.to_string(),
            timeout: Duration::from_secs(15),
            rate_limiter: RateLimiter::new(Duration::from_secs(1)),
        })
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
        let num = num_results.clamp(1, MAX_NUM).to_string();
        let response = self
            .http
            .send(NAME, |client| {
                client
                    .get(&self.endpoint)
                    .query(&[
                        ("key", self.api_key.as_str()),
                        ("cx", self.cx.as_str()),
                        ("q", query),
                        ("num", num.as_str()),
                    ])
                    .timeout(self.timeout)
            })
            .await?;
        let body = response.bytes().await?;
        Ok(parse_results(&body))
    }
}

#[async_trait]
impl SearchBackend for GoogleCseBackend {
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
        .items
        .into_iter()
        .filter(|item| !item.link.is_empty())
        .enumerate()
        .map(|(rank, item)| {
            SearchResult::new(item.title, item.link, item.snippet, NAME)
                .with_meta("rank", rank + 1)
                .with_meta("display_link", item.display_link)
        })
        .collect()
}
