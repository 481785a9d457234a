use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{SearchBackend, parse_json, timed_search};
use crate::data_models::{SearchResponse, SearchResult};
use crate::errors::{ConfigError, FetchError};
use crate::http::HttpFetcher;
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryPolicy;

pub const NAME: &str = "tavily";
const ENDPOINT: &str = "https://api.tavily.com/search";

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    max_results: usize,
    search_depth: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    results: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: Option<f64>,
}

pub struct TavilyBackend {
    http: HttpFetcher,
    api_key: String,
    endpoint: String,
    timeout: Duration,
    rate_limiter: RateLimiter,
}

impl TavilyBackend {
    pub fn new(client: Client, api_key: Option<String>) -> Result<TavilyBackend, ConfigError> {
        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingCredential("TAVILY_API_KEY"))?;
        Ok(TavilyBackend {
            http: HttpFetcher::new(client, RetryPolicy::none()),
            api_key,
            endpoint: ENDPOINT.to_string(),
            timeout: Duration::from_secs(20),
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
        let request = SearchRequest {
            query,
            max_results: num_results.max(1),
            search_depth: "basic",
        };
        let response = self
            .http
            .send(NAME, |client| {
                client
                    .post(&self.endpoint)
                    .bearer_auth(&self.api_key)
                    .json(&request)
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
impl SearchBackend for TavilyBackend {
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
        .results
        .into_iter()
        .filter(|hit| !hit.url.is_empty())
        .map(|hit| {
            let result = SearchResult::new(hit.title, hit.url, hit.content, NAME);
            match hit.score {
                Some(score) => result.with_meta("score", score),
                None => result,
            }
        })
        .collect()
}
