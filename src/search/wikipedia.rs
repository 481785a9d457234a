use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;

use super::{SearchBackend, parse_json, timed_search};
use crate::data_models::{SearchResponse, SearchResult, WIKIPEDIA_SOURCE};
use crate::errors::FetchError;
use crate::http::HttpFetcher;
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryPolicy;

const ENDPOINT: &str = "https://en.wikipedia.org/w/api.php";
const ARTICLE_BASE: &str = "https://en.wikipedia.org/wiki/";
const MAX_LIMIT: usize = 10;

#[derive(Debug, Default, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    query: Option<QueryBlock>,
}

#[derive(Debug, Default, Deserialize)]
struct QueryBlock {
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    title: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    size: u64,
}

/// MediaWiki full-text search against English Wikipedia.
pub struct WikipediaBackend {
    http: HttpFetcher,
    endpoint: String,
    timeout: Duration,
    rate_limiter: RateLimiter,
}

impl WikipediaBackend {
    pub fn new(client: Client) -> WikipediaBackend {
        WikipediaBackend {
            http: HttpFetcher::new(client, RetryPolicy::none()),
            endpoint: ENDPOINT.to_string(),
            timeout: Duration::from_secs(10),
            rate_limiter: RateLimiter::new(Duration::from_secs(1)),
        }
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
        let limit = num_results.clamp(1, MAX_LIMIT).to_string();
        let response = self
            .http
            .send(WIKIPEDIA_SOURCE, |client| {
                client
                    .get(&self.endpoint)
                    .query(&[
                        ("action", "query"),
                        ("format", "json"),
                        ("list", "search"),
                        ("srsearch", query),
                        ("srlimit", limit.as_str()),
                        ("srprop", "snippet|titlesnippet|size"),
                    ])
                    .timeout(self.timeout)
            })
            .await?;
        let body = response.bytes().await?;
        Ok(parse_results(&body))
    }
}

#[async_trait]
impl SearchBackend for WikipediaBackend {
    fn name(&self) -> &str {
        WIKIPEDIA_SOURCE
    }

    async fn search(&self, query: &str, num_results: usize) -> SearchResponse {
        timed_search(
            WIKIPEDIA_SOURCE,
            &self.rate_limiter,
            query,
            self.fetch(query, num_results),
        )
        .await
    }
}

/// `Rust (programming language)` -> `.../wiki/Rust_(programming_language)`.
pub fn article_url(title: &str) -> String {
    let fallback = format!("{ARTICLE_BASE}{}", title.replace(' ', "_"));
    let Ok(mut url) = Url::parse(ARTICLE_BASE) else {
        return fallback;
    };
    match url.path_segments_mut() {
        Ok(mut segments) => {
            segments.pop_if_empty().push(&title.replace(' ', "_"));
        }
        Err(_) => return fallback,
    }
    url.to_string()
}

/// Search snippets carry `<span class="searchmatch">` markup and entities.
pub fn strip_snippet(snippet: &str) -> String {
    let text = html2text::from_read(snippet.as_bytes(), 10_000).unwrap_or_default();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_results(body: &[u8]) -> Vec<SearchResult> {
    let Some(parsed) = parse_json::<ApiResponse>(WIKIPEDIA_SOURCE, body) else {
        return Vec::new();
    };
    parsed
        .query
        .map(|q| q.search)
        .unwrap_or_default()
        .into_iter()
        .filter(|hit| !hit.title.is_empty())
        .map(|hit| {
            SearchResult::new(
                hit.title.clone(),
                article_url(&hit.title),
                strip_snippet(&hit.snippet),
                WIKIPEDIA_SOURCE,
            )
            .with_meta("size", hit.size)
        })
        .collect()
}
