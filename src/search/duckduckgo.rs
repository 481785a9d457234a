use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use scraper::{Html, Selector};

use super::{SearchBackend, timed_search};
use crate::data_models::{SearchResponse, SearchResult};
use crate::errors::FetchError;
use crate::http::HttpFetcher;
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryPolicy;

pub const NAME: &str = "duckduckgo";
const ENDPOINT: &str = "https://html.duckduckgo.com/html/";
const MAX_PAGE_RESULTS: usize = 10;

/// Scrapes DuckDuckGo's JavaScript-free results page.
pub struct DuckDuckGoBackend {
    http: HttpFetcher,
    endpoint: String,
    timeout: Duration,
    rate_limiter: RateLimiter,
}

impl DuckDuckGoBackend {
    pub fn new(client: Client) -> DuckDuckGoBackend {
        DuckDuckGoBackend {
            http: HttpFetcher::new(client, RetryPolicy::none()),
            endpoint: ENDPOINT.to_string(),
            timeout: Duration::from_secs(15),
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
        let response = self
            .http
            .send(NAME, |client| {
                client
                    .get(&self.endpoint)
                    .query(&[("q", query)])
                    .timeout(self.timeout)
            })
            .await?;
        let html = response.text().await?;
        let mut results = parse_results(&html, query);
        results.truncate(num_results);
        Ok(results)
    }
}

#[async_trait]
impl SearchBackend for DuckDuckGoBackend {
    fn name(&self) -> &str {
        NAME
    }

    async fn search(&self, query: &str, num_results: usize) -> SearchResponse {
        timed_search(NAME, &self.rate_limiter, query, self.fetch(query, num_results)).await
    }
}

/// Result links on the HTML page go through `//duckduckgo.com/l/?uddg=<target>`.
/// Returns the decoded target, the link itself when it is already absolute,
/// and `None` for relative links.
pub fn resolve_link(href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || (href.starts_with('/') && !href.starts_with("//")) {
        return None;
    }
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };
    let url = Url::parse(&absolute).ok()?;
    if url.host_str().is_some_and(|h| h.ends_with("duckduckgo.com")) && url.path() == "/l/" {
        return url
            .query_pairs()
            .find(|(key, _)| key == "uddg")
            .map(|(_, target)| target.into_owned());
    }
    match url.scheme() {
        "http" | "https" => Some(absolute),
        _ => None,
    }
}

pub fn parse_results(html: &str, query: &str) -> Vec<SearchResult> {
    let (Ok(result_selector), Ok(link_selector), Ok(snippet_selector)) = (
        Selector::parse(".result"),
        Selector::parse("a.result__a"),
        Selector::parse(".result__snippet"),
    ) else {
        return Vec::new();
    };

    let document = Html::parse_document(html);
    let mut results = Vec::new();
    for container in document.select(&result_selector) {
        let Some(link) = container.select(&link_selector).next() else {
            continue;
        };
        let title = link.text().collect::<String>().trim().to_string();
        let Some(url) = link.value().attr("href").and_then(resolve_link) else {
            continue;
        };
        if title.is_empty() {
            continue;
        }
        let snippet = container
            .select(&snippet_selector)
            .next()
            .map(|s| s.text().collect::<String>().trim().to_string())
            .unwrap_or_default();
        results.push(
            SearchResult::new(title, url, snippet, NAME)
                .with_meta("query", query)
                .with_meta("rank", results.len() + 1),
        );
        if results.len() >= MAX_PAGE_RESULTS {
            break;
        }
    }
    results
}
