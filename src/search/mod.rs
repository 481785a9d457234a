//! Search backends and the aggregator that fans a query out to them.

pub mod duckduckgo;
pub mod google_cse;
pub mod serpapi;
pub mod tavily;
pub mod wikipedia;

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use reqwest::Client;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::{BackendKind, Config};
use crate::data_models::{SearchResponse, SearchResult};
use crate::errors::{ConfigError, FetchError, panic_message};
use crate::rate_limiter::RateLimiter;

pub use duckduckgo::DuckDuckGoBackend;
pub use google_cse::GoogleCseBackend;
pub use serpapi::SerpApiBackend;
pub use tavily::TavilyBackend;
pub use wikipedia::WikipediaBackend;

pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// One web search provider. Implementations never fail outright: problems are
/// reported through `SearchResponse::success` and `error_message`.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &str, num_results: usize) -> SearchResponse;
}

/// Shared skeleton of every backend call: wait for the rate limiter, run the
/// request and turn the outcome into a `SearchResponse`.
pub(crate) async fn timed_search<F>(
    name: &str,
    rate_limiter: &RateLimiter,
    query: &str,
    request: F,
) -> SearchResponse
where
    F: Future<Output = Result<Vec<SearchResult>, FetchError>>,
{
    rate_limiter.acquire().await;
    let start = Instant::now();
    log::info!("searching {} for {:?}", name, query);
    match request.await {
        Ok(results) => {
            log::info!("{} returned {} results", name, results.len());
            SearchResponse::succeeded(name, results, start.elapsed())
        }
        Err(e) => {
            log::error!("{} search failed: {}", name, e);
            SearchResponse::failed(name, e.to_string(), start.elapsed())
        }
    }
}

/// Parses a JSON body, degrading to `None` (and a warning) on malformed input.
pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(name: &str, body: &[u8]) -> Option<T> {
    match serde_json::from_slice(body) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            log::warn!("{} returned a malformed body: {}", name, e);
            None
        }
    }
}

/// Runs every backend concurrently and merges their results.
pub struct SearchAggregator {
    backends: Vec<Arc<dyn SearchBackend>>,
    max_concurrent: usize,
}

impl SearchAggregator {
    pub fn new(
        backends: Vec<Arc<dyn SearchBackend>>,
        max_concurrent: usize,
    ) -> Result<SearchAggregator, ConfigError> {
        if backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }
        if max_concurrent == 0 {
            return Err(ConfigError::Zero("max_concurrent"));
        }
        Ok(SearchAggregator {
            backends,
            max_concurrent,
        })
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    /// Results each backend is asked for so the merged list can still reach
    /// `num_results` after dedup.
    pub fn per_backend_results(&self, num_results: usize) -> usize {
        (num_results / self.backends.len()).saturating_add(2)
    }

    pub async fn search(&self, query: &str, num_results: usize) -> SearchResponse {
        let start = Instant::now();
        let per_backend = self.per_backend_results(num_results);
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();

        for backend in self.backends.iter().cloned() {
            let semaphore = semaphore.clone();
            let query = query.to_string();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let name = backend.name().to_string();
                let call = AssertUnwindSafe(backend.search(&query, per_backend)).catch_unwind();
                match call.await {
                    Ok(response) => response,
                    Err(payload) => {
                        let message = panic_message(payload);
                        log::error!("{} panicked: {}", name, message);
                        SearchResponse::failed(name, format!("panic: {message}"), Default::default())
                    }
                }
            });
        }

        let mut seen = HashSet::new();
        let mut merged: Vec<SearchResult> = Vec::new();
        let mut sources = Vec::new();
        let mut errors = Vec::new();

        while let Some(joined) = tasks.join_next().await {
            let response = match joined {
                Ok(response) => response,
                Err(e) => {
                    log::error!("search task failed to join: {}", e);
                    errors.push(format!("task: {e}"));
                    continue;
                }
            };
            if !response.success {
                errors.push(format!(
                    "{}: {}",
                    response.source,
                    response.error_message.as_deref().unwrap_or("unknown error")
                ));
                continue;
            }
            sources.push(response.source.clone());
            for result in response.results {
                if seen.insert(result.url.clone()) {
                    merged.push(result);
                }
            }
        }

        rank_results(&mut merged);
        let total_results = merged.len();
        merged.truncate(num_results);

        let success = !merged.is_empty();
        log::info!(
            "aggregate search for {:?}: {} unique results from [{}] in {:.2}s",
            query,
            total_results,
            sources.join(", "),
            start.elapsed().as_secs_f64()
        );

        SearchResponse {
            success,
            results: merged,
            source: sources.join("+"),
            total_results,
            response_time: start.elapsed(),
            error_message: if success || errors.is_empty() {
                None
            } else {
                Some(errors.join("; "))
            },
        }
    }
}

/// Longer snippets first; among equal lengths Wikipedia goes before other
/// sources. The sort is stable so remaining ties keep merge order.
pub fn rank_results(results: &mut [SearchResult]) {
    results.sort_by_key(|r| std::cmp::Reverse((r.snippet.chars().count(), r.is_wikipedia())));
}

/// Instantiates the backends named in the configuration, all sharing `client`.
pub fn build_backends(
    config: &Config,
    client: Client,
) -> Result<Vec<Arc<dyn SearchBackend>>, ConfigError> {
    let min_delay = config.search_min_delay;
    let mut backends: Vec<Arc<dyn SearchBackend>> = Vec::new();
    for kind in &config.search_backends {
        let backend: Arc<dyn SearchBackend> = match kind {
            BackendKind::DuckDuckGo => {
                Arc::new(DuckDuckGoBackend::new(client.clone()).with_min_delay(min_delay))
            }
            BackendKind::Wikipedia => {
                Arc::new(WikipediaBackend::new(client.clone()).with_min_delay(min_delay))
            }
            BackendKind::SerpApi => Arc::new(
                SerpApiBackend::new(client.clone(), config.serpapi_api_key.clone())?
                    .with_country(&config.serpapi_gl)
                    .with_min_delay(min_delay),
            ),
            BackendKind::GoogleCse => Arc::new(
                GoogleCseBackend::new(
                    client.clone(),
                    config.google_cse_key.clone(),
                    config.google_cse_cx.clone(),
                )?
                .with_min_delay(min_delay),
            ),
            BackendKind::Tavily => Arc::new(
                TavilyBackend::new(client.clone(), config.tavily_api_key.clone())?
                    .with_min_delay(min_delay),
            ),
        };
        backends.push(backend);
    }
    if backends.is_empty() {
        return Err(ConfigError::NoBackends);
    }
    Ok(backends)
}
