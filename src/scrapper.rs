use std::time::Duration;

use futures::stream::{self, StreamExt};
use reqwest::Client;

use crate::data_models::{ExtractionMethod, ScrapedContent};
use crate::errors::FetchError;
use crate::extract::{ContentExtractor, Extraction, default_extractors, extract_with};
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryPolicy;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_RATE_LIMIT: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_CONCURRENT: usize = 5;

/// Fetches pages and extracts their readable text.
pub struct Scrapper {
    client: Client,
    retry: RetryPolicy,
    rate_limiter: RateLimiter,
    timeout: Duration,
    extractors: Vec<Box<dyn ContentExtractor>>,
}

impl Scrapper {
    pub fn new(client: Client) -> Scrapper {
        Scrapper {
            client,
            retry: RetryPolicy::scraper_default(),
            rate_limiter: RateLimiter::new(DEFAULT_RATE_LIMIT),
            timeout: DEFAULT_TIMEOUT,
            extractors: default_extractors(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_rate_limit(mut self, min_interval: Duration) -> Self {
        self.rate_limiter = RateLimiter::new(min_interval);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_extractors(mut self, extractors: Vec<Box<dyn ContentExtractor>>) -> Self {
        self.extractors = extractors;
        self
    }

    /// Never fails: exhausted retries come back as `success == false` with
    /// the last error.
    pub async fn scrape_url(&self, url: &str) -> ScrapedContent {
        self.rate_limiter.acquire().await;
        log::info!("scraping {}", url);

        let (attempts, outcome) = self.retry.run(url, move |_| self.attempt(url)).await;
        match outcome {
            Ok((method, extraction)) => {
                log::info!(
                    "scraped {} via {} ({} chars, {} attempt(s))",
                    url,
                    method.as_str(),
                    extraction.text.chars().count(),
                    attempts
                );
                ScrapedContent::extracted(url, extraction.title, extraction.text, method, attempts)
            }
            Err(e) => {
                log::warn!("giving up on {} after {} attempt(s): {}", url, attempts, e);
                ScrapedContent::failed(url, e.to_string(), attempts)
            }
        }
    }

    async fn attempt(&self, url: &str) -> Result<(ExtractionMethod, Extraction), FetchError> {
        let response = self.client.get(url).timeout(self.timeout).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }
        let html = response.text().await?;
        extract_with(&self.extractors, &html).ok_or(FetchError::EmptyContent)
    }

    /// Scrapes `urls` with at most `max_concurrent` in flight. The output is
    /// in input order.
    pub async fn scrape_many(&self, urls: &[String], max_concurrent: usize) -> Vec<ScrapedContent> {
        let pending: Vec<_> = urls.iter().map(|url| self.scrape_url(url)).collect();
        stream::iter(pending)
            .buffered(max_concurrent.max(1))
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let scrapper = Scrapper::new(Client::new());
        assert_eq!(scrapper.timeout, DEFAULT_TIMEOUT);
        assert_eq!(scrapper.rate_limiter.min_interval(), DEFAULT_RATE_LIMIT);
        assert_eq!(scrapper.retry.max_attempts, 3);
        assert_eq!(scrapper.extractors.len(), 2);
    }
}
