#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::Router;
use glean::data_models::{ExtractionMethod, ScrapedContent, SearchResponse, SearchResult};
use glean::embeddings::{Embedder, HashingEmbedder};
use glean::errors::{EmbedError, FetchError, GenerateError};
use glean::generator::AnswerGenerator;
use glean::retry::RetryPolicy;
use glean::scrapper::Scrapper;
use reqwest::{Client, StatusCode};
use tokio::net::TcpListener;

/// Serves `router` on an ephemeral local port and returns its base URL.
pub async fn serve(router: Router) -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(format!("http://{addr}"))
}

/// Retries quickly so tests that exhaust attempts stay fast.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        jitter: Duration::ZERO,
    }
}

pub fn fast_scrapper() -> Scrapper {
    Scrapper::new(Client::new())
        .with_retry(fast_retry())
        .with_rate_limit(Duration::ZERO)
        .with_timeout(Duration::from_secs(5))
}

pub fn words(prefix: &str, count: usize) -> String {
    (0..count)
        .map(|i| format!("{prefix}{i}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// A page the readability extractor keeps: a title and paragraphs of
/// ordinary prose.
pub fn article_html(title: &str, paragraphs: &[&str]) -> String {
    let body = paragraphs
        .iter()
        .map(|p| format!("<p>{p}</p>"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "<html><head><title>{title}</title></head><body>\
         <nav><a href=\"/\">Home</a> <a href=\"/about\">About</a></nav>\
         <article>{body}</article>\
         <footer>Copyright notice for every page</footer></body></html>"
    )
}

pub fn scraped(url: &str, title: &str, content: &str) -> ScrapedContent {
    ScrapedContent::extracted(url, title, content.to_string(), ExtractionMethod::Readability, 1)
}

pub fn result(url: &str, snippet: &str, source: &str) -> SearchResult {
    SearchResult::new(format!("Title for {url}"), url, snippet, source)
}

/// Returns a fixed result list, optionally after a delay.
pub struct StaticBackend {
    pub name: String,
    pub results: Vec<SearchResult>,
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl StaticBackend {
    pub fn new(name: &str, urls: &[&str]) -> StaticBackend {
        StaticBackend {
            name: name.to_string(),
            results: urls
                .iter()
                .map(|url| result(url, &format!("snippet about {url}"), name))
                .collect(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_results(name: &str, results: Vec<SearchResult>) -> StaticBackend {
        StaticBackend {
            name: name.to_string(),
            results,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> StaticBackend {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl glean::search::SearchBackend for StaticBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, _query: &str, num_results: usize) -> SearchResponse {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut results = self.results.clone();
        results.truncate(num_results);
        SearchResponse::succeeded(&self.name, results, self.delay)
    }
}

pub struct FailingBackend {
    pub name: String,
}

impl FailingBackend {
    pub fn new(name: &str) -> FailingBackend {
        FailingBackend {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl glean::search::SearchBackend for FailingBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, _query: &str, _num_results: usize) -> SearchResponse {
        let error = FetchError::Status(StatusCode::SERVICE_UNAVAILABLE);
        SearchResponse::failed(&self.name, error.to_string(), Duration::ZERO)
    }
}

pub struct PanickingBackend;

#[async_trait]
impl glean::search::SearchBackend for PanickingBackend {
    fn name(&self) -> &str {
        "panicky"
    }

    async fn search(&self, _query: &str, _num_results: usize) -> SearchResponse {
        panic!("backend exploded")
    }
}

/// Records how many searches run at once.
pub struct ProbeBackend {
    pub name: String,
    pub in_flight: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
}

#[async_trait]
impl glean::search::SearchBackend for ProbeBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, _query: &str, _num_results: usize) -> SearchResponse {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let url = format!("https://{}.test/", self.name);
        SearchResponse::succeeded(&self.name, vec![result(&url, "counted", &self.name)], Duration::ZERO)
    }
}

pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn name(&self) -> &str {
        "failing"
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Err(EmbedError::Fetch(FetchError::Status(
            StatusCode::SERVICE_UNAVAILABLE,
        )))
    }
}

/// Embeds batches like the hashing embedder but rejects single-text calls,
/// which is how queries are embedded.
pub struct BatchOnlyEmbedder(pub HashingEmbedder);

#[async_trait]
impl Embedder for BatchOnlyEmbedder {
    fn name(&self) -> &str {
        "batch-only"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.len() == 1 {
            return Err(EmbedError::Decode("single texts are not supported".into()));
        }
        self.0.embed(texts).await
    }
}

/// Hashing embeddings handed back after a fixed delay. It declares no
/// dimension, so anything that needs one has to embed a sample.
pub struct SlowEmbedder {
    inner: HashingEmbedder,
    delay: Duration,
}

impl SlowEmbedder {
    pub fn new(dim: usize, delay: Duration) -> Result<SlowEmbedder> {
        Ok(SlowEmbedder {
            inner: HashingEmbedder::new(dim)?,
            delay,
        })
    }
}

#[async_trait]
impl Embedder for SlowEmbedder {
    fn name(&self) -> &str {
        "slow"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        tokio::time::sleep(self.delay).await;
        self.inner.embed(texts).await
    }
}

pub struct FailingGenerator;

#[async_trait]
impl AnswerGenerator for FailingGenerator {
    fn name(&self) -> &str {
        "failing"
    }

    async fn generate(&self, _question: &str, _context: &str) -> Result<String, GenerateError> {
        Err(GenerateError::EmptyCompletion)
    }
}

pub struct PanickingGenerator;

#[async_trait]
impl AnswerGenerator for PanickingGenerator {
    fn name(&self) -> &str {
        "panicky"
    }

    async fn generate(&self, _question: &str, _context: &str) -> Result<String, GenerateError> {
        panic!("generator exploded")
    }
}

/// Keeps every context it is handed.
#[derive(Default)]
pub struct RecordingGenerator {
    pub contexts: std::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl AnswerGenerator for RecordingGenerator {
    fn name(&self) -> &str {
        "recording"
    }

    async fn generate(&self, question: &str, context: &str) -> Result<String, GenerateError> {
        if let Ok(mut contexts) = self.contexts.lock() {
            contexts.push(context.to_string());
        }
        Ok(format!("answer to {question}"))
    }
}
