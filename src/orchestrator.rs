use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use reqwest::Url;
use tracing::Instrument;

use crate::chunker::Chunker;
use crate::config::{Config, EmbeddingsKind, GeneratorKind};
use crate::data_models::{IndexStats, RagResult, ScrapedContent};
use crate::embeddings::{Embedder, HashingEmbedder, HttpEmbedder};
use crate::errors::{ConfigError, PipelineError, panic_message};
use crate::generator::{AnswerGenerator, ExtractiveGenerator, HttpChatGenerator};
use crate::http::{BROWSER_USER_AGENT, build_client};
use crate::indexer::{DEFAULT_MIN_CONTENT_CHARS, Indexer};
use crate::query_engine::QueryEngine;
use crate::retry::RetryPolicy;
use crate::scrapper::{self, Scrapper};
use crate::search::{SearchAggregator, build_backends};

pub const DEFAULT_NUM_RESULTS: usize = 8;
pub const DEFAULT_TOP_K: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub num_results: usize,
    /// When false, skip search, scraping and indexing and answer from what is
    /// already indexed.
    pub search_first: bool,
    pub top_k: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            num_results: DEFAULT_NUM_RESULTS,
            search_first: true,
            top_k: DEFAULT_TOP_K,
        }
    }
}

/// Everything a pipeline run produced, including partial progress when it
/// stopped early.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub query: String,
    pub rag_result: Option<RagResult>,
    pub scraped: Vec<ScrapedContent>,
    pub search_source: Option<String>,
    pub failure: Option<PipelineError>,
    pub total_time: Duration,
    pub statistics: IndexStats,
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn pages_scraped(&self) -> usize {
        self.scraped.iter().filter(|s| s.success).count()
    }
}

#[derive(Debug, Default)]
struct Progress {
    scraped: Vec<ScrapedContent>,
    search_source: Option<String>,
}

pub struct Orchestrator {
    aggregator: SearchAggregator,
    scrapper: Scrapper,
    indexer: Arc<Indexer>,
    query_engine: QueryEngine,
    scrape_concurrency: usize,
    min_content_chars: usize,
    default_num_results: usize,
    timeout: Option<Duration>,
}

impl Orchestrator {
    pub fn new(aggregator: SearchAggregator, scrapper: Scrapper, query_engine: QueryEngine) -> Self {
        Orchestrator {
            aggregator,
            scrapper,
            indexer: query_engine.indexer().clone(),
            query_engine,
            scrape_concurrency: scrapper::DEFAULT_MAX_CONCURRENT,
            min_content_chars: DEFAULT_MIN_CONTENT_CHARS,
            default_num_results: DEFAULT_NUM_RESULTS,
            timeout: None,
        }
    }

    /// Wires every component from configuration around one shared HTTP client.
    pub fn from_config(config: &Config) -> Result<Orchestrator, ConfigError> {
        config.validate()?;
        let client = build_client(BROWSER_USER_AGENT)?;

        let aggregator = SearchAggregator::new(
            build_backends(config, client.clone())?,
            config.search_max_concurrent,
        )?;

        let scrapper = Scrapper::new(client.clone())
            .with_retry(RetryPolicy::scraper_default().with_max_attempts(config.scraper_max_attempts))
            .with_timeout(config.scraper_timeout)
            .with_rate_limit(config.scraper_rate_limit);

        let embedder: Option<Arc<dyn Embedder>> = match config.embeddings {
            EmbeddingsKind::Hashing => Some(Arc::new(HashingEmbedder::new(config.embedding_dim)?)),
            EmbeddingsKind::Http => Some(Arc::new(HttpEmbedder::new(
                client.clone(),
                &config.embedding_api_base,
                config.embedding_model.clone(),
                config.embedding_api_key.clone(),
            ))),
            EmbeddingsKind::Disabled => None,
        };

        let chunker = Chunker::new(config.chunk_size, config.chunk_overlap)?;
        let indexer = Arc::new(
            Indexer::new(chunker, embedder).with_min_content_chars(config.min_content_chars),
        );

        let generator: Arc<dyn AnswerGenerator> = match config.generator {
            GeneratorKind::Extractive => Arc::new(ExtractiveGenerator),
            GeneratorKind::OpenAi => Arc::new(HttpChatGenerator::new(
                client,
                &config.llm_api_base,
                config.llm_model.clone(),
                config.llm_api_key.clone(),
            )?),
        };

        let mut orchestrator = Orchestrator::new(
            aggregator,
            scrapper,
            QueryEngine::new(indexer, generator),
        )
        .with_scrape_concurrency(config.scraper_max_concurrent)
        .with_min_content_chars(config.min_content_chars);
        orchestrator.default_num_results = config.num_results;
        orchestrator.timeout = config.pipeline_timeout;
        Ok(orchestrator)
    }

    pub fn with_scrape_concurrency(mut self, scrape_concurrency: usize) -> Self {
        self.scrape_concurrency = scrape_concurrency.max(1);
        self
    }

    pub fn with_min_content_chars(mut self, min_content_chars: usize) -> Self {
        self.min_content_chars = min_content_chars;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn indexer(&self) -> &Arc<Indexer> {
        &self.indexer
    }

    pub fn default_options(&self) -> PipelineOptions {
        PipelineOptions {
            num_results: self.default_num_results,
            ..PipelineOptions::default()
        }
    }

    /// Runs the whole pipeline. Never fails and never lets a panic escape:
    /// problems are reported in `PipelineOutcome::failure`.
    pub async fn run(&self, query: &str, options: PipelineOptions) -> PipelineOutcome {
        let start = Instant::now();
        let span = tracing::info_span!("pipeline", query = %query, search_first = options.search_first);
        let mut progress = Progress::default();

        let stages = AssertUnwindSafe(self.stages(query, options, &mut progress))
            .catch_unwind()
            .instrument(span.clone());
        let caught = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, stages).await {
                Ok(caught) => caught,
                Err(_) => Ok(Err(PipelineError::Timeout(limit))),
            },
            None => stages.await,
        };
        let result = caught.unwrap_or_else(|payload| {
            Err(PipelineError::System(panic_message(payload)))
        });

        let statistics = self.indexer.stats().await;
        let total_time = start.elapsed();
        let _entered = span.enter();
        let (rag_result, failure) = match result {
            Ok(rag_result) => {
                tracing::info!(
                    chunks = rag_result.relevant_chunks.len(),
                    confidence = rag_result.confidence_score,
                    elapsed_ms = total_time.as_millis() as u64,
                    "pipeline finished"
                );
                (Some(rag_result), None)
            }
            Err(e) => {
                tracing::warn!(kind = e.kind(), error = %e, "pipeline stopped");
                (None, Some(e))
            }
        };

        PipelineOutcome {
            query: query.to_string(),
            rag_result,
            scraped: progress.scraped,
            search_source: progress.search_source,
            failure,
            total_time,
            statistics,
        }
    }

    async fn stages(
        &self,
        query: &str,
        options: PipelineOptions,
        progress: &mut Progress,
    ) -> Result<RagResult, PipelineError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PipelineError::EmptyQuery);
        }

        if options.search_first {
            let response = self.aggregator.search(query, options.num_results).await;
            if !response.success || response.results.is_empty() {
                return Err(PipelineError::SearchFailed {
                    detail: response.error_message,
                });
            }
            tracing::info!(
                results = response.results.len(),
                source = %response.source,
                "search complete"
            );
            progress.search_source = Some(response.source.clone());

            let urls: Vec<String> = response
                .results
                .iter()
                .map(|r| r.url.clone())
                .filter(|url| is_scrapable(url))
                .collect();
            if urls.is_empty() {
                return Err(PipelineError::NoValidUrls);
            }

            let scraped = self.scrapper.scrape_many(&urls, self.scrape_concurrency).await;
            let usable: Vec<ScrapedContent> = scraped
                .iter()
                .filter(|s| s.is_indexable(self.min_content_chars))
                .cloned()
                .collect();
            tracing::info!(
                attempted = urls.len(),
                usable = usable.len(),
                "scraping complete"
            );
            progress.scraped = scraped;
            if usable.is_empty() {
                return Err(PipelineError::NoUsableContent);
            }

            let report = self.indexer.index_documents(&usable).await?;
            tracing::info!(
                documents = report.documents_indexed,
                chunks = report.chunks_added,
                duplicates = report.skipped_duplicates,
                "indexing complete"
            );
        }

        Ok(self.query_engine.query(query, options.top_k).await)
    }
}

/// Only absolute http(s) URLs are handed to the scraper.
pub fn is_scrapable(url: &str) -> bool {
    Url::parse(url)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_scrapable() {
        assert!(is_scrapable("https://example.com/a"));
        assert!(is_scrapable("http://example.com"));
        assert!(!is_scrapable("ftp://example.com/file"));
        assert!(!is_scrapable("/relative/path"));
        assert!(!is_scrapable("mailto:someone@example.com"));
    }

    #[test]
    fn test_default_options() {
        let options = PipelineOptions::default();
        assert_eq!(options.num_results, 8);
        assert!(options.search_first);
        assert_eq!(options.top_k, 5);
    }
}
