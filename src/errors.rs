use std::any::Any;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Problems detected while wiring components together. These are raised at
/// construction time, never in the middle of a query.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({size})")]
    InvalidChunkWindow { size: usize, overlap: usize },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("missing required setting: {0}")]
    MissingCredential(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("unknown search backend: {0}")]
    UnknownBackend(String),

    #[error("at least one search backend must be configured")]
    NoBackends,

    #[error("invalid endpoint {url:?}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// A single failed HTTP attempt.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {0}")]
    Status(StatusCode),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("no extractable content")]
    EmptyContent,
}

impl FetchError {
    /// 5xx, 429, network errors and empty extractions are worth another try.
    /// Any other 4xx will not change on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Status(status) => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            FetchError::Transport(_) => true,
            FetchError::EmptyContent => true,
        }
    }
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("malformed embedding response: {0}")]
    Decode(String),

    #[error("embedding count mismatch: sent {expected} texts, got {got} vectors")]
    CountMismatch { expected: usize, got: usize },
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("malformed completion response: {0}")]
    Decode(String),

    #[error("completion response contained no choices")]
    EmptyCompletion,
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("embedding failed: {0}")]
    Embed(#[from] EmbedError),

    #[error("index misaligned: {chunks} chunks but {embeddings} embeddings")]
    Misaligned { chunks: usize, embeddings: usize },

    #[error("embedding dimension mismatch: index has {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Reasons the orchestrator stopped before producing an answer.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Empty query provided")]
    EmptyQuery,

    #[error("Search failed or returned no results")]
    SearchFailed { detail: Option<String> },

    #[error("No valid URLs found to scrape")]
    NoValidUrls,

    #[error("No pages yielded usable content")]
    NoUsableContent,

    #[error("Indexing failed: {0}")]
    Index(#[from] IndexError),

    #[error("Pipeline timed out after {0:?}")]
    Timeout(Duration),

    #[error("System error: {0}")]
    System(String),
}

impl PipelineError {
    /// Short machine-readable tag, used by the HTTP layer.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::EmptyQuery => "empty_query",
            PipelineError::SearchFailed { .. } => "search_failed",
            PipelineError::NoValidUrls => "no_valid_urls",
            PipelineError::NoUsableContent => "no_usable_content",
            PipelineError::Index(_) => "index_failed",
            PipelineError::Timeout(_) => "timeout",
            PipelineError::System(_) => "system_error",
        }
    }
}

/// Best-effort rendering of a panic payload.
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
