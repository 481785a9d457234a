use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form per-record attributes (provider ranks, extraction method, ...).
pub type Metadata = Map<String, Value>;

pub const WIKIPEDIA_SOURCE: &str = "wikipedia";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    /// Name of the backend that produced this result.
    pub source: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl SearchResult {
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        snippet: impl Into<String>,
        source: impl Into<String>,
    ) -> SearchResult {
        SearchResult {
            title: title.into(),
            url: url.into(),
            snippet: snippet.into(),
            source: source.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> SearchResult {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn is_wikipedia(&self) -> bool {
        self.source == WIKIPEDIA_SOURCE
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SearchResponse {
    pub success: bool,
    pub results: Vec<SearchResult>,
    pub source: String,
    pub total_results: usize,
    pub response_time: Duration,
    pub error_message: Option<String>,
}

impl SearchResponse {
    pub fn succeeded(
        source: impl Into<String>,
        results: Vec<SearchResult>,
        response_time: Duration,
    ) -> SearchResponse {
        SearchResponse {
            success: true,
            total_results: results.len(),
            results,
            source: source.into(),
            response_time,
            error_message: None,
        }
    }

    pub fn failed(
        source: impl Into<String>,
        error_message: impl Into<String>,
        response_time: Duration,
    ) -> SearchResponse {
        SearchResponse {
            success: false,
            results: Vec::new(),
            source: source.into(),
            total_results: 0,
            response_time,
            error_message: Some(error_message.into()),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Boilerplate-aware block extraction.
    Readability,
    /// Structural walk over `main` / `article` / `body`.
    Structural,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::Readability => "readability",
            ExtractionMethod::Structural => "structural",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ScrapedContent {
    pub url: String,
    pub title: String,
    pub content: String,
    pub text_length: usize,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error_message: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ScrapedContent {
    pub fn extracted(
        url: impl Into<String>,
        title: impl Into<String>,
        content: String,
        method: ExtractionMethod,
        attempts: u32,
    ) -> ScrapedContent {
        let mut metadata = Metadata::new();
        metadata.insert("method".into(), method.as_str().into());
        metadata.insert("attempts".into(), attempts.into());
        ScrapedContent {
            url: url.into(),
            title: title.into(),
            text_length: content.chars().count(),
            content,
            timestamp: Utc::now(),
            success: true,
            error_message: None,
            metadata,
        }
    }

    pub fn failed(
        url: impl Into<String>,
        error_message: impl Into<String>,
        attempts: u32,
    ) -> ScrapedContent {
        let mut metadata = Metadata::new();
        metadata.insert("attempts".into(), attempts.into());
        ScrapedContent {
            url: url.into(),
            title: String::new(),
            content: String::new(),
            text_length: 0,
            timestamp: Utc::now(),
            success: false,
            error_message: Some(error_message.into()),
            metadata,
        }
    }

    pub fn method(&self) -> Option<&str> {
        self.metadata.get("method").and_then(|v| v.as_str())
    }

    pub fn attempts(&self) -> u32 {
        self.metadata
            .get("attempts")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32
    }

    /// Successful and carrying more than `min_chars` characters of text.
    pub fn is_indexable(&self, min_chars: usize) -> bool {
        self.success && self.content.trim().chars().count() > min_chars
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DocumentChunk {
    pub content: String,
    pub source_url: String,
    /// Position within the source document, 0-based and gap-free.
    pub chunk_index: usize,
    pub word_count: usize,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A retrieved chunk paired with the scores that ranked it.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Arc<DocumentChunk>,
    /// Blended score in embedding mode, jaccard score in keyword mode.
    pub score: f32,
    pub embedding_score: Option<f32>,
    pub keyword_score: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RagResult {
    pub query: String,
    pub relevant_chunks: Vec<ScoredChunk>,
    pub generated_response: String,
    pub confidence_score: f32,
    pub sources: Vec<String>,
    pub retrieval_time: Duration,
    pub generation_time: Duration,
}

pub const NO_INDEXED_DOCUMENTS: &str = "No indexed documents available.";

impl RagResult {
    pub fn empty_index(query: impl Into<String>) -> RagResult {
        RagResult {
            query: query.into(),
            relevant_chunks: Vec::new(),
            generated_response: NO_INDEXED_DOCUMENTS.to_string(),
            confidence_score: 0.0,
            sources: Vec::new(),
            retrieval_time: Duration::ZERO,
            generation_time: Duration::ZERO,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct IndexStats {
    pub total_chunks: usize,
    pub unique_sources: usize,
    pub embeddings_enabled: bool,
    pub avg_chunk_words: f64,
}

/// Serializable form of the whole index. When `embeddings` is present it is
/// index-aligned with `chunks`.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct IndexSnapshot {
    pub chunks: Vec<DocumentChunk>,
    pub embeddings: Option<Vec<Vec<f32>>>,
}
