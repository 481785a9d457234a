use serde::{Deserialize, Serialize};

use crate::data_models::{IndexStats, ScoredChunk};
use crate::orchestrator::PipelineOutcome;

const SNIPPET_CHARS: usize = 200;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub num_results: Option<usize>,
    #[serde(default)]
    pub search_first: Option<bool>,
    #[serde(default)]
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub query: String,
    pub answer: String,
    pub confidence: f32,
    pub sources: Vec<String>,
    pub chunks: Vec<ChunkResult>,
    pub search_source: Option<String>,
    pub pages_scraped: usize,
    pub retrieval_time_ms: u128,
    pub generation_time_ms: u128,
    pub processing_time_ms: u128,
    pub statistics: IndexStats,
}

#[derive(Debug, Serialize)]
pub struct ChunkResult {
    pub source_url: String,
    pub title: Option<String>,
    pub chunk_index: usize,
    pub score: f32,
    pub embedding_score: Option<f32>,
    pub keyword_score: f32,
    pub snippet: String,
}

impl From<&ScoredChunk> for ChunkResult {
    fn from(scored: &ScoredChunk) -> Self {
        let content = &scored.chunk.content;
        let snippet = if content.chars().count() > SNIPPET_CHARS {
            format!("{}...", content.chars().take(SNIPPET_CHARS).collect::<String>())
        } else {
            content.clone()
        };
        ChunkResult {
            source_url: scored.chunk.source_url.clone(),
            title: scored
                .chunk
                .metadata
                .get("title")
                .and_then(|t| t.as_str())
                .map(str::to_string),
            chunk_index: scored.chunk.chunk_index,
            score: scored.score,
            embedding_score: scored.embedding_score,
            keyword_score: scored.keyword_score,
            snippet,
        }
    }
}

impl QueryResponse {
    /// `None` when the pipeline stopped before producing an answer.
    pub fn from_outcome(outcome: PipelineOutcome) -> Option<QueryResponse> {
        let pages_scraped = outcome.pages_scraped();
        let rag = outcome.rag_result?;
        Some(QueryResponse {
            query: outcome.query,
            answer: rag.generated_response,
            confidence: rag.confidence_score,
            sources: rag.sources,
            chunks: rag.relevant_chunks.iter().map(ChunkResult::from).collect(),
            search_source: outcome.search_source,
            pages_scraped,
            retrieval_time_ms: rag.retrieval_time.as_millis(),
            generation_time_ms: rag.generation_time.as_millis(),
            processing_time_ms: outcome.total_time.as_millis(),
            statistics: outcome.statistics,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}
