use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use crate::analyzer::{TextAnalyzer, jaccard};
use crate::data_models::{RagResult, ScoredChunk};
use crate::generator::{AnswerGenerator, ExtractiveGenerator};
use crate::indexer::Indexer;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalConfig {
    /// Embedding mode pulls `top_k * candidate_multiplier` neighbours before
    /// re-ranking.
    pub candidate_multiplier: usize,
    pub embedding_weight: f32,
    pub keyword_weight: f32,
    /// How many of the top chunks are handed to the generator.
    pub context_chunks: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_multiplier: 3,
            embedding_weight: 0.7,
            keyword_weight: 0.3,
            context_chunks: 3,
        }
    }
}

pub struct QueryEngine {
    indexer: Arc<Indexer>,
    generator: Arc<dyn AnswerGenerator>,
    analyzer: TextAnalyzer,
    config: RetrievalConfig,
}

impl QueryEngine {
    pub fn new(indexer: Arc<Indexer>, generator: Arc<dyn AnswerGenerator>) -> QueryEngine {
        QueryEngine {
            indexer,
            generator,
            analyzer: TextAnalyzer::keyword(),
            config: RetrievalConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RetrievalConfig) -> Self {
        self.config = config;
        self
    }

    pub fn indexer(&self) -> &Arc<Indexer> {
        &self.indexer
    }

    /// Embeds the query, or returns `None` so the caller falls back to
    /// keyword scoring.
    async fn embed_query(&self, text: &str) -> Option<Vec<f32>> {
        let embedder = self.indexer.embedder()?;
        match embedder.embed(&[text.to_string()]).await {
            Ok(mut vectors) if vectors.len() == 1 => vectors.pop(),
            Ok(vectors) => {
                log::warn!(
                    "query embedding returned {} vectors, using keyword scoring",
                    vectors.len()
                );
                None
            }
            Err(e) => {
                log::warn!("query embedding failed, using keyword scoring: {}", e);
                None
            }
        }
    }

    /// Ranks indexed chunks against `text`, best first, at most `top_k`.
    /// Returns `None` when the index is empty. A query vector whose width
    /// doesn't match the index is scored by keywords instead.
    pub async fn retrieve(&self, text: &str, top_k: usize) -> Option<Vec<ScoredChunk>> {
        let query_vector = self.embed_query(text).await;
        let query_terms = self.analyzer.term_set(text);

        let state = self.indexer.state().read().await;
        if state.is_empty() {
            return None;
        }

        let mut scored: Vec<ScoredChunk> = match (query_vector, state.flat.as_ref()) {
            (Some(vector), Some(flat)) if vector.len() == flat.dim() => {
                let candidates = top_k
                    .saturating_mul(self.config.candidate_multiplier)
                    .min(state.chunks.len());
                flat.search(&vector, candidates)
                    .into_iter()
                    .filter_map(|neighbor| {
                        let chunk = state.chunks.get(neighbor.position)?.clone();
                        let keyword_score =
                            jaccard(&query_terms, &self.analyzer.term_set(&chunk.content));
                        Some(ScoredChunk {
                            chunk,
                            score: self.config.embedding_weight * neighbor.score
                                + self.config.keyword_weight * keyword_score,
                            embedding_score: Some(neighbor.score),
                            keyword_score,
                        })
                    })
                    .collect()
            }
            _ => state
                .chunks
                .iter()
                .filter_map(|chunk| {
                    let keyword_score =
                        jaccard(&query_terms, &self.analyzer.term_set(&chunk.content));
                    (keyword_score > 0.0).then(|| ScoredChunk {
                        chunk: chunk.clone(),
                        score: keyword_score,
                        embedding_score: None,
                        keyword_score,
                    })
                })
                .collect(),
        };
        drop(state);

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        Some(scored)
    }

    /// Never fails. An empty index, an empty match set and a failing
    /// generator all produce a well-formed result.
    pub async fn query(&self, text: &str, top_k: usize) -> RagResult {
        let start = Instant::now();
        let Some(chunks) = self.retrieve(text, top_k).await else {
            return RagResult::empty_index(text);
        };
        let retrieval_time = start.elapsed();

        if chunks.is_empty() {
            return RagResult {
                query: text.to_string(),
                relevant_chunks: Vec::new(),
                generated_response: format!("No relevant information found for query: {text}"),
                confidence_score: 0.0,
                sources: Vec::new(),
                retrieval_time,
                generation_time: Default::default(),
            };
        }

        let context = chunks
            .iter()
            .take(self.config.context_chunks)
            .map(|c| format!("Source: {}\n{}", c.chunk.source_url, c.chunk.content))
            .collect::<Vec<_>>()
            .join("\n\n");

        let generation_start = Instant::now();
        let generated_response = match self.generator.generate(text, &context).await {
            Ok(answer) => answer,
            Err(e) => {
                log::warn!(
                    "{} generator failed, returning extractive summary: {}",
                    self.generator.name(),
                    e
                );
                ExtractiveGenerator::summarize(text, &context)
            }
        };
        let generation_time = generation_start.elapsed();

        let mean = chunks.iter().map(|c| c.score).sum::<f32>() / chunks.len() as f32;
        let sources = chunks
            .iter()
            .map(|c| c.chunk.source_url.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        RagResult {
            query: text.to_string(),
            confidence_score: mean.clamp(0.0, 1.0),
            relevant_chunks: chunks,
            generated_response,
            sources,
            retrieval_time,
            generation_time,
        }
    }
}
