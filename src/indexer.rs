use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashSet;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::chunker::Chunker;
use crate::data_models::{DocumentChunk, IndexSnapshot, IndexStats, Metadata, ScrapedContent};
use crate::embeddings::Embedder;
use crate::errors::IndexError;
use crate::flat_index::FlatIndex;

pub const DEFAULT_MIN_CONTENT_CHARS: usize = 100;

/// Everything readers need, guarded by one lock so chunks, embeddings and the
/// vector index are always seen together.
///
/// ```text
///     chunks:     [c0, c1, c2, ...]
///     embeddings: [e0, e1, e2, ...]   (same length when present)
///     flat:       FlatIndex(embeddings)
/// ```
#[derive(Debug, Default)]
pub struct IndexState {
    pub chunks: Vec<Arc<DocumentChunk>>,
    pub embeddings: Option<Vec<Vec<f32>>>,
    pub flat: Option<FlatIndex>,
}

impl IndexState {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    fn embedding_dim(&self) -> Option<usize> {
        self.embeddings
            .as_ref()
            .and_then(|e| e.first())
            .map(|v| v.len())
    }
}

/// Outcome of one `index_documents` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub documents_indexed: usize,
    pub chunks_added: usize,
    /// Failed scrapes or content at or under the minimum length.
    pub skipped_unusable: usize,
    /// Sources that were already in the index.
    pub skipped_duplicates: usize,
}

/// Sources claimed by one `index_documents` call. Unless committed, the
/// claims are released on drop, so a batch that errors, panics or is
/// cancelled mid-embedding can be indexed again later.
struct Claims<'a> {
    sources: &'a DashSet<String>,
    urls: Vec<String>,
    committed: bool,
}

impl<'a> Claims<'a> {
    fn new(sources: &'a DashSet<String>) -> Claims<'a> {
        Claims {
            sources,
            urls: Vec::new(),
            committed: false,
        }
    }

    /// False when another batch already owns `url`.
    fn claim(&mut self, url: &str) -> bool {
        if !self.sources.insert(url.to_string()) {
            return false;
        }
        self.urls.push(url.to_string());
        true
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Claims<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for url in &self.urls {
            self.sources.remove(url);
        }
    }
}

/// Append-only chunk index with an optional embedding matrix.
pub struct Indexer {
    chunker: Chunker,
    embedder: Option<Arc<dyn Embedder>>,
    min_content_chars: usize,
    state: RwLock<IndexState>,
    indexed_sources: DashSet<String>,
}

impl Indexer {
    pub fn new(chunker: Chunker, embedder: Option<Arc<dyn Embedder>>) -> Indexer {
        Indexer {
            chunker,
            embedder,
            min_content_chars: DEFAULT_MIN_CONTENT_CHARS,
            state: RwLock::new(IndexState::default()),
            indexed_sources: DashSet::new(),
        }
    }

    pub fn with_min_content_chars(mut self, min_content_chars: usize) -> Self {
        self.min_content_chars = min_content_chars;
        self
    }

    pub fn embedder(&self) -> Option<&Arc<dyn Embedder>> {
        self.embedder.as_ref()
    }

    pub fn embeddings_enabled(&self) -> bool {
        self.embedder.is_some()
    }

    pub fn state(&self) -> &RwLock<IndexState> {
        &self.state
    }

    /// Chunks and (optionally) embeds the usable documents, then appends them.
    /// Either the whole batch lands or nothing does.
    pub async fn index_documents(
        &self,
        contents: &[ScrapedContent],
    ) -> Result<IndexReport, IndexError> {
        let mut report = IndexReport::default();
        let mut claims = Claims::new(&self.indexed_sources);
        let mut new_chunks = Vec::new();

        for content in contents {
            if !content.is_indexable(self.min_content_chars) {
                report.skipped_unusable += 1;
                continue;
            }
            if !claims.claim(&content.url) {
                log::debug!("{} is already indexed, skipping", content.url);
                report.skipped_duplicates += 1;
                continue;
            }

            let mut metadata = Metadata::new();
            metadata.insert("title".into(), Value::String(content.title.clone()));
            new_chunks.extend(self.chunker.chunk(&content.content, &content.url, &metadata));
            report.documents_indexed += 1;
        }

        if new_chunks.is_empty() {
            claims.commit();
            return Ok(report);
        }

        let new_embeddings = match &self.embedder {
            Some(embedder) => {
                let texts: Vec<String> = new_chunks.iter().map(|c| c.content.clone()).collect();
                match embedder.embed(&texts).await {
                    Ok(vectors) if vectors.len() == new_chunks.len() => Some(vectors),
                    Ok(vectors) => {
                        return Err(IndexError::Misaligned {
                            chunks: new_chunks.len(),
                            embeddings: vectors.len(),
                        });
                    }
                    Err(e) => {
                        log::error!("embedding {} chunks failed: {}", new_chunks.len(), e);
                        return Err(e.into());
                    }
                }
            }
            None => None,
        };

        let mut state = self.state.write().await;
        if let Some(vectors) = new_embeddings {
            let expected = state
                .embedding_dim()
                .or_else(|| vectors.first().map(|v| v.len()))
                .unwrap_or(0);
            if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    got: bad.len(),
                });
            }
            let matrix = state.embeddings.get_or_insert_with(Vec::new);
            matrix.extend(vectors);
            // TODO: switch to an incremental index once chunk counts outgrow a full rebuild
            let flat = FlatIndex::build(matrix);
            state.flat = Some(flat);
        }
        report.chunks_added = new_chunks.len();
        state.chunks.extend(new_chunks.into_iter().map(Arc::new));
        claims.commit();

        log::info!(
            "indexed {} documents ({} chunks), index now holds {} chunks",
            report.documents_indexed,
            report.chunks_added,
            state.chunks.len()
        );
        Ok(report)
    }

    pub async fn stats(&self) -> IndexStats {
        let state = self.state.read().await;
        let total_chunks = state.chunks.len();
        let unique_sources = state
            .chunks
            .iter()
            .map(|c| c.source_url.as_str())
            .collect::<HashSet<_>>()
            .len();
        let avg_chunk_words = if total_chunks == 0 {
            0.0
        } else {
            state.chunks.iter().map(|c| c.word_count).sum::<usize>() as f64 / total_chunks as f64
        };
        IndexStats {
            total_chunks,
            unique_sources,
            embeddings_enabled: self.embeddings_enabled(),
            avg_chunk_words,
        }
    }

    pub async fn snapshot(&self) -> IndexSnapshot {
        let state = self.state.read().await;
        IndexSnapshot {
            chunks: state.chunks.iter().map(|c| c.as_ref().clone()).collect(),
            embeddings: state.embeddings.clone(),
        }
    }

    /// Replaces the index with `snapshot`. Embeddings must be aligned with the
    /// chunks and match the embedder's dimension. A snapshot without
    /// embeddings loaded into an embedding indexer has its chunks re-embedded.
    pub async fn restore(&self, snapshot: IndexSnapshot) -> Result<(), IndexError> {
        let IndexSnapshot { chunks, embeddings } = snapshot;
        let embeddings = match (embeddings, &self.embedder) {
            (Some(vectors), Some(embedder)) => {
                if vectors.len() != chunks.len() {
                    return Err(IndexError::Misaligned {
                        chunks: chunks.len(),
                        embeddings: vectors.len(),
                    });
                }
                let expected = vectors.first().map(|v| v.len()).unwrap_or(0);
                if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
                    return Err(IndexError::DimensionMismatch {
                        expected,
                        got: bad.len(),
                    });
                }
                if let Some(first) = chunks.first() {
                    let live = embedder_dimension(embedder.as_ref(), &first.content).await?;
                    if live != expected {
                        return Err(IndexError::DimensionMismatch {
                            expected: live,
                            got: expected,
                        });
                    }
                }
                Some(vectors)
            }
            (None, Some(embedder)) if !chunks.is_empty() => {
                log::info!("snapshot has no embeddings, embedding {} chunks", chunks.len());
                let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
                let vectors = embedder.embed(&texts).await?;
                if vectors.len() != chunks.len() {
                    return Err(IndexError::Misaligned {
                        chunks: chunks.len(),
                        embeddings: vectors.len(),
                    });
                }
                Some(vectors)
            }
            (_, Some(_)) => Some(Vec::new()),
            (_, None) => None,
        };

        let flat = embeddings
            .as_ref()
            .filter(|e| !e.is_empty())
            .map(|e| FlatIndex::build(e));

        let mut state = self.state.write().await;
        self.indexed_sources.clear();
        for chunk in &chunks {
            self.indexed_sources.insert(chunk.source_url.clone());
        }
        *state = IndexState {
            chunks: chunks.into_iter().map(Arc::new).collect(),
            embeddings,
            flat,
        };
        log::info!("restored index with {} chunks", state.chunks.len());
        Ok(())
    }
}

/// Width of the vectors `embedder` produces. Embedders that don't declare one
/// are asked to embed `sample`.
async fn embedder_dimension(embedder: &dyn Embedder, sample: &str) -> Result<usize, IndexError> {
    if let Some(dim) = embedder.dimension() {
        return Ok(dim);
    }
    let vectors = embedder.embed(&[sample.to_string()]).await?;
    match vectors.as_slice() {
        [vector] => Ok(vector.len()),
        _ => Err(IndexError::Misaligned {
            chunks: 1,
            embeddings: vectors.len(),
        }),
    }
}
