use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::analyzer::TextAnalyzer;
use crate::errors::{ConfigError, EmbedError};
use crate::flat_index::l2_normalize;
use crate::http::HttpFetcher;
use crate::retry::RetryPolicy;

/// Maps texts to fixed-width vectors, one per input, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    /// Vector width, when known without calling `embed`.
    fn dimension(&self) -> Option<usize> {
        None
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME)
    })
}

/// Signed feature hashing over stemmed, stop-word-free terms. Deterministic
/// and offline; texts sharing vocabulary land close together.
pub struct HashingEmbedder {
    dim: usize,
    analyzer: TextAnalyzer,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Result<HashingEmbedder, ConfigError> {
        if dim == 0 {
            return Err(ConfigError::Zero("embedding dimension"));
        }
        Ok(HashingEmbedder {
            dim,
            analyzer: TextAnalyzer::terms(),
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dim];
        for token in self.analyzer.analyze(text.to_string()) {
            let hash = fnv1a(token.term.as_bytes());
            let bucket = (hash % self.dim as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        l2_normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.dim)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// OpenAI-compatible `POST {base}/embeddings`.
pub struct HttpEmbedder {
    http: HttpFetcher,
    url: String,
    model: String,
    api_key: Option<String>,
    batch_size: usize,
}

impl HttpEmbedder {
    pub fn new(
        client: Client,
        api_base: &str,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> HttpEmbedder {
        HttpEmbedder {
            http: HttpFetcher::new(client, RetryPolicy::http_default()),
            url: format!("{}/embeddings", api_base.trim_end_matches('/')),
            model: model.into(),
            api_key,
            batch_size: 64,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.http.set_retry_policy(retry);
        self
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: batch,
        };
        let response = self
            .http
            .send("embeddings", |client| {
                let builder = client.post(&self.url).json(&request);
                match &self.api_key {
                    Some(key) => builder.bearer_auth(key),
                    None => builder,
                }
            })
            .await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| EmbedError::Decode(e.to_string()))?;
        let mut parsed: EmbeddingResponse =
            serde_json::from_slice(&body).map_err(|e| EmbedError::Decode(e.to_string()))?;
        if parsed.data.len() != batch.len() {
            return Err(EmbedError::CountMismatch {
                expected: batch.len(),
                got: parsed.data.len(),
            });
        }
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_batch(batch).await?);
        }
        Ok(vectors)
    }
}
