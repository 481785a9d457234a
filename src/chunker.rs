use crate::data_models::{DocumentChunk, Metadata};
use crate::errors::ConfigError;

/// Splits text into overlapping windows of whitespace-separated words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Chunker, ConfigError> {
        if chunk_size == 0 {
            return Err(ConfigError::Zero("chunk_size"));
        }
        if chunk_overlap >= chunk_size {
            return Err(ConfigError::InvalidChunkWindow {
                size: chunk_size,
                overlap: chunk_overlap,
            });
        }
        Ok(Chunker {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    fn step(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }

    /// Word ranges `[start, end)` of every window over `word_count` words.
    /// The window that reaches the last word is the final one.
    pub fn windows(&self, word_count: usize) -> Vec<(usize, usize)> {
        let mut windows = Vec::new();
        let mut start = 0;
        while start < word_count {
            let end = (start + self.chunk_size).min(word_count);
            windows.push((start, end));
            if end == word_count {
                break;
            }
            start += self.step();
        }
        windows
    }

    pub fn chunk(&self, text: &str, source_url: &str, metadata: &Metadata) -> Vec<DocumentChunk> {
        let words: Vec<&str> = text.split_whitespace().collect();
        self.windows(words.len())
            .into_iter()
            .enumerate()
            .map(|(chunk_index, (start, end))| DocumentChunk {
                content: words[start..end].join(" "),
                source_url: source_url.to_string(),
                chunk_index,
                word_count: end - start,
                metadata: metadata.clone(),
            })
            .collect()
    }
}
