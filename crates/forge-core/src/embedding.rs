//! Embedding backends and the gateway the knowledge base embeds through.
//!
//! The gateway hides which model produces vectors. It batches chunk
//! embedding, degrades a failed batch to per-chunk requests, and reports the
//! chunks that could not be embedded at all.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::chunker::Chunk;
use crate::errors::ForgeError;

// ============================================================================
// EmbeddingBackend Trait
// ============================================================================

/// Trait for embedding backends.
pub trait EmbeddingBackend: Send + Sync + fmt::Debug {
    /// Get the model ID this backend uses.
    fn model_id(&self) -> &str;

    /// Get the embedding dimension.
    fn dimension(&self) -> Result<usize, ForgeError>;

    /// Embed a batch of text inputs, one vector per input in input order.
    fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ForgeError>;

    /// Embed a single text input.
    fn embed(&self, input: &str) -> Result<Vec<f32>, ForgeError> {
        let results = self.embed_batch(&[input.to_string()])?;
        results.into_iter().next().ok_or_else(|| ForgeError::Retrieval {
            model_id: self.model_id().to_string(),
            reason: "embed_batch returned empty results".to_string(),
        })
    }
}

// ============================================================================
// Batch results
// ============================================================================

/// A chunk that could not be embedded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedChunk {
    /// Sequence index of the chunk.
    pub sequence_index: usize,
    /// Chunk id.
    pub chunk_id: String,
    /// Why embedding failed.
    pub reason: String,
}

/// Result of embedding a set of chunks.
#[derive(Debug, Default)]
pub struct EmbeddedChunks {
    /// `(sequence_index, vector)` for every chunk that embedded.
    pub vectors: Vec<(usize, Vec<f32>)>,
    /// Chunks that were skipped.
    pub skipped: Vec<SkippedChunk>,
}

// ============================================================================
// EmbeddingGateway
// ============================================================================

/// Turns text into vectors through a pluggable backend.
#[derive(Debug, Clone)]
pub struct EmbeddingGateway {
    backend: Arc<dyn EmbeddingBackend>,
    batch_size: usize,
}

impl EmbeddingGateway {
    /// Create a gateway.
    pub fn new(backend: Arc<dyn EmbeddingBackend>, batch_size: usize) -> Self {
        Self {
            backend,
            batch_size: batch_size.max(1),
        }
    }

    /// Model identity of the backend.
    pub fn model_id(&self) -> &str {
        self.backend.model_id()
    }

    /// Current output dimension.
    pub fn dimension(&self) -> Result<usize, ForgeError> {
        self.backend.dimension()
    }

    /// Embed a query string.
    pub fn embed_query(&self, text: &str) -> Result<Vec<f32>, ForgeError> {
        self.backend.embed(text)
    }

    /// Embed chunks in batches.
    ///
    /// A failed batch is retried one chunk at a time; chunks that still fail
    /// are returned in [`EmbeddedChunks::skipped`]. Vectors whose length is
    /// not `dimension` are treated as failures.
    pub fn embed_chunks(&self, chunks: &[Chunk], dimension: usize) -> EmbeddedChunks {
        let mut out = EmbeddedChunks::default();

        for (batch_idx, batch) in chunks.chunks(self.batch_size).enumerate() {
            let inputs: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            debug!(
                batch = batch_idx,
                size = inputs.len(),
                model = self.model_id(),
                "Embedding batch"
            );

            match self.backend.embed_batch(&inputs) {
                Ok(vectors)
                    if vectors.len() == batch.len() && vectors.iter().all(|v| v.len() == dimension) =>
                {
                    out.vectors
                        .extend(batch.iter().map(|c| c.sequence_index).zip(vectors));
                }
                Ok(vectors) => {
                    warn!(
                        batch = batch_idx,
                        returned = vectors.len(),
                        expected = batch.len(),
                        "Embedding batch returned unusable vectors, retrying per chunk"
                    );
                    self.embed_individually(batch, dimension, &mut out);
                }
                Err(e) => {
                    warn!(batch = batch_idx, error = %e, "Embedding batch failed, retrying per chunk");
                    self.embed_individually(batch, dimension, &mut out);
                }
            }
        }

        out
    }

    fn embed_individually(&self, batch: &[Chunk], dimension: usize, out: &mut EmbeddedChunks) {
        for chunk in batch {
            let result = self.backend.embed(&chunk.text).and_then(|v| {
                if v.len() == dimension {
                    Ok(v)
                } else {
                    Err(ForgeError::Retrieval {
                        model_id: self.model_id().to_string(),
                        reason: format!("expected {} dimensions, got {}", dimension, v.len()),
                    })
                }
            });

            match result {
                Ok(vector) => out.vectors.push((chunk.sequence_index, vector)),
                Err(e) => {
                    warn!(chunk = %chunk.id, error = %e, "Skipping chunk that failed to embed");
                    out.skipped.push(SkippedChunk {
                        sequence_index: chunk.sequence_index,
                        chunk_id: chunk.id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::Chunker;
    use crate::test_support::HashEmbedder;

    #[test]
    fn test_embed_chunks_in_batches() {
        let embedder = Arc::new(HashEmbedder::new(16));
        let gateway = EmbeddingGateway::new(embedder.clone(), 2);
        let chunks = Chunker::new(4, 1).unwrap().split("a.txt", "天地玄黄宇宙洪荒日月盈昃", 0);

        let out = gateway.embed_chunks(&chunks, 16);
        assert_eq!(out.vectors.len(), chunks.len());
        assert!(out.skipped.is_empty());
        assert_eq!(embedder.batch_calls(), chunks.len().div_ceil(2));
        let seqs: Vec<usize> = out.vectors.iter().map(|(s, _)| *s).collect();
        assert_eq!(seqs, (0..chunks.len()).collect::<Vec<_>>());
    }

    #[test]
    fn test_failed_batch_degrades_to_single_chunks() {
        let embedder = Arc::new(HashEmbedder::new(8).failing_on("毒"));
        let gateway = EmbeddingGateway::new(embedder, 4);
        let chunks = Chunker::new(3, 1).unwrap().split("a.txt", "山川毒草木石", 0);

        let out = gateway.embed_chunks(&chunks, 8);
        assert_eq!(out.vectors.len() + out.skipped.len(), chunks.len());
        assert!(!out.skipped.is_empty());
        assert!(out
            .skipped
            .iter()
            .all(|s| chunks[s.sequence_index].text.contains('毒')));
    }

    #[test]
    fn test_wrong_dimension_is_skipped() {
        let gateway = EmbeddingGateway::new(Arc::new(HashEmbedder::new(8)), 8);
        let chunks = Chunker::new(3, 1).unwrap().split("a.txt", "山川草木", 0);
        let out = gateway.embed_chunks(&chunks, 4);
        assert!(out.vectors.is_empty());
        assert_eq!(out.skipped.len(), chunks.len());
    }
}
