//! Index descriptor persistence.
//!
//! A descriptor is stored as `descriptor.json` next to the vectors it
//! describes. It records what the vectors were built from so a later run can
//! decide whether the cache is still valid.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::traits::VectorMetric;
use crate::error::{DbError, DbResult};

// ============================================================================
// Constants
// ============================================================================

/// Filename for the index descriptor.
pub const DESCRIPTOR_FILENAME: &str = "descriptor.json";

/// Current descriptor schema version.
pub const DESCRIPTOR_SCHEMA_VERSION: u32 = 1;

// ============================================================================
// IndexDescriptor
// ============================================================================

/// Metadata for a persisted vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDescriptor {
    /// Dimension of every stored vector.
    pub dimension: usize,

    /// Hash of the corpus the index was built from.
    pub source_content_hash: String,

    /// When the index was built.
    pub build_timestamp: DateTime<Utc>,

    /// Embedding model that produced the vectors.
    #[serde(default)]
    pub embedding_model_id: String,

    /// Chunk size in characters.
    #[serde(default)]
    pub chunk_size: usize,

    /// Chunk overlap in characters.
    #[serde(default)]
    pub chunk_overlap: usize,

    /// Number of chunks with a stored vector.
    #[serde(default)]
    pub chunk_count: usize,

    /// Similarity metric.
    #[serde(default)]
    pub metric: VectorMetric,

    /// Schema version for future migrations.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
}

fn default_schema_version() -> u32 {
    DESCRIPTOR_SCHEMA_VERSION
}

impl IndexDescriptor {
    /// Create a descriptor stamped with the current time.
    pub fn new(dimension: usize, source_content_hash: impl Into<String>) -> Self {
        Self {
            dimension,
            source_content_hash: source_content_hash.into(),
            build_timestamp: Utc::now(),
            embedding_model_id: String::new(),
            chunk_size: 0,
            chunk_overlap: 0,
            chunk_count: 0,
            metric: VectorMetric::Cosine,
            schema_version: DESCRIPTOR_SCHEMA_VERSION,
        }
    }

    /// Set the embedding model id.
    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.embedding_model_id = model_id.into();
        self
    }

    /// Set the chunking parameters.
    pub fn with_chunking(mut self, chunk_size: usize, chunk_overlap: usize) -> Self {
        self.chunk_size = chunk_size;
        self.chunk_overlap = chunk_overlap;
        self
    }

    /// Set the chunk count.
    pub fn with_chunk_count(mut self, chunk_count: usize) -> Self {
        self.chunk_count = chunk_count;
        self
    }

    /// Set the metric.
    pub fn with_metric(mut self, metric: VectorMetric) -> Self {
        self.metric = metric;
        self
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Path of the descriptor file inside an index directory.
pub fn descriptor_path(dir: &Path) -> PathBuf {
    dir.join(DESCRIPTOR_FILENAME)
}

/// Load a descriptor from an index directory.
///
/// Returns `Ok(None)` when no descriptor exists.
pub fn load_descriptor(dir: &Path) -> DbResult<Option<IndexDescriptor>> {
    let path = descriptor_path(dir);
    if !path.exists() {
        return Ok(None);
    }
    debug!("Loading index descriptor from {:?}", path);

    let content = fs::read_to_string(&path)
        .map_err(|e| DbError::descriptor(&path, format!("Failed to read descriptor: {}", e)))?;

    let descriptor: IndexDescriptor = serde_json::from_str(&content)
        .map_err(|e| DbError::descriptor(&path, format!("Failed to parse descriptor: {}", e)))?;

    Ok(Some(descriptor))
}

/// Write a descriptor into an index directory, creating it if needed.
pub fn write_descriptor(dir: &Path, descriptor: &IndexDescriptor) -> DbResult<()> {
    let path = descriptor_path(dir);
    debug!("Writing index descriptor to {:?}", path);

    let content = serde_json::to_vec_pretty(descriptor)?;
    crate::write_atomic(&path, &content)
        .map_err(|e| DbError::descriptor(&path, format!("Failed to write descriptor: {}", e)))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_descriptor_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(load_descriptor(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_write_then_load() {
        let dir = TempDir::new().unwrap();
        let index_dir = dir.path().join("kb_abc");
        let descriptor = IndexDescriptor::new(1024, "deadbeef")
            .with_model("Qwen/Qwen3-Embedding-0.6B")
            .with_chunking(1000, 200)
            .with_chunk_count(42);

        write_descriptor(&index_dir, &descriptor).unwrap();
        let loaded = load_descriptor(&index_dir).unwrap().unwrap();
        assert_eq!(loaded, descriptor);

        let raw = fs::read_to_string(descriptor_path(&index_dir)).unwrap();
        assert!(raw.contains("\"sourceContentHash\": \"deadbeef\""));
    }

    #[test]
    fn test_corrupt_descriptor_is_an_error() {
        let dir = TempDir::new().unwrap();
        fs::write(descriptor_path(dir.path()), "{ not json").unwrap();
        let err = load_descriptor(dir.path()).unwrap_err();
        assert!(matches!(err, DbError::Descriptor { .. }));
    }
}
