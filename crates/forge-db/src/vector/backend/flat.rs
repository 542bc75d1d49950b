//! Flat (exact) vector index backend.
//!
//! Vectors are kept in memory and searched by exhaustive scan. On flush the
//! whole set is written to `vectors.bin` with bincode. Reference corpora are a
//! few thousand chunks, well inside what a linear scan handles.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, trace};

use super::super::traits::{
    VectorId, VectorIndexBackend, VectorInsert, VectorMetric, VectorSearchResult,
};
use crate::error::{DbError, DbResult};

/// Filename for the bincode data file.
pub const VECTORS_FILENAME: &str = "vectors.bin";

/// On-disk layout of `vectors.bin`.
#[derive(Debug, Serialize, Deserialize)]
struct StoredVectors {
    dimension: usize,
    metric: VectorMetric,
    entries: Vec<(u64, Vec<f32>)>,
}

/// Exact in-memory vector index with file persistence.
pub struct FlatVectorIndex {
    /// Path to the index directory.
    path: PathBuf,

    /// Dimension of vectors.
    dimension: usize,

    /// Similarity metric.
    metric: VectorMetric,

    /// Vectors keyed by id; the map order doubles as the tie-break order.
    vectors: RwLock<BTreeMap<u64, Vec<f32>>>,
}

impl std::fmt::Debug for FlatVectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlatVectorIndex")
            .field("path", &self.path)
            .field("dimension", &self.dimension)
            .field("metric", &self.metric)
            .finish_non_exhaustive()
    }
}

impl FlatVectorIndex {
    /// Create an empty index rooted at `path`. Nothing is written until [`flush`](VectorIndexBackend::flush).
    pub fn create(path: impl Into<PathBuf>, dimension: usize, metric: VectorMetric) -> Self {
        Self {
            path: path.into(),
            dimension,
            metric,
            vectors: RwLock::new(BTreeMap::new()),
        }
    }

    /// Open a persisted index.
    ///
    /// # Errors
    ///
    /// - [`DbError::IndexNotFound`] when `vectors.bin` does not exist.
    /// - [`DbError::VectorParse`] when the file cannot be decoded.
    pub fn open(path: impl Into<PathBuf>) -> DbResult<Self> {
        let path = path.into();
        let data_path = path.join(VECTORS_FILENAME);
        if !data_path.exists() {
            return Err(DbError::IndexNotFound { path: data_path });
        }
        debug!("Opening FlatVectorIndex at {:?}", path);

        let bytes = fs::read(&data_path).map_err(|e| DbError::vector_io(&data_path, e.to_string()))?;
        let (stored, _): (StoredVectors, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                .map_err(|e| DbError::vector_parse(&data_path, e.to_string()))?;

        let mut vectors = BTreeMap::new();
        for (id, vector) in stored.entries {
            if vector.len() != stored.dimension {
                return Err(DbError::vector_parse(
                    &data_path,
                    format!(
                        "vector {} has length {}, header says {}",
                        id,
                        vector.len(),
                        stored.dimension
                    ),
                ));
            }
            vectors.insert(id, vector);
        }

        debug!("Loaded {} vectors", vectors.len());
        Ok(Self {
            path,
            dimension: stored.dimension,
            metric: stored.metric,
            vectors: RwLock::new(vectors),
        })
    }

    /// Directory this index persists into.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_lock(&self) -> DbResult<std::sync::RwLockReadGuard<'_, BTreeMap<u64, Vec<f32>>>> {
        self.vectors
            .read()
            .map_err(|e| DbError::internal(format!("Failed to acquire read lock: {}", e)))
    }

    fn write_lock(&self) -> DbResult<std::sync::RwLockWriteGuard<'_, BTreeMap<u64, Vec<f32>>>> {
        self.vectors
            .write()
            .map_err(|e| DbError::internal(format!("Failed to acquire write lock: {}", e)))
    }

    /// Save all vectors to `vectors.bin`.
    fn save_to_file(&self) -> DbResult<()> {
        let data_path = self.path.join(VECTORS_FILENAME);
        debug!("Saving vectors to {:?}", data_path);

        let vectors = self.read_lock()?;
        let stored = StoredVectors {
            dimension: self.dimension,
            metric: self.metric,
            entries: vectors.iter().map(|(id, v)| (*id, v.clone())).collect(),
        };
        let bytes = bincode::serde::encode_to_vec(&stored, bincode::config::standard())
            .map_err(|e| DbError::vector_io(&data_path, e.to_string()))?;
        crate::write_atomic(&data_path, &bytes)
            .map_err(|e| DbError::vector_io(&data_path, e.to_string()))?;

        debug!("Saved {} vectors", vectors.len());
        Ok(())
    }
}

impl VectorIndexBackend for FlatVectorIndex {
    fn query(&self, embedding: &[f32], limit: usize) -> DbResult<Vec<VectorSearchResult>> {
        trace!("Querying FlatVectorIndex, limit={}", limit);

        if embedding.len() != self.dimension {
            return Err(DbError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let vectors = self.read_lock()?;
        let metric = self.metric;
        let mut scored: Vec<(u64, f32)> = vectors
            .par_iter()
            .map(|(id, v)| (*id, metric.score(embedding, v)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        let results: Vec<VectorSearchResult> = scored
            .into_iter()
            .take(limit)
            .map(|(id, score)| VectorSearchResult::new(VectorId::new(id), score))
            .collect();

        trace!("Found {} results", results.len());
        Ok(results)
    }

    fn upsert(&self, vectors: &[VectorInsert]) -> DbResult<()> {
        debug!("Upserting {} vectors", vectors.len());

        let mut stored = self.write_lock()?;
        for insert in vectors {
            if insert.vector.len() != self.dimension {
                return Err(DbError::DimensionMismatch {
                    expected: self.dimension,
                    actual: insert.vector.len(),
                });
            }
            stored.insert(insert.id.value(), insert.vector.clone());
        }
        Ok(())
    }

    fn flush(&self) -> DbResult<()> {
        self.save_to_file()
    }

    fn len(&self) -> DbResult<usize> {
        Ok(self.read_lock()?.len())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> VectorMetric {
        self.metric
    }
}

// ============================================================================
// Tests
// ============================================================================
