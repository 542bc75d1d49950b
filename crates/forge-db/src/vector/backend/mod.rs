//! Vector index backend implementations.
//!
//! ## Available Backends
//!
//! - `flat`: exact in-memory search persisted as a single bincode file

mod flat;

pub use flat::{FlatVectorIndex, VECTORS_FILENAME};

use super::traits::{VectorIndexBackend, VectorMetric};
use crate::error::DbResult;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Open a persisted vector index.
///
/// # Errors
///
/// Returns [`DbError::IndexNotFound`](crate::DbError::IndexNotFound) when no
/// vectors were ever flushed to `path`.
pub fn open_vector_index(path: &Path) -> DbResult<Arc<dyn VectorIndexBackend>> {
    debug!("Opening vector index at {:?}", path);
    Ok(Arc::new(FlatVectorIndex::open(path)?))
}

/// Create an empty vector index that will persist into `path`.
pub fn create_vector_index(
    path: &Path,
    dimension: usize,
    metric: VectorMetric,
) -> Arc<dyn VectorIndexBackend> {
    debug!("Creating vector index at {:?} (dim={}, metric={})", path, dimension, metric);
    Arc::new(FlatVectorIndex::create(path, dimension, metric))
}

/// Whether `path` holds persisted vectors.
pub fn vector_index_exists(path: &Path) -> bool {
    path.join(VECTORS_FILENAME).is_file()
}
