//! Vector index module for forge-db.
//!
//! This module provides the vector storage used by the reference knowledge base.
//!
//! ## Usage
//!
//! ```ignore
//! use forge_db::vector::{create_vector_index, VectorInsert, VectorMetric};
//!
//! let index = create_vector_index(&dir, 1024, VectorMetric::Cosine);
//! index.upsert(&inserts)?;
//! index.flush()?;
//!
//! let results = index.query(&embedding, 10)?;
//! ```

mod backend;
mod descriptor;
mod traits;

pub use descriptor::{
    descriptor_path, load_descriptor, write_descriptor, IndexDescriptor, DESCRIPTOR_FILENAME,
    DESCRIPTOR_SCHEMA_VERSION,
};
pub use traits::{
    cosine_similarity, dot_product, euclidean_distance, VectorId, VectorIndexBackend,
    VectorInsert, VectorMetric, VectorSearchResult,
};

pub use backend::{
    create_vector_index, open_vector_index, vector_index_exists, FlatVectorIndex,
    VECTORS_FILENAME,
};
