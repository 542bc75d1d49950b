//! Knowledge base cache compatibility.
//!
//! This module provides:
//! - [`IndexExpectation`] - what the active configuration requires of a cached index
//! - [`IndexCompatibility`] - result of comparing the expectation with a stored descriptor
//! - [`check_index_compatibility`] - the comparison itself
//!
//! The vector storage lives in `forge-db`; this module only decides whether a
//! persisted cache may be reused.

use std::path::Path;

use forge_db::vector::{load_descriptor, IndexDescriptor, DESCRIPTOR_SCHEMA_VERSION};

// ============================================================================
// IndexExpectation
// ============================================================================

/// Properties a cached index must have to be reused.
#[derive(Debug, Clone, Copy)]
pub struct IndexExpectation<'a> {
    /// SHA-256 of the corpus, if a corpus is at hand.
    pub source_content_hash: Option<&'a str>,
    /// Output dimension of the active embedding model.
    pub dimension: usize,
    /// Chunk size in characters.
    pub chunk_size: usize,
    /// Chunk overlap in characters.
    pub chunk_overlap: usize,
}

// ============================================================================
// IndexCompatibility
// ============================================================================

/// Result of checking a persisted index against the active configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexCompatibility {
    /// The index can be loaded as-is.
    Compatible,

    /// No descriptor exists (index not built yet, or invalidated).
    NotFound,

    /// The descriptor exists but cannot be read.
    Corrupted {
        /// Description of the problem.
        message: String,
    },

    /// The corpus changed since the index was built.
    SourceChanged,

    /// Chunking parameters differ from the ones the index was built with.
    ChunkingChanged {
        /// `(chunk_size, chunk_overlap)` stored in the descriptor.
        stored: (usize, usize),
        /// `(chunk_size, chunk_overlap)` in the active configuration.
        expected: (usize, usize),
    },

    /// The active embedding model produces vectors of a different size.
    DimensionMismatch {
        /// Dimension stored in the descriptor.
        stored: usize,
        /// Dimension of the active embedding model.
        expected: usize,
    },
}

impl IndexCompatibility {
    /// Check if the index is compatible.
    pub fn is_compatible(&self) -> bool {
        matches!(self, Self::Compatible)
    }

    /// Short reason used in log lines.
    pub fn describe(&self) -> String {
        match self {
            Self::Compatible => "compatible".to_string(),
            Self::NotFound => "no cached index".to_string(),
            Self::Corrupted { message } => format!("cache descriptor unreadable: {}", message),
            Self::SourceChanged => "reference corpus changed".to_string(),
            Self::ChunkingChanged { stored, expected } => format!(
                "chunking changed from {}/{} to {}/{}",
                stored.0, stored.1, expected.0, expected.1
            ),
            Self::DimensionMismatch { stored, expected } => format!(
                "index dimension is {}, embedding model produces {}",
                stored, expected
            ),
        }
    }
}

/// Compare a stored descriptor with the expectation.
///
/// Dimension is checked first: a dimension change makes every stored vector
/// unusable regardless of the corpus.
pub fn compare_descriptor(
    descriptor: &IndexDescriptor,
    expected: &IndexExpectation<'_>,
) -> IndexCompatibility {
    if descriptor.dimension != expected.dimension {
        return IndexCompatibility::DimensionMismatch {
            stored: descriptor.dimension,
            expected: expected.dimension,
        };
    }

    if descriptor.chunk_size != expected.chunk_size
        || descriptor.chunk_overlap != expected.chunk_overlap
    {
        return IndexCompatibility::ChunkingChanged {
            stored: (descriptor.chunk_size, descriptor.chunk_overlap),
            expected: (expected.chunk_size, expected.chunk_overlap),
        };
    }

    if let Some(hash) = expected.source_content_hash {
        if descriptor.source_content_hash != hash {
            return IndexCompatibility::SourceChanged;
        }
    }

    if descriptor.schema_version != DESCRIPTOR_SCHEMA_VERSION {
        return IndexCompatibility::Corrupted {
            message: format!("unsupported schema version {}", descriptor.schema_version),
        };
    }

    IndexCompatibility::Compatible
}

/// Load the descriptor in `dir` and compare it with the expectation.
pub fn check_index_compatibility(dir: &Path, expected: &IndexExpectation<'_>) -> IndexCompatibility {
    match load_descriptor(dir) {
        Ok(Some(descriptor)) => compare_descriptor(&descriptor, expected),
        Ok(None) => IndexCompatibility::NotFound,
        Err(e) => IndexCompatibility::Corrupted {
            message: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_db::vector::write_descriptor;
    use tempfile::tempdir;

    fn expectation(hash: Option<&str>, dimension: usize) -> IndexExpectation<'_> {
        IndexExpectation {
            source_content_hash: hash,
            dimension,
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }

    fn descriptor(dimension: usize) -> IndexDescriptor {
        IndexDescriptor::new(dimension, "abc").with_chunking(1000, 200)
    }

    #[test]
    fn test_matching_descriptor_is_compatible() {
        let result = compare_descriptor(&descriptor(8), &expectation(Some("abc"), 8));
        assert!(result.is_compatible());
    }

    #[test]
    fn test_without_hash_only_shape_is_checked() {
        let result = compare_descriptor(&descriptor(8), &expectation(None, 8));
        assert!(result.is_compatible());
    }

    #[test]
    fn test_dimension_checked_before_hash() {
        let result = compare_descriptor(&descriptor(8), &expectation(Some("other"), 16));
        assert_eq!(
            result,
            IndexCompatibility::DimensionMismatch {
                stored: 8,
                expected: 16
            }
        );
    }

    #[test]
    fn test_source_change_detected() {
        let result = compare_descriptor(&descriptor(8), &expectation(Some("other"), 8));
        assert_eq!(result, IndexCompatibility::SourceChanged);
    }

    #[test]
    fn test_chunking_change_detected() {
        let d = IndexDescriptor::new(8, "abc").with_chunking(500, 100);
        let result = compare_descriptor(&d, &expectation(Some("abc"), 8));
        assert!(matches!(result, IndexCompatibility::ChunkingChanged { .. }));
        assert!(result.describe().contains("500/100"));
    }

    #[test]
    fn test_check_on_disk() {
        let dir = tempdir().unwrap();
        assert_eq!(
            check_index_compatibility(dir.path(), &expectation(None, 8)),
            IndexCompatibility::NotFound
        );

        write_descriptor(dir.path(), &descriptor(8)).unwrap();
        assert!(check_index_compatibility(dir.path(), &expectation(Some("abc"), 8)).is_compatible());

        std::fs::write(forge_db::vector::descriptor_path(dir.path()), "{ nope").unwrap();
        assert!(matches!(
            check_index_compatibility(dir.path(), &expectation(None, 8)),
            IndexCompatibility::Corrupted { .. }
        ));
    }
}
