//! # forge-db
//!
//! Storage layer for NovelForge - vector search and cache descriptors.
//!
//! This crate keeps persistence details out of `forge-core`:
//!
//! - Vector storage backends can be swapped without changing domain logic
//! - Testing is easier with an exact, deterministic index
//!
//! ## Architecture
//!
//! ```text
//! forge-cli → forge-core → (traits)
//!                ↑
//!             forge-db (vector index + descriptor persistence)
//!             forge-model (generation, embeddings, reranking)
//! ```
//!
//! ## Modules
//!
//! - `vector`: flat vector index and [`IndexDescriptor`](vector::IndexDescriptor)

pub mod error;
pub mod vector;

pub use error::{DbError, DbResult};

use std::io;
use std::path::Path;

/// Write `bytes` to `path` through a temporary sibling file and a rename.
///
/// Readers see either the previous content or the new content, never a
/// partial write. Missing parent directories are created.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "data".to_string());
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}
