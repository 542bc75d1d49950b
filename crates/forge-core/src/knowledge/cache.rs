//! On-disk layout of a knowledge base cache.
//!
//! ```text
//! <cache_dir>/kb_<fingerprint>/
//!   descriptor.json   written last; its presence marks a complete build
//!   chunks.jsonl      one Chunk per line, in sequence order
//!   vectors.bin       forge-db flat index
//! ```

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::chunker::Chunk;
use crate::errors::ForgeError;

/// Chunk records filename.
pub const CHUNKS_FILENAME: &str = "chunks.jsonl";

/// Prefix of per-configuration cache directories.
pub const CACHE_DIR_PREFIX: &str = "kb_";

/// Fingerprint of the settings that shape a cache: embedding model and chunking.
pub fn cache_fingerprint(model_id: &str, chunk_size: usize, chunk_overlap: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model_id.as_bytes());
    hasher.update(format!("|{}|{}", chunk_size, chunk_overlap).as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..16].to_string()
}

/// Cache directory for a fingerprint under `cache_root`.
pub fn cache_dir_for(cache_root: &Path, fingerprint: &str) -> PathBuf {
    cache_root.join(format!("{}{}", CACHE_DIR_PREFIX, fingerprint))
}

/// Write chunks as JSON lines.
pub fn write_chunks(dir: &Path, chunks: &[Chunk]) -> Result<(), ForgeError> {
    let path = dir.join(CHUNKS_FILENAME);
    let mut buf = Vec::new();
    for chunk in chunks {
        serde_json::to_writer(&mut buf, chunk)?;
        buf.push(b'\n');
    }
    forge_db::write_atomic(&path, &buf).map_err(|e| ForgeError::kb_cache_io(&path, e.to_string()))?;
    debug!(count = chunks.len(), "Wrote chunk records to {:?}", path);
    Ok(())
}

/// Read chunks written by [`write_chunks`], sorted by sequence index.
pub fn load_chunks(dir: &Path) -> Result<Vec<Chunk>, ForgeError> {
    let path = dir.join(CHUNKS_FILENAME);
    let file = fs::File::open(&path).map_err(|e| ForgeError::kb_cache_io(&path, e.to_string()))?;

    let mut chunks = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| ForgeError::kb_cache_io(&path, e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let chunk: Chunk = serde_json::from_str(&line).map_err(|e| ForgeError::KbCacheParse {
            path: path.clone(),
            message: format!("line {}: {}", line_no + 1, e),
        })?;
        chunks.push(chunk);
    }
    chunks.sort_by_key(|c| c.sequence_index);
    Ok(chunks)
}

/// Delete a cache directory. Returns whether anything was removed.
pub fn remove_cache(dir: &Path) -> Result<bool, ForgeError> {
    if !dir.exists() {
        return Ok(false);
    }
    fs::remove_dir_all(dir).map_err(|e| ForgeError::kb_cache_io(dir, e.to_string()))?;
    debug!("Removed knowledge base cache {:?}", dir);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::Chunker;
    use tempfile::TempDir;

    #[test]
    fn test_fingerprint_varies_with_settings() {
        let a = cache_fingerprint("m1", 1000, 200);
        assert_eq!(a.len(), 16);
        assert_eq!(a, cache_fingerprint("m1", 1000, 200));
        assert_ne!(a, cache_fingerprint("m2", 1000, 200));
        assert_ne!(a, cache_fingerprint("m1", 500, 200));
    }

    #[test]
    fn test_chunks_round_trip_in_sequence_order() {
        let dir = TempDir::new().unwrap();
        let mut chunks = Chunker::new(3, 1).unwrap().split("a.txt", "一二三四五六七", 0);
        chunks.reverse();
        write_chunks(dir.path(), &chunks).unwrap();

        let loaded = load_chunks(dir.path()).unwrap();
        assert_eq!(loaded.len(), chunks.len());
        assert!(loaded.windows(2).all(|w| w[0].sequence_index < w[1].sequence_index));
    }

    #[test]
    fn test_bad_line_reports_line_number() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CHUNKS_FILENAME), "not json\n").unwrap();
        let err = load_chunks(dir.path()).unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_remove_cache() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("kb_x");
        fs::create_dir_all(&cache).unwrap();
        assert!(remove_cache(&cache).unwrap());
        assert!(!remove_cache(&cache).unwrap());
    }
}
