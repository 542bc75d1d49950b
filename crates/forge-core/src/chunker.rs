//! Character-window chunking of reference text.

use serde::{Deserialize, Serialize};

use crate::errors::ForgeError;

/// A bounded slice of one reference document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// Stable identifier: `<source_file>#<sequence_index>`.
    pub id: String,
    /// Document the chunk was cut from.
    pub source_file: String,
    /// Chunk text.
    pub text: String,
    /// Position in the whole corpus, starting at 0.
    pub sequence_index: usize,
    /// Character offset inside `source_file`.
    pub char_offset: usize,
}

/// Splits text into overlapping windows of characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    /// Create a chunker.
    ///
    /// # Errors
    ///
    /// Both values must be positive and `chunk_overlap < chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ForgeError> {
        if chunk_size == 0 || chunk_overlap == 0 || chunk_overlap >= chunk_size {
            return Err(ForgeError::invalid_config(
                format!(
                    "chunk size {} / overlap {} is invalid",
                    chunk_size, chunk_overlap
                ),
                "Both must be > 0 and overlap must be smaller than size",
            ));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    /// Characters per chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Characters shared by neighbours.
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Distance between consecutive window starts.
    pub fn stride(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }

    /// Number of chunks a text of `char_len` characters yields.
    pub fn expected_chunks(&self, char_len: usize) -> usize {
        if char_len == 0 {
            0
        } else if char_len <= self.chunk_size {
            1
        } else {
            1 + (char_len - self.chunk_size).div_ceil(self.stride())
        }
    }

    /// Split one document.
    ///
    /// Sequence numbers start at `first_sequence`. Whitespace-only text yields
    /// no chunks.
    pub fn split(&self, source_file: &str, text: &str, first_sequence: usize) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = text.chars().collect();
        let stride = self.stride();
        let mut chunks = Vec::with_capacity(self.expected_chunks(chars.len()));
        let mut start = 0;

        loop {
            let end = (start + self.chunk_size).min(chars.len());
            let sequence_index = first_sequence + chunks.len();
            chunks.push(Chunk {
                id: format!("{}#{}", source_file, sequence_index),
                source_file: source_file.to_string(),
                text: chars[start..end].iter().collect(),
                sequence_index,
                char_offset: start,
            });
            if end == chars.len() {
                break;
            }
            start += stride;
        }

        chunks
    }

    /// Split every document of a corpus, numbering chunks across documents.
    pub fn split_all<'a, I>(&self, documents: I) -> Vec<Chunk>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut chunks = Vec::new();
        for (name, text) in documents {
            let next = chunks.len();
            chunks.extend(self.split(name, text, next));
        }
        chunks
    }
}
