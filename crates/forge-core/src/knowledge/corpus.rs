//! Reference corpus loading and hashing.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::KnowledgeConfig;
use crate::errors::ForgeError;

/// Extension of reference files picked up from a reference directory.
pub const REFERENCE_EXTENSION: &str = "txt";

/// One reference document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Name recorded on the chunks of this document.
    pub source_file: String,
    /// Full text.
    pub text: String,
}

impl Document {
    /// Create a document.
    pub fn new(source_file: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source_file: source_file.into(),
            text: text.into(),
        }
    }
}

/// The reference texts a knowledge base is built from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Corpus {
    documents: Vec<Document>,
}

impl Corpus {
    /// Create a corpus from documents, in the given order.
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents }
    }

    /// Load the corpus configured in `knowledge`.
    ///
    /// Every entry of `reference_files` must exist. Every `*.txt` file under
    /// `reference_dir` is added in path order; files already listed
    /// explicitly are not read twice.
    ///
    /// # Errors
    ///
    /// [`ForgeError::ReferenceMissing`] names the first missing file or directory.
    pub fn load(knowledge: &KnowledgeConfig) -> Result<Self, ForgeError> {
        let mut seen = BTreeSet::new();
        let mut documents = Vec::new();

        for path in &knowledge.reference_files {
            if !path.is_file() {
                return Err(ForgeError::ReferenceMissing { path: path.clone() });
            }
            if seen.insert(path.clone()) {
                documents.push(read_document(path, display_name(path, None))?);
            }
        }

        if let Some(dir) = &knowledge.reference_dir {
            if !dir.is_dir() {
                return Err(ForgeError::ReferenceMissing { path: dir.clone() });
            }
            for path in walk_reference_dir(dir)? {
                if seen.insert(path.clone()) {
                    documents.push(read_document(&path, display_name(&path, Some(dir)))?);
                }
            }
        }

        info!(
            documents = documents.len(),
            "Loaded reference corpus"
        );
        Ok(Self { documents })
    }

    /// Documents in corpus order.
    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    /// Number of documents.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// True when no document has any non-whitespace text.
    pub fn is_empty(&self) -> bool {
        self.documents.iter().all(|d| d.text.trim().is_empty())
    }

    /// Total characters across all documents.
    pub fn char_count(&self) -> usize {
        self.documents.iter().map(|d| d.text.chars().count()).sum()
    }

    /// SHA-256 over every document name and text, hex encoded.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for doc in &self.documents {
            hasher.update(doc.source_file.as_bytes());
            hasher.update([0u8]);
            hasher.update(doc.text.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }

    /// `(source_file, text)` pairs for the chunker.
    pub fn as_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.documents
            .iter()
            .map(|d| (d.source_file.as_str(), d.text.as_str()))
    }
}

fn read_document(path: &Path, source_file: String) -> Result<Document, ForgeError> {
    let bytes = fs::read(path).map_err(|e| {
        ForgeError::build(format!("failed to read reference file {}: {}", path.display(), e))
    })?;
    let text = String::from_utf8_lossy(&bytes).into_owned();
    debug!(file = %source_file, chars = text.chars().count(), "Read reference file");
    Ok(Document::new(source_file, text))
}

fn display_name(path: &Path, base: Option<&Path>) -> String {
    let relative = base.and_then(|b| path.strip_prefix(b).ok());
    match relative {
        Some(rel) => rel.to_string_lossy().replace('\\', "/"),
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string()),
    }
}

fn walk_reference_dir(dir: &Path) -> Result<Vec<PathBuf>, ForgeError> {
    let walker = WalkBuilder::new(dir)
        .hidden(true)
        .git_ignore(false)
        .follow_links(false)
        .build();

    let mut files = Vec::new();
    for result in walker {
        let entry = result.map_err(|e| {
            ForgeError::build(format!("failed to walk {}: {}", dir.display(), e))
        })?;
        let path = entry.path();
        let is_reference = path.is_file()
            && path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(REFERENCE_EXTENSION));
        if is_reference {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}
