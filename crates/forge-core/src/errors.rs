//! Error types for forge-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::gateway::FailureChain;

/// Domain-specific errors for NovelForge operations.
#[derive(Error, Debug)]
pub enum ForgeError {
    // =========================================================================
    // Knowledge Base Errors
    // =========================================================================
    /// The reference corpus has no usable text.
    #[error("Reference corpus is empty. Add referenceFiles or a referenceDir with .txt files to novelforge.yaml.")]
    EmptyCorpus,

    /// Building the knowledge base failed.
    #[error("Knowledge base build failed: {reason}")]
    Build {
        /// Description of the failure.
        reason: String,
    },

    /// The persisted index does not match the active embedding model and no
    /// corpus is available to rebuild it.
    #[error("Knowledge base index is stale: {reason}. Run `novelforge kb build --force`.")]
    StaleIndex {
        /// Why the index cannot be used.
        reason: String,
    },

    /// A configured reference file does not exist.
    #[error("Reference file not found: `{path}`")]
    ReferenceMissing {
        /// The missing file.
        path: PathBuf,
    },

    /// Knowledge base cache I/O error.
    #[error("Knowledge base cache I/O error at `{path}`: {message}")]
    KbCacheIo {
        /// Path to the cache file or directory.
        path: PathBuf,
        /// Description of the I/O error.
        message: String,
    },

    /// Knowledge base cache parse error.
    #[error("Knowledge base cache parse error at `{path}`: {message}")]
    KbCacheParse {
        /// Path to the cache file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// The embedding or reranking provider failed.
    #[error("Retrieval model `{model_id}` failed: {reason}")]
    Retrieval {
        /// The model that failed.
        model_id: String,
        /// Description of the failure.
        reason: String,
    },

    // =========================================================================
    // Generation Errors
    // =========================================================================
    /// Primary and fallback models are both exhausted.
    #[error("Generation failed for role `{role}`: {chain}")]
    Generation {
        /// Role of the failed call (outline, content, review).
        role: String,
        /// Every failed attempt, in order.
        chain: FailureChain,
    },

    /// A chapter kept failing consistency checks past its retry budget.
    #[error("Chapter {chapter} failed validation after {attempts} attempts: {}", .violations.join("; "))]
    ValidationExceeded {
        /// The chapter number.
        chapter: u32,
        /// Number of generation attempts made.
        attempts: u32,
        /// Violations reported by the last attempt.
        violations: Vec<String>,
    },

    /// The outline model response could not be parsed.
    #[error("Outline response could not be parsed: {message}")]
    OutlineParse {
        /// Description of the parse error.
        message: String,
    },

    // =========================================================================
    // Project State Errors
    // =========================================================================
    /// A persisted state file is unreadable or malformed.
    #[error("Corrupt project state at `{path}`: {message}")]
    CorruptState {
        /// The offending file.
        path: PathBuf,
        /// Description of the problem.
        message: String,
    },

    /// Writing project state failed.
    #[error("Project store I/O error at `{path}`: {message}")]
    StoreIo {
        /// The file being written.
        path: PathBuf,
        /// Description of the I/O error.
        message: String,
    },

    /// A chapter has no outline entry.
    #[error("Chapter {chapter} has no outline. Run `novelforge outline` first.")]
    OutlineMissing {
        /// The chapter number.
        chapter: u32,
    },

    /// A chapter has no generated content.
    #[error("Chapter {chapter} has no content. Run `novelforge content` first.")]
    ChapterMissing {
        /// The chapter number.
        chapter: u32,
    },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// A configuration value is invalid.
    #[error("Invalid configuration: {message}. {hint}")]
    InvalidConfig {
        /// Description of the invalid configuration.
        message: String,
        /// Actionable hint on how to fix it.
        hint: String,
    },

    /// Invalid argument provided to a command.
    #[error("{0}")]
    InvalidArgument(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A wrapped generic error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ForgeError {
    /// Create an invalid-configuration error.
    pub fn invalid_config(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
            hint: hint.into(),
        }
    }

    /// Create a build error.
    pub fn build(reason: impl Into<String>) -> Self {
        Self::Build {
            reason: reason.into(),
        }
    }

    /// Create a corrupt-state error.
    pub fn corrupt_state(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::CorruptState {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a store I/O error.
    pub fn store_io(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::StoreIo {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a cache I/O error.
    pub fn kb_cache_io(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::KbCacheIo {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether this error must abort the whole run instead of failing one chapter.
    ///
    /// Missing reference files, corrupt or unwritable project state and bad
    /// configuration cannot be fixed by moving on to the next chapter.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ReferenceMissing { .. }
                | Self::CorruptState { .. }
                | Self::StoreIo { .. }
                | Self::InvalidConfig { .. }
                | Self::EmptyCorpus
                | Self::Io(_)
        )
    }

    /// Short machine-friendly name of the error kind, used in run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyCorpus | Self::Build { .. } => "build",
            Self::StaleIndex { .. } => "stale_index",
            Self::ReferenceMissing { .. } => "reference_missing",
            Self::KbCacheIo { .. } | Self::KbCacheParse { .. } => "kb_cache",
            Self::Retrieval { .. } => "retrieval",
            Self::Generation { .. } => "generation",
            Self::ValidationExceeded { .. } => "validation_exceeded",
            Self::OutlineParse { .. } => "outline_parse",
            Self::CorruptState { .. } => "corrupt_state",
            Self::StoreIo { .. } => "store_io",
            Self::OutlineMissing { .. } => "outline_missing",
            Self::ChapterMissing { .. } => "chapter_missing",
            Self::InvalidConfig { .. } | Self::InvalidArgument(_) => "config",
            Self::Io(_) | Self::Json(_) | Self::Yaml(_) | Self::Other(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(ForgeError::ReferenceMissing {
            path: PathBuf::from("refs/a.txt")
        }
        .is_fatal());
        assert!(ForgeError::corrupt_state("progress.json", "bad json").is_fatal());
        assert!(!ForgeError::ValidationExceeded {
            chapter: 3,
            attempts: 3,
            violations: vec![],
        }
        .is_fatal());
        assert!(!ForgeError::OutlineMissing { chapter: 2 }.is_fatal());
    }

    #[test]
    fn test_validation_exceeded_message() {
        let err = ForgeError::ValidationExceeded {
            chapter: 7,
            attempts: 3,
            violations: vec!["missing character 林渊".into(), "duplicate paragraph".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("Chapter 7"));
        assert!(msg.contains("missing character 林渊; duplicate paragraph"));
        assert_eq!(err.kind(), "validation_exceeded");
    }

    #[test]
    fn test_reference_missing_names_path() {
        let err = ForgeError::ReferenceMissing {
            path: PathBuf::from("refs/world.txt"),
        };
        assert!(err.to_string().contains("refs/world.txt"));
    }
}
