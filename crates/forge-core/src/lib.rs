//! # forge-core
//!
//! **NovelForge** – reference knowledge engine and generation orchestrator.
//!
//! This crate provides the domain logic for turning reference texts into a
//! queryable knowledge base and for driving resumable, chapter-by-chapter
//! novel generation. It is consumed by the `novelforge` CLI.
//!
//! ## Main Types
//!
//! - [`ForgeEngine`] – entry point wiring configuration, store, models and knowledge base
//! - [`KnowledgeBase`] – build / query / invalidate over a reference corpus
//! - [`ModelGateway`] – retry, backoff and primary/fallback switching
//! - [`GenerationOrchestrator`] – the per-chapter state machine
//! - [`ForgeError`] – domain-specific error type
//!
//! ## Modules
//!
//! - [`config`] – `novelforge.yaml` configuration
//! - [`chunker`], [`embedding`], [`knowledge`], [`vector_index`] – the knowledge engine
//! - [`gateway`], [`prompts`], [`validator`], [`finalizer`], [`orchestrator`] – generation
//! - [`outline`], [`store`] – persisted project state
//!
//! ## Example
//!
//! ```ignore
//! use forge_core::ForgeEngine;
//! use std::path::Path;
//!
//! let engine = ForgeEngine::open(Path::new("my-novel"), None)?;
//! engine.kb_build(false)?;
//! let report = engine.auto(None)?;
//! println!("written: {:?}, failed: {}", report.succeeded, report.failed.len());
//! ```

// Modules
pub mod chunker;
pub mod config;
pub mod db_adapter;
pub mod embedding;
pub mod engine;
pub mod errors;
pub mod finalizer;
pub mod gateway;
pub mod knowledge;
pub mod model_adapter;
pub mod orchestrator;
pub mod outline;
pub mod prompts;
pub mod reranker;
pub mod store;
pub mod validator;
pub mod vector_index;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports for convenience
pub use chunker::{Chunk, Chunker};
pub use config::{
    BackoffKind, ForgeConfig, GenerationConfig, KnowledgeConfig, ModelsConfig, NovelConfig,
    OutputConfig, RetryOverride, RoleModelConfig, ValidationConfig, CONFIG_ENV_VAR, CONFIG_FILENAME,
};
pub use embedding::{EmbeddedChunks, EmbeddingBackend, EmbeddingGateway, SkippedChunk};
pub use engine::{ForgeEngine, InitResult, REFERENCES_DIR};
pub use errors::ForgeError;
pub use finalizer::{clean_summary, Finalizer};
pub use gateway::{
    Backoff, FailureChain, FailureRecord, FallbackModel, GenerationOutcome, GenerationRole,
    ModelGateway, ModelProfile, RetryPolicy, Sleeper, ThreadSleeper,
};
pub use knowledge::{BuildResult, Corpus, Document, KnowledgeBase, ScoredChunk};
pub use orchestrator::{
    project_status, ChapterFailure, ChapterState, ChapterStatus, GenerationOrchestrator,
    ProjectStatus, RunReport,
};
pub use outline::{parse_outline_response, OutlineBook, OutlineEntry};
pub use reranker::RerankerBackend;
pub use store::{
    ChapterRecord, FileProjectStore, MemoryProjectStore, ProgressState, ProjectStore,
    CONFIG_SNAPSHOT_FILENAME, OUTLINE_FILENAME, PROGRESS_FILENAME, SUMMARY_FILENAME,
};
pub use validator::{
    ConsistencyValidator, SkippedCheck, ValidationInput, ValidationReport, Violation, ViolationKind,
};
pub use vector_index::{check_index_compatibility, IndexCompatibility, IndexExpectation};

// forge-db adapter - for bridging the storage layer
pub use db_adapter::{from_db_error, IntoForgeDbResult};

// forge-model adapter - for bridging the inference layer
pub use model_adapter::{from_model_error, IntoForgeResult, ModelEmbeddingBackend, ModelRerankerBackend};
