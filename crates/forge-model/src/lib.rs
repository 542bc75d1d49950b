//! # forge-model
//!
//! Model layer for NovelForge: generation, embeddings and reranking.
//!
//! This crate is the **single source of truth** for talking to remote models.
//! It provides:
//!
//! - **Generation models**: chat-style text generation ([`GenerationModel`])
//! - **Embedding models**: dense vectors for semantic search ([`EmbeddingModel`])
//! - **Reranker models**: cross-encoder relevance scoring ([`RerankerModel`])
//! - **Unified config**: [`ModelEndpoint`] / [`EmbeddingConfig`] shared with `forge-core`
//!
//! ## Design Principles
//!
//! 1. **Production-only**: No mock implementations. Test doubles live in consuming crates.
//! 2. **Blocking**: Calls are synchronous; retry policy belongs to the caller.
//! 3. **Classified failures**: every error says whether a retry can help
//!    ([`ModelError::is_transient`]).
//!
//! ## Usage
//!
//! ```ignore
//! use forge_model::{create_generation_model, GenerationParams, ModelEndpoint, ProviderKind};
//!
//! let endpoint = ModelEndpoint::new(ProviderKind::Gemini, "gemini-2.5-flash");
//! let model = create_generation_model(&endpoint)?;
//! let text = model.generate("写一段开场白", &GenerationParams::default())?;
//! ```

pub mod config;
pub mod error;
mod gemini;
mod http;
mod openai;

// Re-export error types
pub use error::{ModelError, ModelResult};

// Re-export config types (canonical source of truth)
pub use config::{EmbeddingConfig, GenerationParams, ModelEndpoint, ProviderKind};

// ============================================================================
// Generation Model Trait
// ============================================================================

/// Trait for text generation models.
///
/// Implementations perform exactly one request per call. An empty answer is
/// reported as [`ModelError::EmptyResponse`], never returned as `Ok("")`.
pub trait GenerationModel: Send + Sync + std::fmt::Debug {
    /// Generate text for a prompt.
    fn generate(&self, prompt: &str, params: &GenerationParams) -> ModelResult<String>;

    /// Provider-side model identifier.
    fn model_id(&self) -> &str;

    /// Provider family.
    fn provider(&self) -> ProviderKind;
}

// ============================================================================
// Embedding Model Trait
// ============================================================================

/// Trait for embedding models (bi-encoders).
pub trait EmbeddingModel: Send + Sync + std::fmt::Debug {
    /// Embed a batch of texts.
    ///
    /// # Returns
    ///
    /// One vector per input, in input order.
    fn embed(&self, texts: &[&str]) -> ModelResult<Vec<Vec<f32>>>;

    /// Embed a batch of owned strings.
    fn embed_batch(&self, texts: &[String]) -> ModelResult<Vec<Vec<f32>>> {
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        self.embed(&refs)
    }

    /// Output dimension. Remote models may need one request to find out.
    fn dimension(&self) -> ModelResult<usize>;

    /// Provider-side model identifier.
    fn model_id(&self) -> &str;
}

// ============================================================================
// Reranker Model Trait
// ============================================================================

/// Trait for reranker models (cross-encoders).
pub trait RerankerModel: Send + Sync + std::fmt::Debug {
    /// Score each document's relevance to the query, in input order.
    fn score_batch(&self, query: &str, documents: &[String]) -> ModelResult<Vec<f32>>;

    /// Rerank documents by relevance.
    ///
    /// Returns `(original_index, score)` pairs sorted by score descending.
    fn rerank(&self, query: &str, documents: &[String]) -> ModelResult<Vec<(usize, f32)>> {
        let scores = self.score_batch(query, documents)?;
        let mut indexed: Vec<(usize, f32)> = scores.into_iter().enumerate().collect();
        indexed.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        Ok(indexed)
    }

    /// Provider-side model identifier.
    fn model_id(&self) -> &str;
}

// ============================================================================
// Factory Functions
// ============================================================================

/// Create a generation model for an endpoint.
///
/// # Errors
///
/// Returns [`ModelError::MissingCredentials`] when no API key is available.
pub fn create_generation_model(endpoint: &ModelEndpoint) -> ModelResult<Box<dyn GenerationModel>> {
    tracing::debug!(
        provider = %endpoint.provider,
        model = %endpoint.model_id,
        "Creating generation model"
    );
    match endpoint.provider {
        ProviderKind::OpenAi => Ok(Box::new(OpenAiModel::new(endpoint)?)),
        ProviderKind::Gemini => Ok(Box::new(GeminiModel::new(endpoint)?)),
    }
}

/// Create an embedding model.
///
/// # Errors
///
/// Returns [`ModelError::ProviderNotAvailable`] for providers without an
/// embeddings endpoint wired up.
pub fn create_embedding_model(config: &EmbeddingConfig) -> ModelResult<Box<dyn EmbeddingModel>> {
    match config.endpoint.provider {
        ProviderKind::OpenAi => Ok(Box::new(OpenAiEmbeddingModel::new(config)?)),
        ProviderKind::Gemini => Err(ModelError::provider_not_available(
            "gemini",
            "embeddings are only supported through OpenAI-compatible endpoints",
        )),
    }
}

/// Create a reranker model.
pub fn create_reranker_model(endpoint: &ModelEndpoint) -> ModelResult<Box<dyn RerankerModel>> {
    match endpoint.provider {
        ProviderKind::OpenAi => Ok(Box::new(OpenAiRerankerModel::new(endpoint)?)),
        ProviderKind::Gemini => Err(ModelError::provider_not_available(
            "gemini",
            "reranking is only supported through OpenAI-compatible endpoints",
        )),
    }
}

// ============================================================================
// Re-exports for direct access
// ============================================================================

pub use gemini::GeminiModel;
pub use openai::{OpenAiEmbeddingModel, OpenAiModel, OpenAiRerankerModel};

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FixedScores(Vec<f32>);

    impl RerankerModel for FixedScores {
        fn score_batch(&self, _query: &str, _documents: &[String]) -> ModelResult<Vec<f32>> {
            Ok(self.0.clone())
        }

        fn model_id(&self) -> &str {
            "fixed"
        }
    }

    #[test]
    fn test_default_rerank_sorts_descending_with_stable_ties() {
        let reranker = FixedScores(vec![0.2, 0.9, 0.2, 0.5]);
        let docs = vec![String::new(); 4];
        let ranked = reranker.rerank("q", &docs).unwrap();
        let order: Vec<usize> = ranked.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, vec![1, 3, 0, 2]);
    }

    #[test]
    fn test_gemini_embeddings_not_available() {
        let config = EmbeddingConfig::new(ModelEndpoint::new(ProviderKind::Gemini, "text-embedding-004"));
        let err = create_embedding_model(&config).unwrap_err();
        assert!(matches!(err, ModelError::ProviderNotAvailable { .. }));
    }

    #[test]
    fn test_create_generation_model_with_inline_key() {
        let endpoint = ModelEndpoint::new(ProviderKind::OpenAi, "deepseek-ai/DeepSeek-V3.1")
            .with_base_url("http://127.0.0.1:9/v1")
            .with_api_key("test-key");
        let model = create_generation_model(&endpoint).unwrap();
        assert_eq!(model.model_id(), "deepseek-ai/DeepSeek-V3.1");
        assert_eq!(model.provider(), ProviderKind::OpenAi);
    }

    #[test]
    fn test_create_generation_model_missing_key() {
        let endpoint = ModelEndpoint::new(ProviderKind::Gemini, "gemini-2.5-pro")
            .with_api_key_env("FORGE_MODEL_FACTORY_TEST_UNSET_KEY");
        let err = create_generation_model(&endpoint).unwrap_err();
        assert!(matches!(err, ModelError::MissingCredentials { .. }));
    }
}
