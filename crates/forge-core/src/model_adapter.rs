//! Adapter layer for forge-model infrastructure.
//!
//! This module bridges forge-model implementations with forge-core's domain types.
//! It provides:
//!
//! - Error conversion from `ModelError` to `ForgeError`
//! - Wrapper types that implement forge-core traits using forge-model backends
//!
//! ## Architecture
//!
//! ```text
//! forge-core domain code (knowledge, gateway, validator)
//!        ↓
//!   model_adapter (this module) - wrappers + conversions
//!        ↓
//!     forge-model implementations (remote HTTP models)
//! ```

use forge_model::{EmbeddingModel, ModelError, RerankerModel};

use crate::embedding::EmbeddingBackend;
use crate::errors::ForgeError;
use crate::reranker::RerankerBackend;

// ============================================================================
// Error Conversion
// ============================================================================

/// Convert a forge-model error to a forge-core error.
///
/// Only configuration-level failures have a dedicated mapping here; call
/// failures of generation models are collected by the gateway into a
/// [`FailureChain`](crate::gateway::FailureChain) instead.
pub fn from_model_error(err: ModelError) -> ForgeError {
    match err {
        ModelError::MissingCredentials { provider, env_var } => ForgeError::invalid_config(
            format!("no API key for provider `{}`", provider),
            format!("Set {} or add apiKey to the model in novelforge.yaml", env_var),
        ),

        ModelError::InvalidConfig { message } => {
            ForgeError::invalid_config(message, "Check the models section of novelforge.yaml")
        }

        ModelError::ProviderNotAvailable { provider, reason } => ForgeError::invalid_config(
            format!("provider `{}` is not available: {}", provider, reason),
            "Use an OpenAI-compatible provider for embeddings and reranking",
        ),

        ModelError::EmbeddingFailed { model_id, message }
        | ModelError::RerankingFailed { model_id, message } => ForgeError::Retrieval {
            model_id,
            reason: message,
        },

        ModelError::Json(json_err) => ForgeError::Json(json_err),

        other => ForgeError::Retrieval {
            model_id: other.model_id().unwrap_or("unknown").to_string(),
            reason: other.to_string(),
        },
    }
}

/// Extension trait to convert forge-model Result to Result<T, ForgeError>.
pub trait IntoForgeResult<T> {
    /// Convert a forge-model result to a ForgeError result.
    fn into_forge_result(self) -> Result<T, ForgeError>;
}

impl<T> IntoForgeResult<T> for Result<T, ModelError> {
    fn into_forge_result(self) -> Result<T, ForgeError> {
        self.map_err(from_model_error)
    }
}

// ============================================================================
// ModelEmbeddingBackend
// ============================================================================

/// Embedding backend backed by a forge-model [`EmbeddingModel`].
#[derive(Debug)]
pub struct ModelEmbeddingBackend {
    inner: Box<dyn EmbeddingModel>,
}

impl ModelEmbeddingBackend {
    /// Create the backend from an embedding config.
    pub fn from_config(config: &forge_model::EmbeddingConfig) -> Result<Self, ForgeError> {
        let inner = forge_model::create_embedding_model(config).into_forge_result()?;
        Ok(Self { inner })
    }

    /// Wrap an existing model.
    pub fn new(inner: Box<dyn EmbeddingModel>) -> Self {
        Self { inner }
    }
}

impl EmbeddingBackend for ModelEmbeddingBackend {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimension(&self) -> Result<usize, ForgeError> {
        self.inner.dimension().into_forge_result()
    }

    fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ForgeError> {
        self.inner.embed_batch(inputs).into_forge_result()
    }
}

// ============================================================================
// ModelRerankerBackend
// ============================================================================

/// Reranker backend backed by a forge-model [`RerankerModel`].
#[derive(Debug)]
pub struct ModelRerankerBackend {
    inner: Box<dyn RerankerModel>,
}

impl ModelRerankerBackend {
    /// Create the backend from an endpoint.
    pub fn from_endpoint(endpoint: &forge_model::ModelEndpoint) -> Result<Self, ForgeError> {
        let inner = forge_model::create_reranker_model(endpoint).into_forge_result()?;
        Ok(Self { inner })
    }
}

impl RerankerBackend for ModelRerankerBackend {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<(usize, f32)>, ForgeError> {
        self.inner.rerank(query, documents).into_forge_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_credentials_becomes_config_error() {
        let err = from_model_error(ModelError::MissingCredentials {
            provider: "gemini".into(),
            env_var: "GEMINI_API_KEY".into(),
        });
        assert!(err.is_fatal());
        assert!(err.to_string().contains("GEMINI_API_KEY"));
    }

    #[test]
    fn test_call_failures_become_retrieval_errors() {
        let err = from_model_error(ModelError::Timeout {
            model_id: "Qwen/Qwen3-Embedding-0.6B".into(),
            message: "timed out".into(),
        });
        match err {
            ForgeError::Retrieval { model_id, .. } => {
                assert_eq!(model_id, "Qwen/Qwen3-Embedding-0.6B")
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
