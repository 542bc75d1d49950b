//! Reranker seam for second-stage retrieval.
//!
//! Dense retrieval over-fetches candidates; a cross-encoder reranker orders
//! them before truncation to `top_k`.

use std::fmt;
use std::sync::Arc;

use crate::errors::ForgeError;

// ============================================================================
// RerankerBackend Trait
// ============================================================================

/// Trait for reranker backends.
pub trait RerankerBackend: Send + Sync + fmt::Debug {
    /// Get the model ID this backend uses.
    fn model_id(&self) -> &str;

    /// Rerank documents and return `(original_index, score)` sorted by score descending.
    fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<(usize, f32)>, ForgeError>;
}

// ============================================================================
// Factory Functions
// ============================================================================

/// Create a reranker backend from the configured endpoint, if reranking is enabled.
pub fn create_reranker_backend(
    config: &crate::config::ForgeConfig,
) -> Result<Option<Arc<dyn RerankerBackend>>, ForgeError> {
    if !config.knowledge.rerank {
        return Ok(None);
    }
    match &config.models.reranker {
        Some(endpoint) => {
            let backend = crate::model_adapter::ModelRerankerBackend::from_endpoint(endpoint)?;
            tracing::info!("Reranker enabled: {}", endpoint.model_id);
            Ok(Some(Arc::new(backend)))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForgeConfig;

    #[test]
    fn test_disabled_rerank_creates_nothing() {
        let config = ForgeConfig::default();
        assert!(create_reranker_backend(&config).unwrap().is_none());
    }

    #[test]
    fn test_rerank_without_endpoint_creates_nothing() {
        let mut config = ForgeConfig::default();
        config.knowledge.rerank = true;
        assert!(create_reranker_backend(&config).unwrap().is_none());
    }
}
