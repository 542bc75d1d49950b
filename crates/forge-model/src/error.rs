//! Error types for forge-model.
//!
//! Every error carries the model it came from. Callers that retry use
//! [`ModelError::is_transient`] to decide whether another attempt can help.

use thiserror::Error;

/// Result type alias for forge-model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Longest response body kept in an [`ModelError::HttpStatus`] message.
const MAX_BODY_CHARS: usize = 500;

/// Errors that can occur in forge-model operations.
#[derive(Debug, Error)]
pub enum ModelError {
    // ========================================================================
    // Transport errors
    // ========================================================================
    /// The request did not complete within the configured timeout.
    #[error("Request to model '{model_id}' timed out: {message}")]
    Timeout { model_id: String, message: String },

    /// The provider rejected the request because of rate limiting.
    #[error("Model '{model_id}' is rate limited: {message}")]
    RateLimited { model_id: String, message: String },

    /// The connection could not be established or was dropped.
    #[error("Connection to model '{model_id}' failed: {message}")]
    Connection { model_id: String, message: String },

    /// The provider answered with a non-success HTTP status.
    #[error("Model '{model_id}' returned HTTP {status}: {body}")]
    HttpStatus {
        model_id: String,
        status: u16,
        body: String,
    },

    // ========================================================================
    // Response errors
    // ========================================================================
    /// The provider answered but the text was empty or whitespace.
    #[error("Model '{model_id}' returned an empty response")]
    EmptyResponse { model_id: String },

    /// The response could not be decoded into the expected shape.
    #[error("Malformed response from model '{model_id}': {message}")]
    InvalidResponse { model_id: String, message: String },

    /// Embedding generation failed.
    #[error("Embedding failed for model '{model_id}': {message}")]
    EmbeddingFailed { model_id: String, message: String },

    /// Reranking failed.
    #[error("Reranking failed for model '{model_id}': {message}")]
    RerankingFailed { model_id: String, message: String },

    /// A composite model gave up after its retry budget.
    #[error("Model '{model_id}' failed after {attempts} attempt(s): {message}")]
    RetriesExhausted {
        model_id: String,
        attempts: u32,
        message: String,
    },

    // ========================================================================
    // Provider errors
    // ========================================================================
    /// Provider does not offer the requested capability.
    #[error("Provider '{provider}' not available: {reason}")]
    ProviderNotAvailable { provider: String, reason: String },

    /// No API key could be resolved for a provider.
    #[error("{}", format_missing_credentials(.provider, .env_var))]
    MissingCredentials { provider: String, env_var: String },

    /// Endpoint configuration is unusable.
    #[error("Invalid model configuration: {message}")]
    InvalidConfig { message: String },

    // ========================================================================
    // Serialization errors
    // ========================================================================
    /// JSON encoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn format_missing_credentials(provider: &str, env_var: &str) -> String {
    format!(
        "No API key configured for provider '{provider}'.\n\n\
        Set the {env_var} environment variable, or add `apiKey` / `apiKeyEnv`\n\
        to the model entry in novelforge.yaml."
    )
}

// ============================================================================
// Classification
// ============================================================================

impl ModelError {
    /// Whether retrying the same request may succeed.
    ///
    /// Timeouts, rate limits, dropped connections, server errors and empty
    /// responses are transient. Authentication failures, bad requests,
    /// malformed responses and configuration problems are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. }
            | Self::RateLimited { .. }
            | Self::Connection { .. }
            | Self::EmptyResponse { .. } => true,
            Self::HttpStatus { status, .. } => *status == 408 || *status >= 500,
            _ => false,
        }
    }

    /// The model identifier this error refers to, if any.
    pub fn model_id(&self) -> Option<&str> {
        match self {
            Self::Timeout { model_id, .. }
            | Self::RateLimited { model_id, .. }
            | Self::Connection { model_id, .. }
            | Self::HttpStatus { model_id, .. }
            | Self::EmptyResponse { model_id }
            | Self::InvalidResponse { model_id, .. }
            | Self::EmbeddingFailed { model_id, .. }
            | Self::RerankingFailed { model_id, .. }
            | Self::RetriesExhausted { model_id, .. } => Some(model_id),
            _ => None,
        }
    }
}

// ============================================================================
// Error constructors
// ============================================================================

impl ModelError {
    /// Create an empty response error.
    pub fn empty_response(model_id: impl Into<String>) -> Self {
        Self::EmptyResponse {
            model_id: model_id.into(),
        }
    }

    /// Create an invalid response error.
    pub fn invalid_response(model_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            model_id: model_id.into(),
            message: message.into(),
        }
    }

    /// Create an HTTP status error, truncating long bodies.
    pub fn http_status(model_id: impl Into<String>, status: u16, body: impl AsRef<str>) -> Self {
        let body = body.as_ref().trim();
        let body = if body.chars().count() > MAX_BODY_CHARS {
            let head: String = body.chars().take(MAX_BODY_CHARS).collect();
            format!("{head}...")
        } else {
            body.to_string()
        };
        Self::HttpStatus {
            model_id: model_id.into(),
            status,
            body,
        }
    }

    /// Create an embedding failed error.
    pub fn embedding_failed(model_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::EmbeddingFailed {
            model_id: model_id.into(),
            message: message.into(),
        }
    }

    /// Create a reranking failed error.
    pub fn reranking_failed(model_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RerankingFailed {
            model_id: model_id.into(),
            message: message.into(),
        }
    }

    /// Create a provider not available error.
    pub fn provider_not_available(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProviderNotAvailable {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ModelError::Timeout {
            model_id: "m".into(),
            message: "slow".into()
        }
        .is_transient());
        assert!(ModelError::RateLimited {
            model_id: "m".into(),
            message: "429".into()
        }
        .is_transient());
        assert!(ModelError::empty_response("m").is_transient());
        assert!(ModelError::http_status("m", 503, "unavailable").is_transient());

        assert!(!ModelError::http_status("m", 401, "unauthorized").is_transient());
        assert!(!ModelError::invalid_response("m", "no choices").is_transient());
        assert!(!ModelError::invalid_config("bad").is_transient());
    }

    #[test]
    fn test_http_status_truncates_body() {
        let body = "x".repeat(2_000);
        let err = ModelError::http_status("m", 500, &body);
        match err {
            ModelError::HttpStatus { body, .. } => {
                assert!(body.ends_with("..."));
                assert_eq!(body.chars().count(), MAX_BODY_CHARS + 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_credentials_message_names_env_var() {
        let err = ModelError::MissingCredentials {
            provider: "gemini".into(),
            env_var: "GEMINI_API_KEY".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("gemini"));
        assert!(msg.contains("GEMINI_API_KEY"));
    }

    #[test]
    fn test_model_id_accessor() {
        assert_eq!(ModelError::empty_response("qwen").model_id(), Some("qwen"));
        assert_eq!(ModelError::invalid_config("x").model_id(), None);
    }
}
