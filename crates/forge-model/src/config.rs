//! Configuration types for forge-model.
//!
//! These are the canonical endpoint descriptions for every remote model the
//! engine talks to. `forge-core` embeds them directly in its YAML config.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ModelError, ModelResult};

/// Default base URL for OpenAI-compatible providers.
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default base URL for the Gemini REST API.
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Default number of texts per embedding request.
pub const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 32;

// ============================================================================
// ProviderKind
// ============================================================================

/// Remote provider family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Any OpenAI-compatible chat/embeddings API (OpenAI, SiliconFlow, Volcengine Ark, ...).
    #[default]
    #[serde(alias = "siliconflow", alias = "volcengine")]
    OpenAi,
    /// Google Gemini `generateContent` API.
    Gemini,
}

impl ProviderKind {
    /// Environment variable consulted when no key is configured.
    pub fn default_api_key_env(&self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
        }
    }

    /// Base URL used when the endpoint does not set one.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => DEFAULT_OPENAI_BASE_URL,
            Self::Gemini => DEFAULT_GEMINI_BASE_URL,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Gemini => write!(f, "gemini"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" | "siliconflow" | "volcengine" => Ok(Self::OpenAi),
            "gemini" => Ok(Self::Gemini),
            _ => Err(format!(
                "Unknown provider: '{}'. Use 'openai' or 'gemini'.",
                s
            )),
        }
    }
}

// ============================================================================
// GenerationParams
// ============================================================================

/// Sampling parameters passed with every generation request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParams {
    /// Sampling temperature.
    pub temperature: f32,
    /// Upper bound on generated tokens; provider default when `None`.
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: None,
        }
    }
}

impl GenerationParams {
    /// Create parameters with the given temperature.
    pub fn with_temperature(temperature: f32) -> Self {
        Self {
            temperature,
            max_tokens: None,
        }
    }

    /// Set the token limit.
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

// ============================================================================
// ModelEndpoint
// ============================================================================

/// One remote model: provider, model name, where to reach it and how to authenticate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelEndpoint {
    /// Provider family.
    #[serde(default)]
    pub provider: ProviderKind,

    /// Provider-side model name (e.g., "gemini-2.5-pro", "deepseek-ai/DeepSeek-V3.1").
    pub model_id: String,

    /// API base URL; provider default when absent.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Inline API key. Never written back out.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Prompts longer than this many characters are truncated before sending.
    #[serde(default)]
    pub max_input_chars: Option<usize>,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl ModelEndpoint {
    /// Create an endpoint with provider defaults.
    pub fn new(provider: ProviderKind, model_id: impl Into<String>) -> Self {
        Self {
            provider,
            model_id: model_id.into(),
            base_url: None,
            api_key: None,
            api_key_env: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_input_chars: None,
        }
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Set an inline API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the environment variable holding the API key.
    pub fn with_api_key_env(mut self, env_var: impl Into<String>) -> Self {
        self.api_key_env = Some(env_var.into());
        self
    }

    /// Set the request timeout.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Base URL without a trailing slash.
    pub fn effective_base_url(&self) -> String {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
            .trim_end_matches('/')
            .to_string()
    }

    /// Name of the environment variable consulted for the API key.
    pub fn effective_api_key_env(&self) -> &str {
        self.api_key_env
            .as_deref()
            .unwrap_or_else(|| self.provider.default_api_key_env())
    }

    /// Resolve the API key from the inline value or the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::MissingCredentials`] when neither source yields a non-empty key.
    pub fn resolve_api_key(&self) -> ModelResult<String> {
        if let Some(key) = self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            return Ok(key.to_string());
        }

        let env_var = self.effective_api_key_env();
        match std::env::var(env_var) {
            Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
            _ => Err(ModelError::MissingCredentials {
                provider: self.provider.to_string(),
                env_var: env_var.to_string(),
            }),
        }
    }

    /// Request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Validate fields that would make every request fail.
    pub fn validate(&self) -> ModelResult<()> {
        if self.model_id.trim().is_empty() {
            return Err(ModelError::invalid_config(format!(
                "{} endpoint has an empty modelId",
                self.provider
            )));
        }
        Ok(())
    }
}

// ============================================================================
// EmbeddingConfig
// ============================================================================

/// Configuration for an embedding model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingConfig {
    /// Where the model lives.
    #[serde(flatten)]
    pub endpoint: ModelEndpoint,

    /// Requested output dimension. Probed from the first response when absent.
    #[serde(default)]
    pub dimension: Option<usize>,

    /// Number of texts per request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    DEFAULT_EMBEDDING_BATCH_SIZE
}

impl EmbeddingConfig {
    /// Create an embedding config for an endpoint.
    pub fn new(endpoint: ModelEndpoint) -> Self {
        Self {
            endpoint,
            dimension: None,
            batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
        }
    }

    /// Set the requested dimension.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parse_and_display() {
        assert_eq!("openai".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert_eq!("SiliconFlow".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert_eq!("gemini".parse::<ProviderKind>().unwrap(), ProviderKind::Gemini);
        assert!("claude".parse::<ProviderKind>().is_err());
        assert_eq!(ProviderKind::Gemini.to_string(), "gemini");
    }

    #[test]
    fn test_endpoint_from_yaml_like_json() {
        let json = r#"{
            "provider": "volcengine",
            "modelId": "deepseek-v3-1-250821",
            "baseUrl": "https://ark.example.com/api/v3/",
            "timeoutSecs": 30
        }"#;
        let endpoint: ModelEndpoint = serde_json::from_str(json).unwrap();
        assert_eq!(endpoint.provider, ProviderKind::OpenAi);
        assert_eq!(endpoint.effective_base_url(), "https://ark.example.com/api/v3");
        assert_eq!(endpoint.timeout(), Duration::from_secs(30));
        assert_eq!(endpoint.effective_api_key_env(), "OPENAI_API_KEY");
    }

    #[test]
    fn test_api_key_is_not_serialized() {
        let endpoint = ModelEndpoint::new(ProviderKind::Gemini, "gemini-2.5-flash")
            .with_api_key("secret-key");
        let json = serde_json::to_string(&endpoint).unwrap();
        assert!(!json.contains("secret-key"));
    }

    #[test]
    fn test_resolve_api_key_prefers_inline_value() {
        let endpoint = ModelEndpoint::new(ProviderKind::OpenAi, "m")
            .with_api_key("  inline  ")
            .with_api_key_env("FORGE_MODEL_TEST_UNUSED_KEY");
        assert_eq!(endpoint.resolve_api_key().unwrap(), "inline");
    }

    #[test]
    fn test_resolve_api_key_missing() {
        let endpoint = ModelEndpoint::new(ProviderKind::Gemini, "m")
            .with_api_key_env("FORGE_MODEL_TEST_DEFINITELY_UNSET_KEY");
        match endpoint.resolve_api_key() {
            Err(ModelError::MissingCredentials { env_var, .. }) => {
                assert_eq!(env_var, "FORGE_MODEL_TEST_DEFINITELY_UNSET_KEY");
            }
            other => panic!("expected MissingCredentials, got {other:?}"),
        }
    }

    #[test]
    fn test_embedding_config_flattened_endpoint() {
        let json = r#"{
            "provider": "openai",
            "modelId": "Qwen/Qwen3-Embedding-0.6B",
            "dimension": 1024
        }"#;
        let config: EmbeddingConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.endpoint.model_id, "Qwen/Qwen3-Embedding-0.6B");
        assert_eq!(config.dimension, Some(1024));
        assert_eq!(config.batch_size, DEFAULT_EMBEDDING_BATCH_SIZE);
    }

    #[test]
    fn test_validate_rejects_empty_model_id() {
        let endpoint = ModelEndpoint::new(ProviderKind::OpenAi, "  ");
        assert!(endpoint.validate().is_err());
    }
}
