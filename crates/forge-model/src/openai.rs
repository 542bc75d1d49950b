//! OpenAI-compatible clients: chat completions, embeddings and rerank.
//!
//! Works against any provider that speaks the OpenAI wire format
//! (SiliconFlow, Volcengine Ark, a local gateway). The rerank endpoint follows
//! the `/rerank` shape that SiliconFlow and Jina expose.

use std::sync::OnceLock;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::config::{EmbeddingConfig, GenerationParams, ModelEndpoint, ProviderKind};
use crate::error::{ModelError, ModelResult};
use crate::http::{bearer_headers, build_client, post_json, truncate_prompt};
use crate::{EmbeddingModel, GenerationModel, RerankerModel};

// ============================================================================
// Chat completions
// ============================================================================

/// Generation model backed by `/chat/completions`.
#[derive(Debug)]
pub struct OpenAiModel {
    client: Client,
    url: String,
    model_id: String,
    max_input_chars: Option<usize>,
}

impl OpenAiModel {
    /// Create a chat model for an endpoint.
    ///
    /// # Errors
    ///
    /// Fails when no API key can be resolved or the HTTP client cannot be built.
    pub fn new(endpoint: &ModelEndpoint) -> ModelResult<Self> {
        endpoint.validate()?;
        let api_key = endpoint.resolve_api_key()?;
        let client = build_client(endpoint.timeout(), bearer_headers(&api_key)?)?;
        Ok(Self {
            client,
            url: format!("{}/chat/completions", endpoint.effective_base_url()),
            model_id: endpoint.model_id.clone(),
            max_input_chars: endpoint.max_input_chars,
        })
    }
}

impl GenerationModel for OpenAiModel {
    fn generate(&self, prompt: &str, params: &GenerationParams) -> ModelResult<String> {
        let prompt = truncate_prompt(&self.model_id, prompt, self.max_input_chars);
        let request = ChatRequest {
            model: &self.model_id,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };
        let response: ChatResponse = post_json(&self.client, &self.url, &self.model_id, &request)?;
        extract_chat_text(&self.model_id, response)
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Pull the first choice's text out of a chat response.
pub(crate) fn extract_chat_text(model_id: &str, response: ChatResponse) -> ModelResult<String> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ModelError::invalid_response(model_id, "response contained no choices"))?;

    match choice.message.content {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(ModelError::empty_response(model_id)),
    }
}

// ============================================================================
// Embeddings
// ============================================================================

/// Embedding model backed by `/embeddings`.
#[derive(Debug)]
pub struct OpenAiEmbeddingModel {
    client: Client,
    url: String,
    model_id: String,
    requested_dimension: Option<usize>,
    observed_dimension: OnceLock<usize>,
    batch_size: usize,
}

impl OpenAiEmbeddingModel {
    /// Create an embedding model for a config.
    pub fn new(config: &EmbeddingConfig) -> ModelResult<Self> {
        config.endpoint.validate()?;
        let api_key = config.endpoint.resolve_api_key()?;
        let client = build_client(config.endpoint.timeout(), bearer_headers(&api_key)?)?;
        Ok(Self {
            client,
            url: format!("{}/embeddings", config.endpoint.effective_base_url()),
            model_id: config.endpoint.model_id.clone(),
            requested_dimension: config.dimension,
            observed_dimension: OnceLock::new(),
            batch_size: config.batch_size.max(1),
        })
    }

    fn embed_one_batch(&self, inputs: &[&str]) -> ModelResult<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.model_id,
            input: inputs,
            encoding_format: "float",
            dimensions: self.requested_dimension,
        };
        let response: EmbeddingResponse = post_json(&self.client, &self.url, &self.model_id, &request)?;
        order_embeddings(&self.model_id, response, inputs.len())
    }
}

impl EmbeddingModel for OpenAiEmbeddingModel {
    fn embed(&self, texts: &[&str]) -> ModelResult<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_one_batch(batch)?);
        }
        if let Some(first) = vectors.first() {
            let _ = self.observed_dimension.set(first.len());
        }
        Ok(vectors)
    }

    fn dimension(&self) -> ModelResult<usize> {
        if let Some(dim) = self.observed_dimension.get() {
            return Ok(*dim);
        }
        if let Some(dim) = self.requested_dimension {
            return Ok(dim);
        }
        // Unknown until the provider answers once.
        let probe = self.embed(&["dimension probe"])?;
        probe
            .first()
            .map(Vec::len)
            .ok_or_else(|| ModelError::embedding_failed(&self.model_id, "probe returned no vector"))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    encoding_format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// Sort embedding entries by input index and check the count.
pub(crate) fn order_embeddings(
    model_id: &str,
    mut response: EmbeddingResponse,
    expected: usize,
) -> ModelResult<Vec<Vec<f32>>> {
    response.data.sort_by_key(|entry| entry.index);
    if response.data.len() != expected {
        return Err(ModelError::embedding_failed(
            model_id,
            format!(
                "provider returned {} embeddings for {} inputs",
                response.data.len(),
                expected
            ),
        ));
    }
    if response.data.iter().any(|entry| entry.embedding.is_empty()) {
        return Err(ModelError::embedding_failed(model_id, "provider returned an empty vector"));
    }
    Ok(response.data.into_iter().map(|entry| entry.embedding).collect())
}

// ============================================================================
// Rerank
// ============================================================================

/// Cross-encoder reranker backed by `/rerank`.
#[derive(Debug)]
pub struct OpenAiRerankerModel {
    client: Client,
    url: String,
    model_id: String,
}

impl OpenAiRerankerModel {
    /// Create a reranker for an endpoint.
    pub fn new(endpoint: &ModelEndpoint) -> ModelResult<Self> {
        endpoint.validate()?;
        let api_key = endpoint.resolve_api_key()?;
        let client = build_client(endpoint.timeout(), bearer_headers(&api_key)?)?;
        Ok(Self {
            client,
            url: format!("{}/rerank", endpoint.effective_base_url()),
            model_id: endpoint.model_id.clone(),
        })
    }
}

impl RerankerModel for OpenAiRerankerModel {
    fn score_batch(&self, query: &str, documents: &[String]) -> ModelResult<Vec<f32>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let request = RerankRequest {
            model: &self.model_id,
            query,
            documents,
            return_documents: false,
        };
        let response: RerankResponse = post_json(&self.client, &self.url, &self.model_id, &request)?;
        scores_by_index(&self.model_id, response, documents.len())
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    return_documents: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Debug, Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f32,
}

/// Spread rerank results back into input order.
pub(crate) fn scores_by_index(
    model_id: &str,
    response: RerankResponse,
    len: usize,
) -> ModelResult<Vec<f32>> {
    let mut scores = vec![f32::NEG_INFINITY; len];
    for result in response.results {
        let slot = scores.get_mut(result.index).ok_or_else(|| {
            ModelError::reranking_failed(
                model_id,
                format!("result index {} out of range for {} documents", result.index, len),
            )
        })?;
        *slot = result.relevance_score;
    }
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_chat_text() {
        let response: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"第一章 山门"}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_chat_text("m", response).unwrap(), "第一章 山门");
    }

    #[test]
    fn test_extract_chat_text_empty_is_transient_failure() {
        let response: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"   "}}]}"#).unwrap();
        let err = extract_chat_text("m", response).unwrap_err();
        assert!(matches!(err, ModelError::EmptyResponse { .. }));
        assert!(err.is_transient());

        let response: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":null}}]}"#).unwrap();
        assert!(matches!(
            extract_chat_text("m", response),
            Err(ModelError::EmptyResponse { .. })
        ));
    }

    #[test]
    fn test_extract_chat_text_without_choices() {
        let response: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(
            extract_chat_text("m", response),
            Err(ModelError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_order_embeddings_sorts_by_index() {
        let response: EmbeddingResponse = serde_json::from_str(
            r#"{"data":[{"index":1,"embedding":[0.0,1.0]},{"index":0,"embedding":[1.0,0.0]}]}"#,
        )
        .unwrap();
        let vectors = order_embeddings("m", response, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_order_embeddings_count_mismatch() {
        let response: EmbeddingResponse =
            serde_json::from_str(r#"{"data":[{"index":0,"embedding":[1.0]}]}"#).unwrap();
        assert!(order_embeddings("m", response, 3).is_err());
    }

    #[test]
    fn test_scores_by_index() {
        let response: RerankResponse = serde_json::from_str(
            r#"{"results":[{"index":2,"relevance_score":0.9},{"index":0,"relevance_score":0.4}]}"#,
        )
        .unwrap();
        let scores = scores_by_index("m", response, 3).unwrap();
        assert_eq!(scores[0], 0.4);
        assert_eq!(scores[1], f32::NEG_INFINITY);
        assert_eq!(scores[2], 0.9);
    }

    #[test]
    fn test_scores_by_index_out_of_range() {
        let response: RerankResponse =
            serde_json::from_str(r#"{"results":[{"index":5,"relevance_score":0.9}]}"#).unwrap();
        assert!(scores_by_index("m", response, 2).is_err());
    }
}
