//! Google Gemini client (`models/{model}:generateContent`).

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::config::{GenerationParams, ModelEndpoint, ProviderKind};
use crate::error::{ModelError, ModelResult};
use crate::http::{api_key_headers, build_client, post_json, truncate_prompt};
use crate::GenerationModel;

/// Gemini accepts very long prompts, but not unbounded ones.
pub const DEFAULT_GEMINI_MAX_INPUT_CHARS: usize = 500_000;

/// Generation model backed by the Gemini REST API.
#[derive(Debug)]
pub struct GeminiModel {
    client: Client,
    url: String,
    model_id: String,
    max_input_chars: usize,
}

impl GeminiModel {
    /// Create a Gemini model for an endpoint.
    pub fn new(endpoint: &ModelEndpoint) -> ModelResult<Self> {
        endpoint.validate()?;
        let api_key = endpoint.resolve_api_key()?;
        let client = build_client(endpoint.timeout(), api_key_headers("x-goog-api-key", &api_key)?)?;
        Ok(Self {
            client,
            url: format!(
                "{}/models/{}:generateContent",
                endpoint.effective_base_url(),
                endpoint.model_id
            ),
            model_id: endpoint.model_id.clone(),
            max_input_chars: endpoint
                .max_input_chars
                .unwrap_or(DEFAULT_GEMINI_MAX_INPUT_CHARS),
        })
    }
}

impl GenerationModel for GeminiModel {
    fn generate(&self, prompt: &str, params: &GenerationParams) -> ModelResult<String> {
        let prompt = truncate_prompt(&self.model_id, prompt, Some(self.max_input_chars));
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: &prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: params.temperature,
                max_output_tokens: params.max_tokens,
            },
        };
        let response: GenerateResponse = post_json(&self.client, &self.url, &self.model_id, &request)?;
        extract_candidate_text(&self.model_id, response)
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::Gemini
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

/// Concatenate the text parts of the first candidate.
///
/// A blocked prompt is reported as an invalid response: resending the same
/// prompt will be blocked again, so it must not count as transient.
pub(crate) fn extract_candidate_text(model_id: &str, response: GenerateResponse) -> ModelResult<String> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ModelError::invalid_response(
            model_id,
            format!("prompt blocked: {reason}"),
        ));
    }

    let candidate = match response.candidates.into_iter().next() {
        Some(candidate) => candidate,
        None => return Err(ModelError::empty_response(model_id)),
    };

    if candidate.finish_reason.as_deref() == Some("SAFETY") {
        return Err(ModelError::invalid_response(model_id, "candidate blocked by safety filter"));
    }

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(ModelError::empty_response(model_id));
    }
    Ok(text)
}
