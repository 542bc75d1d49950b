//! Shared blocking HTTP plumbing for remote providers.
//!
//! Every provider client funnels its requests through [`post_json`] so that
//! transport failures are classified the same way everywhere.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ModelError, ModelResult};

/// Build a client with a timeout and default headers.
pub(crate) fn build_client(timeout: Duration, headers: HeaderMap) -> ModelResult<Client> {
    Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .build()
        .map_err(|e| ModelError::invalid_config(format!("failed to build HTTP client: {e}")))
}

/// JSON headers with a bearer token.
pub(crate) fn bearer_headers(api_key: &str) -> ModelResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    let auth = format!("Bearer {}", api_key.trim());
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&auth)
            .map_err(|_| ModelError::invalid_config("API key contains invalid header characters"))?,
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(headers)
}

/// JSON headers with a custom API-key header (Gemini uses `x-goog-api-key`).
pub(crate) fn api_key_headers(header: &'static str, api_key: &str) -> ModelResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static(header),
        HeaderValue::from_str(api_key.trim())
            .map_err(|_| ModelError::invalid_config("API key contains invalid header characters"))?,
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(headers)
}

/// POST a JSON body and decode a JSON response.
pub(crate) fn post_json<B, R>(client: &Client, url: &str, model_id: &str, body: &B) -> ModelResult<R>
where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
{
    tracing::debug!(model = model_id, url, "POST");

    let response = client
        .post(url)
        .json(body)
        .send()
        .map_err(|e| classify_send_error(model_id, &e))?;

    let status = response.status();
    let text = response
        .text()
        .map_err(|e| classify_send_error(model_id, &e))?;

    if !status.is_success() {
        return Err(classify_status(model_id, status, &text));
    }

    serde_json::from_str(&text).map_err(|e| ModelError::invalid_response(model_id, e.to_string()))
}

/// Map a transport-level reqwest error onto the model error taxonomy.
pub(crate) fn classify_send_error(model_id: &str, err: &reqwest::Error) -> ModelError {
    let message = err.to_string();
    if err.is_timeout() {
        ModelError::Timeout {
            model_id: model_id.to_string(),
            message,
        }
    } else if err.is_connect() || err.is_request() || err.is_body() {
        ModelError::Connection {
            model_id: model_id.to_string(),
            message,
        }
    } else if err.is_decode() {
        ModelError::invalid_response(model_id, message)
    } else {
        ModelError::Connection {
            model_id: model_id.to_string(),
            message,
        }
    }
}

/// Map a non-success status onto the model error taxonomy.
pub(crate) fn classify_status(model_id: &str, status: StatusCode, body: &str) -> ModelError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        ModelError::RateLimited {
            model_id: model_id.to_string(),
            message: body.chars().take(200).collect(),
        }
    } else {
        ModelError::http_status(model_id, status.as_u16(), body)
    }
}

/// Cut a prompt to at most `max_chars` characters.
pub(crate) fn truncate_prompt<'a>(model_id: &str, prompt: &'a str, max_chars: Option<usize>) -> std::borrow::Cow<'a, str> {
    match max_chars {
        Some(limit) if prompt.chars().count() > limit => {
            tracing::warn!(
                model = model_id,
                limit,
                "Prompt exceeds input limit, truncating"
            );
            std::borrow::Cow::Owned(prompt.chars().take(limit).collect())
        }
        _ => std::borrow::Cow::Borrowed(prompt),
    }
}
