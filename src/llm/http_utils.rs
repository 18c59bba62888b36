//! HTTP utilities for LLM providers
//!
//! Shared request/response handling for the providers that talk raw JSON
//! (vision and embeddings).

use crate::config::get_llm_http_timeout_secs;
use crate::llm::LlmError;
use crate::utils::truncate_str;
use reqwest::{Client as HttpClient, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// Longest API error body kept in an error message
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Creates an HTTP client configured with the standard LLM timeout.
///
/// Uses `LLM_HTTP_TIMEOUT_SECS` environment variable or the 180s default.
#[must_use]
pub fn create_http_client() -> HttpClient {
    let timeout = Duration::from_secs(get_llm_http_timeout_secs());
    HttpClient::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| HttpClient::new())
}

/// Sends an HTTP POST request with JSON body and returns parsed JSON response.
///
/// # Errors
///
/// Returns `LlmError::NetworkError` on connectivity issues, `LlmError::RateLimit` on 429,
/// `LlmError::ApiError` on other non-success status codes,
/// or `LlmError::JsonError` if parsing fails.
pub async fn send_json_request(
    client: &HttpClient,
    url: &str,
    body: &Value,
    auth_header: Option<&str>,
) -> Result<Value, LlmError> {
    let mut request = client.post(url).json(body);

    if let Some(auth) = auth_header {
        request = request.header("Authorization", auth);
    }

    let response = request
        .send()
        .await
        .map_err(|e| LlmError::NetworkError(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let wait_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let error_text = response.text().await.unwrap_or_default();
        return Err(status_error(status, &error_text, wait_secs));
    }

    response
        .json()
        .await
        .map_err(|e| LlmError::JsonError(e.to_string()))
}

/// Turns a failed response into an `LlmError` without leaking HTML pages.
fn status_error(status: StatusCode, body: &str, wait_secs: Option<u64>) -> LlmError {
    let trimmed = body.trim_start();
    let is_html = trimmed.starts_with("<!DOCTYPE")
        || trimmed.starts_with("<html")
        || trimmed.starts_with("<HTML");

    let message = if is_html {
        format!("API error: {status} (Server returned HTML error page)")
    } else if body.chars().count() > MAX_ERROR_BODY_CHARS {
        format!(
            "API error: {status} - {}... (truncated)",
            truncate_str(body, MAX_ERROR_BODY_CHARS)
        )
    } else {
        format!("API error: {status} - {body}")
    };

    if status == StatusCode::TOO_MANY_REQUESTS {
        LlmError::RateLimit { wait_secs, message }
    } else {
        LlmError::ApiError(message)
    }
}

/// Extracts text content from a JSON response by navigating a path.
///
/// Numeric segments index into arrays, everything else is an object key.
///
/// # Errors
///
/// Returns `LlmError::ApiError` if the path is invalid or the target is not a string.
pub fn extract_text_content(response: &Value, path: &[&str]) -> Result<String, LlmError> {
    let mut current = response;

    for segment in path {
        if let Ok(index) = segment.parse::<usize>() {
            current = current.get(index).ok_or_else(|| {
                LlmError::ApiError(format!("Invalid path: missing index {index}"))
            })?;
        } else {
            current = current.get(*segment).ok_or_else(|| {
                LlmError::ApiError(format!("Invalid path: missing key {segment}"))
            })?;
        }
    }

    current
        .as_str()
        .map(ToString::to_string)
        .ok_or_else(|| LlmError::ApiError(format!("Expected string at path, got: {current:?}")))
}
