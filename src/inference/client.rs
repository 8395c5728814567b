//! Language model client.
//!
//! `LanguageModel` is the seam the orchestration loop talks to; the
//! `InferenceClient` implements it against an Ollama-compatible
//! `/api/generate` endpoint. Tests substitute scripted models.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;

use super::errors::InferenceError;
use super::types::{GenerateOptions, GenerateRequest, GenerateResponse, TagsResponse};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default endpoint of a local Ollama server.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

// ─── LanguageModel ───────────────────────────────────────────────────────────

/// A text-completion model.
///
/// Implementations receive the flattened conversation as a system prompt and
/// a transcript-style user prompt, and return the raw completion text.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String, InferenceError>;
}

// ─── InferenceClient ─────────────────────────────────────────────────────────

/// Client for a local Ollama-compatible inference endpoint.
pub struct InferenceClient {
    http: HttpClient,
    base_url: String,
}

impl InferenceClient {
    /// Create a client for `base_url` (trailing slashes are ignored).
    ///
    /// Does NOT check connectivity; that happens on the first request or
    /// through [`health_check`](Self::health_check).
    pub fn new(base_url: &str) -> Result<Self, InferenceError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { http, base_url })
    }

    /// The endpoint this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ─── Health Check ────────────────────────────────────────────────────

    /// Check if the endpoint is reachable.
    ///
    /// Hits `/api/tags`, which does not consume inference tokens.
    pub async fn health_check(&self) -> Result<bool, InferenceError> {
        let url = format!("{}/api/tags", self.base_url);

        match self.http.get(&url).timeout(CONNECT_TIMEOUT).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    /// List the models installed on the endpoint.
    pub async fn list_models(&self) -> Result<Vec<String>, InferenceError> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self
            .http
            .get(&url)
            .timeout(CONNECT_TIMEOUT)
            .send()
            .await
            .map_err(|e| map_send_error(&url, e, CONNECT_TIMEOUT))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let tags: TagsResponse =
            response
                .json()
                .await
                .map_err(|e| InferenceError::InvalidResponse {
                    reason: format!("failed to parse tags response: {e}"),
                })?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

#[async_trait]
impl LanguageModel for InferenceClient {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String, InferenceError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest::new(system_prompt, user_prompt, options);

        // Log the request metadata, not the prompt (it can be huge)
        tracing::info!(
            url = %url,
            model = %body.model,
            system_len = system_prompt.len(),
            prompt_len = user_prompt.len(),
            num_predict = body.options.num_predict,
            "LLM request"
        );

        let response = self
            .http
            .post(&url)
            .timeout(options.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_send_error(&url, e, options.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), model = %body.model, "LLM request rejected");
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let body_text = response
            .text()
            .await
            .map_err(|e| map_send_error(&url, e, options.timeout))?;

        let parsed = parse_generate_response(&body_text)?;

        tracing::debug!(
            response_len = parsed.response.len(),
            eval_count = parsed.eval_count.unwrap_or(0),
            "LLM response"
        );

        Ok(parsed.response)
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Classify a reqwest failure.
fn map_send_error(url: &str, e: reqwest::Error, timeout: Duration) -> InferenceError {
    if e.is_timeout() {
        InferenceError::Timeout {
            duration_secs: timeout.as_secs(),
        }
    } else {
        InferenceError::ConnectionFailed {
            endpoint: url.to_string(),
            reason: e.to_string(),
        }
    }
}

/// Parse a non-streaming `/api/generate` body.
pub(crate) fn parse_generate_response(body: &str) -> Result<GenerateResponse, InferenceError> {
    serde_json::from_str(body).map_err(|e| InferenceError::InvalidResponse {
        reason: format!("failed to parse generate response: {e}"),
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
