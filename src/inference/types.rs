//! Shared types for the inference client.
//!
//! These mirror the Ollama `/api/generate` and `/api/tags` payloads, used for
//! both request building and response parsing.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─── Generation Options ──────────────────────────────────────────────────────

/// Per-call generation settings handed to a `LanguageModel`.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateOptions {
    /// Model identifier as known by the endpoint (e.g. `llama3.1`).
    pub model: String,
    /// Sampling temperature (0.0 = deterministic).
    pub temperature: f32,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
    /// Deadline for a single generation call.
    pub timeout: Duration,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            model: "llama3.1".to_string(),
            temperature: 0.7,
            max_tokens: 2048,
            timeout: Duration::from_secs(120),
        }
    }
}

// ─── Request Types ───────────────────────────────────────────────────────────

/// Request body for `POST /api/generate`.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    /// Omitted when the flattened context has no system messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub prompt: String,
    pub stream: bool,
    pub options: SamplingOptions,
}

/// Sampling block of the generate request.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SamplingOptions {
    pub temperature: f32,
    /// Ollama's name for the generated-token limit.
    pub num_predict: u32,
}

impl GenerateRequest {
    /// Build a non-streaming request from prompts and options.
    pub fn new(system_prompt: &str, user_prompt: &str, options: &GenerateOptions) -> Self {
        Self {
            model: options.model.clone(),
            system: (!system_prompt.is_empty()).then(|| system_prompt.to_string()),
            prompt: user_prompt.to_string(),
            stream: false,
            options: SamplingOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            },
        }
    }
}

// ─── Response Types ──────────────────────────────────────────────────────────

/// Response body of a non-streaming `/api/generate` call.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub model: Option<String>,
    pub response: String,
    #[serde(default)]
    pub done: bool,
    /// Tokens in the evaluated prompt, when reported.
    #[serde(default)]
    pub prompt_eval_count: Option<u32>,
    /// Tokens generated, when reported.
    #[serde(default)]
    pub eval_count: Option<u32>,
}

/// Response body of `GET /api/tags`.
#[derive(Debug, Clone, Deserialize)]
pub struct TagsResponse {
    #[serde(default)]
    pub models: Vec<ModelTag>,
}

/// A locally installed model.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelTag {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
}

// ─── Tests ───────────────────────────────────────────────────────────────────
