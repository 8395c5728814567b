//! Inference Client — Ollama API client and tool-call extraction.
//!
//! This module handles all communication with the local model endpoint:
//! - Non-streaming text generation (`/api/generate`)
//! - Health checks and model listing (`/api/tags`)
//! - Tool call extraction from free-form model output (JSON fences, bash
//!   fences, XML blocks)
//!
//! The orchestration loop only sees the `LanguageModel` trait, so the
//! backend can be swapped without touching the loop.

pub mod client;
pub mod errors;
pub mod tool_call_parser;
pub mod types;
pub mod xml_tool_call;

// Re-exports for convenience
pub use client::{InferenceClient, LanguageModel};
pub use errors::InferenceError;
pub use tool_call_parser::{DecodedCall, Extraction, ToolCallDecoder, ToolCallExtractor};
pub use types::GenerateOptions;
