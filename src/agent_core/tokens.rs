//! Token estimation for context window management.
//!
//! Uses a flat character heuristic (~4 chars/token) for text. Structured
//! values (tool parameters, tool results) are costed recursively: one token
//! of overhead per node plus the text cost of keys and scalar renderings.
//!
//! A real tokenizer can replace this when the target model is fixed.

use super::types::{Message, ParamValue};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Average characters per token.
const CHARS_PER_TOKEN: usize = 4;

/// Per-message overhead (role label, formatting tokens).
pub const MESSAGE_OVERHEAD_TOKENS: u32 = 4;

/// Overhead per node of a structured value.
const VALUE_NODE_TOKENS: u32 = 1;

// ─── UTF-8 Safe Truncation ──────────────────────────────────────────────────

/// Truncate a string to at most `max_bytes` bytes on a valid UTF-8 char boundary.
///
/// If the byte at `max_bytes` is inside a multi-byte character, the slice is
/// shortened to the preceding character boundary.
pub(crate) fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    // Walk backward to find a valid char boundary
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Keep at most the last `max_bytes` bytes of a string, starting on a char boundary.
pub(crate) fn tail_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut start = s.len() - max_bytes;
    while start < s.len() && !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

// ─── Public API ─────────────────────────────────────────────────────────────

/// Estimate the token count for a string of text: `ceil(chars / 4)`.
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    chars.div_ceil(CHARS_PER_TOKEN) as u32
}

/// Estimate the token count for a tool parameter value.
pub fn estimate_value_tokens(value: &ParamValue) -> u32 {
    VALUE_NODE_TOKENS
        + match value {
            ParamValue::String(s) => estimate_tokens(s),
            ParamValue::Bool(b) => estimate_tokens(if *b { "true" } else { "false" }),
            ParamValue::Int(i) => estimate_tokens(&i.to_string()),
            ParamValue::Float(f) => estimate_tokens(&f.to_string()),
            ParamValue::List(items) => items.iter().map(estimate_value_tokens).sum(),
            ParamValue::Map(map) => map
                .iter()
                .map(|(k, v)| estimate_tokens(k) + estimate_value_tokens(v))
                .sum(),
        }
}

/// Estimate the token count for a JSON value (tool results).
pub fn estimate_json_tokens(value: &serde_json::Value) -> u32 {
    VALUE_NODE_TOKENS
        + match value {
            serde_json::Value::Null => 0,
            serde_json::Value::Bool(b) => estimate_tokens(if *b { "true" } else { "false" }),
            serde_json::Value::Number(n) => estimate_tokens(&n.to_string()),
            serde_json::Value::String(s) => estimate_tokens(s),
            serde_json::Value::Array(items) => items.iter().map(estimate_json_tokens).sum(),
            serde_json::Value::Object(map) => map
                .iter()
                .map(|(k, v)| estimate_tokens(k) + estimate_json_tokens(v))
                .sum(),
        }
}

/// Estimate the token count for a `Message`.
///
/// Accounts for content, the tool call or tool result it carries, and the
/// per-message overhead. The cached `token_count` field is ignored.
pub fn estimate_message_tokens(message: &Message) -> u32 {
    let mut total = MESSAGE_OVERHEAD_TOKENS + estimate_tokens(&message.content);

    if let Some(ref call) = message.tool_call {
        total += estimate_tokens(&call.tool_name);
        total += VALUE_NODE_TOKENS;
        total += call
            .params
            .iter()
            .map(|(k, v)| estimate_tokens(k) + estimate_value_tokens(v))
            .sum::<u32>();
    }

    if let Some(ref result) = message.tool_result {
        total += estimate_json_tokens(&result.result);
        if let Some(ref err) = result.error {
            total += estimate_tokens(err);
        }
    }

    total
}

// ─── Tests ──────────────────────────────────────────────────────────────────
