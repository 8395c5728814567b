//! Shared types for the agent core.
//!
//! Conversation messages, decoded tool calls and their results, the dynamic
//! parameter value type, and the approval request/response pair used between
//! the PermissionManager and its approval callback.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Roles ──────────────────────────────────────────────────────────────────

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

// ─── Parameter Values ───────────────────────────────────────────────────────

/// A dynamically-typed tool parameter value.
///
/// Serialized untagged, so a `ParamValue` looks like plain JSON on the wire.
/// There is no null variant: nulls are dropped when converting from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<ParamValue>),
    Map(BTreeMap<String, ParamValue>),
}

/// Tool parameters keyed by name. Ordered, so serialization is canonical.
pub type Params = BTreeMap<String, ParamValue>;

impl ParamValue {
    /// Convert a JSON value. Returns `None` for `null`.
    pub fn from_json(value: serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(b) => Some(ParamValue::Bool(b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(ParamValue::Int(i)),
                None => n.as_f64().map(ParamValue::Float),
            },
            serde_json::Value::String(s) => Some(ParamValue::String(s)),
            serde_json::Value::Array(items) => Some(ParamValue::List(
                items.into_iter().filter_map(ParamValue::from_json).collect(),
            )),
            serde_json::Value::Object(map) => Some(ParamValue::Map(params_from_json(map))),
        }
    }

    /// Convert back into a JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ParamValue::Bool(b) => serde_json::Value::Bool(*b),
            ParamValue::Int(i) => serde_json::Value::from(*i),
            ParamValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ParamValue::String(s) => serde_json::Value::String(s.clone()),
            ParamValue::List(items) => {
                serde_json::Value::Array(items.iter().map(ParamValue::to_json).collect())
            }
            ParamValue::Map(map) => params_to_json(map),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view; integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(f) => Some(*f),
            ParamValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ParamValue]> {
        match self {
            ParamValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, ParamValue>> {
        match self {
            ParamValue::Map(map) => Some(map),
            _ => None,
        }
    }
}

/// Strings print raw; everything else prints as compact JSON.
impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::String(s) => f.write_str(s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::String(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::String(s)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        ParamValue::Int(i)
    }
}

impl From<f64> for ParamValue {
    fn from(f: f64) -> Self {
        ParamValue::Float(f)
    }
}

/// Convert a JSON object into `Params`, dropping null members.
pub fn params_from_json(map: serde_json::Map<String, serde_json::Value>) -> Params {
    map.into_iter()
        .filter_map(|(k, v)| ParamValue::from_json(v).map(|v| (k, v)))
        .collect()
}

/// Convert `Params` into a JSON object.
pub fn params_to_json(params: &Params) -> serde_json::Value {
    serde_json::Value::Object(
        params
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}

// ─── Tool Calls ─────────────────────────────────────────────────────────────

/// A tool invocation decoded from model text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Registered tool name, never empty.
    pub tool_name: String,
    /// Decoded parameters.
    pub params: Params,
}

impl ToolCall {
    pub fn new(tool_name: impl Into<String>, params: Params) -> Self {
        Self {
            tool_name: tool_name.into(),
            params,
        }
    }

    /// Look up a string parameter.
    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(ParamValue::as_str)
    }
}

/// Outcome of executing one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Tool-defined result; `null` when the call failed.
    pub result: serde_json::Value,
    /// Error message when the call failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(result: serde_json::Value) -> Self {
        Self {
            result,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            result: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

// ─── Conversation Messages ──────────────────────────────────────────────────

/// A single turn stored in the conversation context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Message role: system, user, assistant, or tool.
    pub role: Role,
    /// Text content. For tool-call messages a short sentence naming the tool.
    pub content: String,
    /// Set on assistant messages that request a tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    /// Always set on `tool` role messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,
    /// When the message was appended.
    pub timestamp: DateTime<Utc>,
    /// Estimated token cost, computed once on append.
    pub token_count: u32,
}

/// Read-only view of a message handed to the language model client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormattedMessage {
    pub role: Role,
    pub content: String,
    /// The structured call, for clients that accept structured history.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
}

// ─── Approval ───────────────────────────────────────────────────────────────

/// Request handed to the approval callback before a tool runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    /// Unique request ID for matching responses.
    pub request_id: String,
    /// The tool being called.
    pub tool_name: String,
    /// Copy of the call parameters.
    pub params: Params,
    /// Human-readable description of what will happen.
    pub description: String,
    /// When the request was raised.
    pub requested_at: DateTime<Utc>,
}

/// Decision returned by the approval callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionResponse {
    pub granted: bool,
    /// Store this decision for identical future calls.
    pub remember_me: bool,
}

impl PermissionResponse {
    pub fn allow() -> Self {
        Self {
            granted: true,
            remember_me: false,
        }
    }

    pub fn allow_always() -> Self {
        Self {
            granted: true,
            remember_me: true,
        }
    }

    pub fn deny() -> Self {
        Self {
            granted: false,
            remember_me: false,
        }
    }

    pub fn deny_always() -> Self {
        Self {
            granted: false,
            remember_me: true,
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
