//! Tool trait and registry.
//!
//! Tools are registered by name and looked up by the orchestration loop when
//! the model requests them. The registry also renders the capability listing
//! that goes into the system prompt.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::types::Params;

// ─── Tool ───────────────────────────────────────────────────────────────────

/// A capability the model can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model uses to call this tool.
    fn name(&self) -> &str;

    /// One-line description for the system prompt.
    fn description(&self) -> &str;

    /// JSON schema of the parameters (`{"type":"object","properties":…,"required":…}`).
    fn parameters_schema(&self) -> serde_json::Value;

    /// Run the tool. Errors are plain messages fed back to the model.
    ///
    /// Long-running tools should watch `cancel`; the loop also races the
    /// returned future against it.
    async fn execute(
        &self,
        cancel: &CancellationToken,
        params: &Params,
    ) -> Result<serde_json::Value, String>;

    /// Check parameters before asking for permission.
    ///
    /// The default enforces the schema's `required` list.
    fn validate_params(&self, params: &Params) -> Result<(), String> {
        validate_required(&self.parameters_schema(), params)
    }

    /// Custom description for the approval prompt. `None` uses the built-in table.
    fn describe_call(&self, _params: &Params) -> Option<String> {
        None
    }
}

/// Fail if any field in the schema's `required` array is missing.
pub fn validate_required(schema: &serde_json::Value, params: &Params) -> Result<(), String> {
    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field in required {
            if let Some(field_name) = field.as_str() {
                if !params.contains_key(field_name) {
                    return Err(format!("missing required field: '{field_name}'"));
                }
            }
        }
    }
    Ok(())
}

// ─── ToolRegistry ───────────────────────────────────────────────────────────

/// Name → tool lookup.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing (and returning) any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Option<Arc<dyn Tool>> {
        let name = tool.name().to_string();
        tracing::debug!(tool = %name, "tool registered");
        self.tools.insert(name, tool)
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool listing for the system prompt, one tool per line.
    ///
    /// Each line names the tool, its description, and its parameters with
    /// required ones marked.
    pub fn capability_summary(&self) -> String {
        if self.is_empty() {
            return "No tools are currently available.".to_string();
        }

        self.names()
            .into_iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| {
                let schema = tool.parameters_schema();
                let params = describe_schema_params(&schema);
                if params.is_empty() {
                    format!("- {}: {}", tool.name(), tool.description())
                } else {
                    format!("- {}: {} (parameters: {params})", tool.name(), tool.description())
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// `path*, limit` style parameter list; `*` marks required fields.
fn describe_schema_params(schema: &serde_json::Value) -> String {
    let required: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    let Some(props) = schema.get("properties").and_then(|p| p.as_object()) else {
        return String::new();
    };

    props
        .keys()
        .map(|key| {
            if required.contains(&key.as_str()) {
                format!("{key}*")
            } else {
                key.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::types::ParamValue;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Repeat the input text"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string"},
                    "times": {"type": "integer"}
                },
                "required": ["text"]
            })
        }
        async fn execute(
            &self,
            _cancel: &CancellationToken,
            params: &Params,
        ) -> Result<serde_json::Value, String> {
            Ok(params["text"].to_json())
        }
    }

    struct Ping;

    #[async_trait]
    impl Tool for Ping {
        fn name(&self) -> &str {
            "ping"
        }
        fn description(&self) -> &str {
            "Check liveness"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(
            &self,
            _cancel: &CancellationToken,
            _params: &Params,
        ) -> Result<serde_json::Value, String> {
            Ok(serde_json::json!("pong"))
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        assert!(registry.register(Arc::new(Echo)).is_none());
        assert!(registry.register(Arc::new(Ping)).is_none());
        assert!(registry.register(Arc::new(Echo)).is_some());

        assert_eq!(registry.len(), 2);
        assert!(registry.get_tool("echo").is_some());
        assert!(registry.get_tool("nope").is_none());
        assert_eq!(registry.names(), vec!["echo", "ping"]);
    }

    #[test]
    fn test_default_validation_checks_required() {
        let mut params = Params::new();
        assert_eq!(
            Echo.validate_params(&params),
            Err("missing required field: 'text'".to_string())
        );
        params.insert("text".into(), ParamValue::from("hi"));
        assert!(Echo.validate_params(&params).is_ok());
        assert!(Ping.validate_params(&Params::new()).is_ok());
    }

    #[test]
    fn test_capability_summary() {
        let mut registry = ToolRegistry::new();
        assert_eq!(registry.capability_summary(), "No tools are currently available.");

        registry.register(Arc::new(Echo));
        registry.register(Arc::new(Ping));
        let summary = registry.capability_summary();
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("- echo: Repeat the input text (parameters: "));
        assert!(lines[0].contains("text*"));
        assert!(lines[0].contains("times"));
        assert!(!lines[0].contains("times*"));
        assert_eq!(lines[1], "- ping: Check liveness");
    }

    #[tokio::test]
    async fn test_execute_through_registry() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        let tool = registry.get_tool("echo").unwrap();

        let mut params = Params::new();
        params.insert("text".into(), ParamValue::from("hello"));
        let out = tool.execute(&CancellationToken::new(), &params).await.unwrap();
        assert_eq!(out, serde_json::json!("hello"));
        assert!(tool.describe_call(&params).is_none());
    }
}
