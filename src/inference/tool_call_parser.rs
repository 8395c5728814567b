//! Tool call extraction — finds a tool request in free-form model text.
//!
//! Models asked to use tools answer in one of several surface syntaxes. The
//! extractor runs an ordered chain of decoders and takes the first hit:
//!
//! 1. **Fenced JSON** — a ```` ```json ```` block holding
//!    `{"tool": "<name>", "params": {...}}` (`"name"` is accepted for `"tool"`).
//!
//! 2. **Fenced shell** — a ```` ```bash ```` (or `sh`, `shell`, `terminal`,
//!    `console`) block. The body becomes `{"command": body}` for `execute`.
//!
//! 3. **XML** — a `<tool><name>…</name><params>…</params></tool>` block,
//!    parsed structurally first, then by pattern, then as inline JSON.
//!    See [`super::xml_tool_call`].
//!
//! Whatever surrounds the matched block is returned as leftover commentary.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use super::xml_tool_call::{LegacyJsonDecoder, PatternXmlDecoder, StructuralXmlDecoder};
use crate::agent_core::types::{params_from_json, ParamValue, Params, ToolCall};

/// Tool that shell fences are routed to.
pub const SHELL_TOOL: &str = "execute";

// ─── Decoder Trait ───────────────────────────────────────────────────────────

/// A decoded call plus the byte range of the block it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedCall {
    pub call: ToolCall,
    pub span: Range<usize>,
}

/// One surface syntax.
pub trait ToolCallDecoder: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Decode the first call in `text`, or `None` if this syntax is absent.
    fn try_decode(&self, text: &str) -> Option<DecodedCall>;
}

// ─── Extractor ───────────────────────────────────────────────────────────────

/// Result of running the extractor over a model response.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub tool_call: Option<ToolCall>,
    /// Text with the matched block removed and trimmed; the input verbatim
    /// when nothing matched.
    pub remaining: String,
    /// Decoder that produced the call.
    pub decoder: Option<&'static str>,
}

impl Extraction {
    pub fn found(&self) -> bool {
        self.tool_call.is_some()
    }
}

/// Ordered decoder chain.
pub struct ToolCallExtractor {
    decoders: Vec<Box<dyn ToolCallDecoder>>,
}

impl Default for ToolCallExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolCallExtractor {
    /// The standard chain: JSON fence, shell fence, XML structural, XML
    /// pattern, inline JSON inside `<tool>`.
    pub fn new() -> Self {
        Self::with_decoders(vec![
            Box::new(JsonFenceDecoder),
            Box::new(ShellFenceDecoder),
            Box::new(StructuralXmlDecoder),
            Box::new(PatternXmlDecoder),
            Box::new(LegacyJsonDecoder),
        ])
    }

    /// A custom chain, tried in the given order.
    pub fn with_decoders(decoders: Vec<Box<dyn ToolCallDecoder>>) -> Self {
        Self { decoders }
    }

    pub fn decoder_names(&self) -> Vec<&'static str> {
        self.decoders.iter().map(|d| d.name()).collect()
    }

    /// Find the first tool call in `text`.
    ///
    /// Never fails: malformed blocks are simply not calls.
    pub fn extract(&self, text: &str) -> Extraction {
        for decoder in &self.decoders {
            if let Some(decoded) = decoder.try_decode(text) {
                tracing::debug!(
                    decoder = decoder.name(),
                    tool = %decoded.call.tool_name,
                    param_count = decoded.call.params.len(),
                    "tool call extracted"
                );
                return Extraction {
                    tool_call: Some(decoded.call),
                    remaining: remove_span(text, decoded.span),
                    decoder: Some(decoder.name()),
                };
            }
        }

        Extraction {
            tool_call: None,
            remaining: text.to_string(),
            decoder: None,
        }
    }
}

/// Cut `span` out of `text` and trim the rest.
fn remove_span(text: &str, span: Range<usize>) -> String {
    let before = text.get(..span.start).unwrap_or_default();
    let after = text.get(span.end..).unwrap_or_default();
    let before = before.trim_end();
    let after = after.trim_start();
    if before.is_empty() || after.is_empty() {
        format!("{before}{after}").trim().to_string()
    } else {
        format!("{before}\n\n{after}").trim().to_string()
    }
}

// ─── JSON Shape ──────────────────────────────────────────────────────────────

/// Interpret `{"tool"|"name": "<name>", "params": {...}}`.
///
/// Returns `None` unless the name is a non-empty string and `params` is an
/// object. Values keep their JSON types.
pub(crate) fn call_from_json(value: serde_json::Value) -> Option<ToolCall> {
    let serde_json::Value::Object(mut obj) = value else {
        return None;
    };

    let name = obj
        .get("tool")
        .or_else(|| obj.get("name"))
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|n| !n.is_empty())?
        .to_string();

    let serde_json::Value::Object(params) = obj.remove("params")? else {
        return None;
    };

    Some(ToolCall::new(name, params_from_json(params)))
}

// ─── Fenced JSON ─────────────────────────────────────────────────────────────

/// ```` ```json ```` blocks.
pub struct JsonFenceDecoder;

impl ToolCallDecoder for JsonFenceDecoder {
    fn name(&self) -> &'static str {
        "json_fence"
    }

    fn try_decode(&self, text: &str) -> Option<DecodedCall> {
        static JSON_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"(?s)```(?:json|JSON)\b[^\n]*\n(.*?)```").expect("valid regex")
        });

        JSON_FENCE_RE.captures_iter(text).find_map(|caps| {
            let whole = caps.get(0)?;
            let body = caps.get(1)?.as_str();
            let value: serde_json::Value = serde_json::from_str(body.trim()).ok()?;
            let call = call_from_json(value)?;
            Some(DecodedCall {
                call,
                span: whole.range(),
            })
        })
    }
}

// ─── Fenced Shell ────────────────────────────────────────────────────────────

/// ```` ```bash ```` style blocks, routed to the `execute` tool.
pub struct ShellFenceDecoder;

impl ToolCallDecoder for ShellFenceDecoder {
    fn name(&self) -> &'static str {
        "shell_fence"
    }

    fn try_decode(&self, text: &str) -> Option<DecodedCall> {
        static SHELL_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"(?s)```(?:bash|sh|shell|terminal|console)\b[^\n]*\n(.*?)```")
                .expect("valid regex")
        });

        SHELL_FENCE_RE.captures_iter(text).find_map(|caps| {
            let whole = caps.get(0)?;
            let body = caps.get(1)?.as_str().trim();
            if body.is_empty() {
                return None;
            }
            let mut params = Params::new();
            params.insert("command".to_string(), ParamValue::from(body));
            Some(DecodedCall {
                call: ToolCall::new(SHELL_TOOL, params),
                span: whole.range(),
            })
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_fence() {
        let text = "Let me check.\n```json\n{\"tool\": \"read_file\", \"params\": {\"path\": \"a.txt\", \"limit\": 10}}\n```\nOne moment.";
        let ex = ToolCallExtractor::new().extract(text);
        assert!(ex.found());
        let call = ex.tool_call.unwrap();
        assert_eq!(call.tool_name, "read_file");
        assert_eq!(call.params["path"], ParamValue::from("a.txt"));
        assert_eq!(call.params["limit"], ParamValue::Int(10));
        assert_eq!(ex.remaining, "Let me check.\n\nOne moment.");
        assert_eq!(ex.decoder, Some("json_fence"));
    }

    #[test]
    fn test_json_fence_name_alias_and_uppercase_tag() {
        let text = "```JSON\n{\"name\": \"calculator\", \"params\": {\"expr\": \"2+2\"}}\n```";
        let call = ToolCallExtractor::new().extract(text).tool_call.unwrap();
        assert_eq!(call.tool_name, "calculator");
    }

    #[test]
    fn test_json_fence_without_params_is_not_a_call() {
        let text = "```json\n{\"tool\": \"read_file\"}\n```";
        let ex = ToolCallExtractor::new().extract(text);
        assert!(!ex.found());
        assert_eq!(ex.remaining, text);
    }

    #[test]
    fn test_json_fence_skips_plain_data_block() {
        let text = "Here is the config:\n```json\n{\"debug\": true}\n```\nNow run it:\n```json\n{\"tool\": \"execute\", \"params\": {\"command\": \"make\"}}\n```";
        let ex = ToolCallExtractor::new().extract(text);
        assert_eq!(ex.tool_call.unwrap().params["command"], ParamValue::from("make"));
        assert!(ex.remaining.contains("\"debug\": true"));
        assert!(!ex.remaining.contains("make"));
    }

    #[test]
    fn test_json_fence_keeps_native_types() {
        let text = "```json\n{\"tool\": \"t\", \"params\": {\"n\": \"3\", \"flags\": [true, null], \"opt\": null}}\n```";
        let call = ToolCallExtractor::new().extract(text).tool_call.unwrap();
        // Strings are not coerced in JSON
        assert_eq!(call.params["n"], ParamValue::from("3"));
        assert_eq!(call.params["flags"], ParamValue::List(vec![ParamValue::Bool(true)]));
        assert!(!call.params.contains_key("opt"));
    }

    #[test]
    fn test_shell_fence() {
        let text = "I'll list the files.\n```bash\nls -la\n```";
        let ex = ToolCallExtractor::new().extract(text);
        let call = ex.tool_call.unwrap();
        assert_eq!(call.tool_name, "execute");
        assert_eq!(call.params["command"], ParamValue::from("ls -la"));
        assert_eq!(ex.remaining, "I'll list the files.");
    }

    #[test]
    fn test_shell_fence_tags() {
        for tag in ["sh", "shell", "terminal", "console"] {
            let text = format!("```{tag}\npwd\n```");
            let call = ToolCallExtractor::new().extract(&text).tool_call;
            assert_eq!(call.unwrap().str_param("command"), Some("pwd"), "tag {tag}");
        }
    }

    #[test]
    fn test_shell_fence_empty_body_ignored() {
        let text = "```bash\n   \n```";
        assert!(!ToolCallExtractor::new().extract(text).found());
    }

    #[test]
    fn test_other_fence_languages_ignored() {
        let text = "```python\nprint('hi')\n```";
        let ex = ToolCallExtractor::new().extract(text);
        assert!(!ex.found());
        assert_eq!(ex.remaining, text);
    }

    #[test]
    fn test_json_wins_over_xml() {
        let text = "<tool><name>read_file</name><params><path>x</path></params></tool>\n```json\n{\"tool\": \"execute\", \"params\": {\"command\": \"ls\"}}\n```";
        let ex = ToolCallExtractor::new().extract(text);
        assert_eq!(ex.tool_call.unwrap().tool_name, "execute");
        assert!(ex.remaining.starts_with("<tool>"));
    }

    #[test]
    fn test_no_block_leaves_text_unchanged() {
        let text = "  The answer is 42.\n";
        let ex = ToolCallExtractor::new().extract(text);
        assert!(!ex.found());
        assert_eq!(ex.remaining, text);
        assert!(ex.decoder.is_none());
    }

    #[test]
    fn test_custom_chain() {
        let extractor = ToolCallExtractor::with_decoders(vec![Box::new(ShellFenceDecoder)]);
        assert_eq!(extractor.decoder_names(), vec!["shell_fence"]);
        let text = "```json\n{\"tool\": \"t\", \"params\": {}}\n```";
        assert!(!extractor.extract(text).found());
    }

    #[test]
    fn test_default_chain_order() {
        assert_eq!(
            ToolCallExtractor::new().decoder_names(),
            vec!["json_fence", "shell_fence", "xml_structural", "xml_pattern", "xml_inline_json"]
        );
    }
}
