//! XML tool call decoding.
//!
//! Models trained on XML-style tool use emit:
//! ```text
//! <tool>
//!   <name>read_file</name>
//!   <params>
//!     <path>notes.md</path>
//!   </params>
//! </tool>
//! ```
//!
//! The block is the first `<tool>` up to the first following `</tool>`. Three
//! decoders look at it, in order of strictness:
//!
//! - **structural** — an event-based XML parse; nested params become maps and
//!   repeated params become lists. Any XML error means no match.
//! - **pattern** — regex search for `<name>` and `<params>` that tolerates
//!   sloppy markup (unescaped `&`, stray tags).
//! - **inline JSON** — `<tool>{"name": …, "params": {…}}</tool>`.
//!
//! Scalar text values are coerced: `true`/`false` to booleans, integers and
//! decimals to numbers, everything else stays a string.

use std::ops::Range;
use std::sync::LazyLock;

use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;

use super::tool_call_parser::{call_from_json, DecodedCall, ToolCallDecoder};
use crate::agent_core::types::{ParamValue, Params, ToolCall};

const OPEN_TAG: &str = "<tool>";
const CLOSE_TAG: &str = "</tool>";

/// Byte range of the first `<tool>` … `</tool>` block, tags included.
pub(crate) fn find_tool_span(text: &str) -> Option<Range<usize>> {
    let start = text.find(OPEN_TAG)?;
    let close = text[start + OPEN_TAG.len()..].find(CLOSE_TAG)?;
    let end = start + OPEN_TAG.len() + close + CLOSE_TAG.len();
    Some(start..end)
}

/// Content between the tags of a block returned by [`find_tool_span`].
fn inner(text: &str, span: &Range<usize>) -> String {
    text[span.start + OPEN_TAG.len()..span.end - CLOSE_TAG.len()].to_string()
}

fn is_name_tag(tag: &str) -> bool {
    tag == "name" || tag == "n"
}

// ─── Coercion ────────────────────────────────────────────────────────────────

/// Coerce XML text into a typed value. Empty text yields `None`.
pub fn coerce_scalar(raw: &str) -> Option<ParamValue> {
    static INT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^-?\d+$").expect("valid regex"));
    static FLOAT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^-?\d+\.\d+$").expect("valid regex"));

    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    match s {
        "true" => return Some(ParamValue::Bool(true)),
        "false" => return Some(ParamValue::Bool(false)),
        _ => {}
    }
    if INT_RE.is_match(s) {
        if let Ok(i) = s.parse::<i64>() {
            return Some(ParamValue::Int(i));
        }
    }
    if FLOAT_RE.is_match(s) {
        if let Ok(f) = s.parse::<f64>() {
            return Some(ParamValue::Float(f));
        }
    }
    Some(ParamValue::String(s.to_string()))
}

/// Insert, turning a repeated key into a list of all its values.
fn insert_accumulating(params: &mut Params, key: String, value: ParamValue) {
    match params.get_mut(&key) {
        Some(ParamValue::List(items)) => items.push(value),
        Some(existing) => {
            let first = std::mem::replace(existing, ParamValue::List(Vec::new()));
            *existing = ParamValue::List(vec![first, value]);
        }
        None => {
            params.insert(key, value);
        }
    }
}

// ─── Structural ──────────────────────────────────────────────────────────────

/// An element with its direct text and children.
#[derive(Debug, Default)]
struct Node {
    tag: String,
    text: String,
    children: Vec<Node>,
}

impl Node {
    fn child(&self, pred: impl Fn(&str) -> bool) -> Option<&Node> {
        self.children.iter().find(|c| pred(&c.tag))
    }

    /// Leaf → coerced scalar; element with children → map of its children.
    fn value(&self) -> Option<ParamValue> {
        if self.children.is_empty() {
            return coerce_scalar(&self.text);
        }
        let mut map = Params::new();
        for c in &self.children {
            if let Some(v) = c.value() {
                insert_accumulating(&mut map, c.tag.clone(), v);
            }
        }
        (!map.is_empty()).then_some(ParamValue::Map(map))
    }
}

/// Parse a well-formed XML fragment into a single root node.
fn parse_tree(xml: &str) -> Option<Node> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Node> = Vec::new();
    let mut root: Option<Node> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if root.is_some() {
                    return None;
                }
                stack.push(Node {
                    tag: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                    ..Node::default()
                });
            }
            Ok(Event::End(e)) => {
                let node = stack.pop()?;
                if node.tag.as_bytes() != e.name().as_ref() {
                    return None;
                }
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = Some(node),
                }
            }
            Ok(Event::Empty(e)) => {
                let node = Node {
                    tag: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                    ..Node::default()
                };
                stack.last_mut()?.children.push(node);
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().ok()?;
                stack.last_mut()?.text.push_str(&text);
            }
            Ok(Event::CData(c)) => {
                let raw = c.into_inner();
                stack.last_mut()?.text.push_str(&String::from_utf8_lossy(&raw));
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "tool block is not well-formed XML");
                return None;
            }
        }
    }

    if !stack.is_empty() {
        return None;
    }
    root
}

/// Event-based parse of the `<tool>` block.
pub struct StructuralXmlDecoder;

impl ToolCallDecoder for StructuralXmlDecoder {
    fn name(&self) -> &'static str {
        "xml_structural"
    }

    fn try_decode(&self, text: &str) -> Option<DecodedCall> {
        let span = find_tool_span(text)?;
        let root = parse_tree(&text[span.clone()])?;
        if root.tag != "tool" {
            return None;
        }

        let name = root.child(is_name_tag)?.text.trim().to_string();
        if name.is_empty() {
            return None;
        }

        let mut params = Params::new();
        if let Some(section) = root.child(|t| t == "params") {
            for p in &section.children {
                if let Some(v) = p.value() {
                    insert_accumulating(&mut params, p.tag.clone(), v);
                }
            }
        }

        Some(DecodedCall {
            call: ToolCall::new(name, params),
            span,
        })
    }
}

// ─── Pattern ─────────────────────────────────────────────────────────────────

/// Decode the five predefined XML entities.
fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Text of the first `<tag>…</tag>` (not nesting-aware).
fn first_element<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = text.find(&open)? + open.len();
    let len = text[start..].find(&close)?;
    Some(&text[start..start + len])
}

/// The tool body with its first `<params>…</params>` section cut out.
fn without_params(body: &str) -> String {
    let Some(start) = body.find("<params>") else {
        return body.to_string();
    };
    match body[start..].find("</params>") {
        Some(len) => format!("{}{}", &body[..start], &body[start + len + "</params>".len()..]),
        None => body[..start].to_string(),
    }
}

/// First-level `<key>value</key>` pairs, left to right.
fn scan_children(section: &str) -> Vec<(String, String)> {
    static OPEN_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"<([A-Za-z_][\w.\-]*)>").expect("valid regex"));

    let mut out = Vec::new();
    let mut pos = 0;
    while let Some(caps) = OPEN_RE.captures(&section[pos..]) {
        let (Some(whole), Some(tag)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        let body_start = pos + whole.end();
        let close = format!("</{}>", tag.as_str());
        match section[body_start..].find(&close) {
            Some(len) => {
                out.push((
                    tag.as_str().to_string(),
                    section[body_start..body_start + len].to_string(),
                ));
                pos = body_start + len + close.len();
            }
            // Unclosed child: skip the open tag and keep scanning
            None => pos = body_start,
        }
    }
    out
}

/// Regex-level fallback for sloppy markup.
pub struct PatternXmlDecoder;

impl ToolCallDecoder for PatternXmlDecoder {
    fn name(&self) -> &'static str {
        "xml_pattern"
    }

    fn try_decode(&self, text: &str) -> Option<DecodedCall> {
        let span = find_tool_span(text)?;
        let body = inner(text, &span);

        // A parameter may itself be called `name`; only look outside <params>
        let scope = without_params(&body);
        let name = first_element(&scope, "name")
            .or_else(|| first_element(&scope, "n"))
            .map(|n| decode_entities(n.trim()))
            .filter(|n| !n.is_empty())?;

        let section = first_element(&body, "params")?;
        let mut params = Params::new();
        for (key, raw) in scan_children(section) {
            if let Some(v) = coerce_scalar(&decode_entities(&raw)) {
                insert_accumulating(&mut params, key, v);
            }
        }

        Some(DecodedCall {
            call: ToolCall::new(name, params),
            span,
        })
    }
}

// ─── Inline JSON ─────────────────────────────────────────────────────────────

/// `<tool>{"name": "...", "params": {...}}</tool>`.
pub struct LegacyJsonDecoder;

impl ToolCallDecoder for LegacyJsonDecoder {
    fn name(&self) -> &'static str {
        "xml_inline_json"
    }

    fn try_decode(&self, text: &str) -> Option<DecodedCall> {
        let span = find_tool_span(text)?;
        let body = inner(text, &span);
        if !body.contains("\"name\"") {
            return None;
        }
        let value: serde_json::Value = serde_json::from_str(body.trim()).ok()?;
        Some(DecodedCall {
            call: call_from_json(value)?,
            span,
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
