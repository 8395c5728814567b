//! ConversationContext — in-memory conversation history with token-budget enforcement.
//!
//! Responsibilities:
//! - Store the ordered message history for one agent session
//! - Track the estimated token cost of every message
//! - Enforce the context budget by evicting older non-system messages
//! - Build `Vec<FormattedMessage>` for the language model client
//!
//! All state sits behind one mutex so a context can be shared through `Arc`.
//! The lock is only held for the duration of a single call.

use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use super::tokens;
use super::types::{FormattedMessage, Message, Params, Role, ToolCall, ToolResult};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Budget used when the caller passes `0`.
pub const DEFAULT_MAX_TOKENS: u32 = 4_000;

// ─── State ──────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct ContextState {
    messages: Vec<Message>,
    max_tokens: u32,
    current_tokens: u32,
    truncate: bool,
}

impl ContextState {
    fn push(&mut self, mut message: Message) {
        message.token_count = tokens::estimate_message_tokens(&message);
        self.current_tokens = self.current_tokens.saturating_add(message.token_count);
        self.messages.push(message);
        self.truncate_if_needed();
    }

    fn recompute_tokens(&mut self) {
        self.current_tokens = self.messages.iter().map(|m| m.token_count).sum();
    }

    /// Evict older non-system messages until the budget is met.
    ///
    /// System messages are always kept in full. Non-system messages are
    /// walked newest → oldest; a message that does not fit the remaining
    /// budget is skipped and the walk continues with older ones.
    fn truncate_if_needed(&mut self) -> usize {
        if !self.truncate || self.current_tokens <= self.max_tokens {
            return 0;
        }

        let (system, rest): (Vec<Message>, Vec<Message>) = std::mem::take(&mut self.messages)
            .into_iter()
            .partition(|m| m.role == Role::System);

        let system_tokens: u32 = system.iter().map(|m| m.token_count).sum();
        let mut remaining = self.max_tokens.saturating_sub(system_tokens);

        let before = rest.len();
        let mut kept: Vec<Message> = Vec::with_capacity(rest.len());
        for msg in rest.into_iter().rev() {
            if msg.token_count <= remaining {
                remaining -= msg.token_count;
                kept.push(msg);
            }
        }
        kept.reverse();
        let evicted = before - kept.len();

        self.messages = system;
        self.messages.extend(kept);
        self.recompute_tokens();

        tracing::debug!(
            evicted,
            kept = self.messages.len(),
            tokens = self.current_tokens,
            max_tokens = self.max_tokens,
            "context truncated"
        );

        evicted
    }
}

// ─── ConversationContext ────────────────────────────────────────────────────

/// Ordered, token-bounded message history.
#[derive(Debug)]
pub struct ConversationContext {
    state: Mutex<ContextState>,
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TOKENS)
    }
}

impl ConversationContext {
    /// Create an empty context. `max_tokens == 0` selects the default budget.
    pub fn new(max_tokens: u32) -> Self {
        Self {
            state: Mutex::new(ContextState {
                messages: Vec::new(),
                max_tokens: effective_budget(max_tokens),
                current_tokens: 0,
                truncate: true,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ContextState> {
        // A panic while holding the lock cannot leave the history half-written
        // (every mutation is a single push or swap), so poisoning is ignored.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ─── Appending ──────────────────────────────────────────────────────

    pub fn add_system_message(&self, text: &str) {
        self.lock().push(new_message(Role::System, text));
    }

    pub fn add_user_message(&self, text: &str) {
        self.lock().push(new_message(Role::User, text));
    }

    pub fn add_assistant_message(&self, text: &str) {
        self.lock().push(new_message(Role::Assistant, text));
    }

    /// Record that the assistant requested a tool.
    pub fn add_tool_call_message(&self, tool_name: &str, params: Params) {
        let mut msg = new_message(Role::Assistant, &tool_call_sentence(tool_name));
        msg.tool_call = Some(ToolCall::new(tool_name, params));
        self.lock().push(msg);
    }

    /// Record a tool's outcome. `error` marks the call as failed; any partial
    /// `result` is kept alongside it.
    pub fn add_tool_result_message(&self, result: serde_json::Value, error: Option<String>) {
        let mut msg = new_message(Role::Tool, "");
        msg.tool_result = Some(ToolResult { result, error });
        self.lock().push(msg);
    }

    // ─── Maintenance ────────────────────────────────────────────────────

    /// Drop every non-system message.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.messages.retain(|m| m.role == Role::System);
        state.recompute_tokens();
    }

    /// Enforce the budget now. Returns the number of evicted messages.
    pub fn truncate_if_needed(&self) -> usize {
        self.lock().truncate_if_needed()
    }

    /// Change the budget and re-truncate. `0` selects the default.
    pub fn set_max_tokens(&self, max_tokens: u32) {
        let mut state = self.lock();
        state.max_tokens = effective_budget(max_tokens);
        state.truncate_if_needed();
    }

    /// Enable or disable truncation. Disabling lets the history grow unbounded.
    pub fn set_truncation(&self, enabled: bool) {
        self.lock().truncate = enabled;
    }

    // ─── Queries ────────────────────────────────────────────────────────

    /// Messages in the shape the language model client consumes.
    pub fn formatted_messages(&self) -> Vec<FormattedMessage> {
        self.lock().messages.iter().map(format_message).collect()
    }

    /// Snapshot of the raw history.
    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().messages.is_empty()
    }

    pub fn current_tokens(&self) -> u32 {
        self.lock().current_tokens
    }

    pub fn max_tokens(&self) -> u32 {
        self.lock().max_tokens
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn effective_budget(max_tokens: u32) -> u32 {
    if max_tokens == 0 {
        DEFAULT_MAX_TOKENS
    } else {
        max_tokens
    }
}

fn new_message(role: Role, content: &str) -> Message {
    Message {
        role,
        content: content.to_string(),
        tool_call: None,
        tool_result: None,
        timestamp: Utc::now(),
        token_count: 0,
    }
}

/// Natural-language stand-in for a tool-call message.
pub fn tool_call_sentence(tool_name: &str) -> String {
    format!("I'll use the {tool_name} tool.")
}

fn format_message(msg: &Message) -> FormattedMessage {
    let content = match msg.tool_result {
        Some(ref result) => render_tool_result(result),
        None => msg.content.clone(),
    };
    FormattedMessage {
        role: msg.role,
        content,
        tool_call: msg.tool_call.clone(),
    }
}

/// Render a tool result for the model.
///
/// Strings are inserted verbatim; other values are pretty-printed JSON.
pub fn render_tool_result(result: &ToolResult) -> String {
    if let Some(ref err) = result.error {
        return format!("<tool_error>\n{err}\n</tool_error>");
    }
    let body = match result.result {
        serde_json::Value::String(ref s) => s.clone(),
        ref other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    };
    format!("<tool_result>\n{body}\n</tool_result>")
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::types::ParamValue;

    #[test]
    fn test_zero_budget_uses_default() {
        let ctx = ConversationContext::new(0);
        assert_eq!(ctx.max_tokens(), DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn test_add_messages_tracks_tokens() {
        let ctx = ConversationContext::new(1_000);
        ctx.add_system_message("You are helpful.");
        ctx.add_user_message("Hello, world!");
        ctx.add_assistant_message("Hi!");

        assert_eq!(ctx.len(), 3);
        let total: u32 = ctx.messages().iter().map(|m| m.token_count).sum();
        assert_eq!(ctx.current_tokens(), total);
        // "Hello, world!" → 4 + ceil(13/4)
        assert_eq!(ctx.messages()[1].token_count, 8);
    }

    #[test]
    fn test_add_tool_call_and_result() {
        let ctx = ConversationContext::new(1_000);
        let mut params = Params::new();
        params.insert("command".into(), ParamValue::from("ls -la"));
        ctx.add_tool_call_message("execute", params.clone());
        ctx.add_tool_result_message(serde_json::json!("file_a\nfile_b"), None);

        let msgs = ctx.messages();
        assert_eq!(msgs[0].role, Role::Assistant);
        assert_eq!(msgs[0].content, "I'll use the execute tool.");
        assert_eq!(msgs[0].tool_call.as_ref().unwrap().params, params);
        assert!(msgs[0].tool_result.is_none());

        assert_eq!(msgs[1].role, Role::Tool);
        assert!(msgs[1].tool_call.is_none());
        assert!(!msgs[1].tool_result.as_ref().unwrap().is_error());
    }

    #[test]
    fn test_tool_result_with_error_keeps_value() {
        let ctx = ConversationContext::new(1_000);
        ctx.add_tool_result_message(serde_json::json!({"partial": true}), Some("boom".into()));
        let result = ctx.messages()[0].tool_result.clone().unwrap();
        assert_eq!(result.result, serde_json::json!({"partial": true}));
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert!(result.is_error());

        // The model still sees only the error
        let formatted = ctx.formatted_messages();
        assert_eq!(formatted[0].content, "<tool_error>\nboom\n</tool_error>");
    }

    #[test]
    fn test_formatted_messages_render_results() {
        let ctx = ConversationContext::new(1_000);
        ctx.add_tool_result_message(serde_json::json!("plain text"), None);
        ctx.add_tool_result_message(serde_json::json!({"count": 2}), None);
        ctx.add_tool_result_message(serde_json::Value::Null, Some("no such file".into()));

        let formatted = ctx.formatted_messages();
        assert_eq!(formatted[0].content, "<tool_result>\nplain text\n</tool_result>");
        assert_eq!(
            formatted[1].content,
            "<tool_result>\n{\n  \"count\": 2\n}\n</tool_result>"
        );
        assert_eq!(formatted[2].content, "<tool_error>\nno such file\n</tool_error>");
    }

    #[test]
    fn test_formatted_tool_call_keeps_structure() {
        let ctx = ConversationContext::new(1_000);
        ctx.add_tool_call_message("read_file", Params::new());
        let formatted = ctx.formatted_messages();
        assert_eq!(formatted[0].content, "I'll use the read_file tool.");
        assert_eq!(formatted[0].tool_call.as_ref().unwrap().tool_name, "read_file");
    }

    #[test]
    fn test_clear_keeps_only_system_messages() {
        let ctx = ConversationContext::new(1_000);
        ctx.add_system_message("rule one");
        ctx.add_user_message("question");
        ctx.add_system_message("rule two");
        ctx.add_assistant_message("answer");

        ctx.clear();

        let formatted = ctx.formatted_messages();
        assert_eq!(formatted.len(), 2);
        assert!(formatted.iter().all(|m| m.role == Role::System));
        assert_eq!(formatted[0].content, "rule one");
        assert_eq!(formatted[1].content, "rule two");
        let system_tokens: u32 = ctx.messages().iter().map(|m| m.token_count).sum();
        assert_eq!(ctx.current_tokens(), system_tokens);
    }

    #[test]
    fn test_truncation_keeps_system_and_order() {
        // Each 40-char message costs 4 + 10 = 14 tokens
        let ctx = ConversationContext::new(50);
        ctx.add_system_message(&"s".repeat(40));
        for i in 0..6 {
            ctx.add_user_message(&format!("{i}{}", "u".repeat(39)));
        }

        let msgs = ctx.messages();
        assert_eq!(msgs[0].role, Role::System);
        // 50 - 14 = 36 left → two 14-token messages fit
        assert_eq!(msgs.len(), 3);
        assert!(msgs[1].content.starts_with('4'));
        assert!(msgs[2].content.starts_with('5'));
        assert!(ctx.current_tokens() <= 50);
    }

    #[test]
    fn test_truncation_skips_oversized_and_keeps_walking() {
        let ctx = ConversationContext::new(1_000);
        ctx.add_user_message("old small"); // 4 + 3 = 7
        ctx.add_user_message(&"x".repeat(200)); // 4 + 50 = 54
        ctx.add_user_message("new small"); // 7

        ctx.set_max_tokens(20);

        let contents: Vec<String> = ctx.messages().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["old small".to_string(), "new small".to_string()]);
        assert_eq!(ctx.current_tokens(), 14);
    }

    #[test]
    fn test_system_messages_survive_even_over_budget() {
        let ctx = ConversationContext::new(10);
        ctx.add_system_message(&"s".repeat(100));
        ctx.add_user_message("hi");

        let msgs = ctx.messages();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].role, Role::System);
    }

    #[test]
    fn test_truncation_disabled() {
        let ctx = ConversationContext::new(10);
        ctx.set_truncation(false);
        for _ in 0..5 {
            ctx.add_user_message("a fairly long user message");
        }
        assert_eq!(ctx.len(), 5);
        assert!(ctx.current_tokens() > 10);

        ctx.set_truncation(true);
        assert!(ctx.truncate_if_needed() > 0);
        assert!(ctx.current_tokens() <= 10);
    }

    #[test]
    fn test_truncate_noop_under_budget() {
        let ctx = ConversationContext::new(1_000);
        ctx.add_user_message("hi");
        assert_eq!(ctx.truncate_if_needed(), 0);
        assert_eq!(ctx.len(), 1);
    }
}
