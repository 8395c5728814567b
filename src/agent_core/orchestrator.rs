//! Orchestration loop: generate → extract → permission → execute → regenerate.
//!
//! One call to [`Agent::process_message`] is one user turn:
//! 1. **Generate** — the context is flattened into a (system, transcript)
//!    prompt pair and sent to the language model.
//! 2. **Extract** — the reply is scanned for a tool call. None means the reply
//!    is the final answer.
//! 3. **Permission / Execute** — the call is recorded, looked up, validated,
//!    approved and run. Every failure here is fed back to the model as a
//!    tool error rather than aborting the turn.
//! 4. **Regenerate** — the model sees the result and answers again; the loop
//!    repeats up to the tool-call ceiling.
//!
//! Every suspension point (generation, approval, tool execution) is raced
//! against the caller's cancellation token.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::conversation::ConversationContext;
use super::errors::AgentError;
use super::permissions::PermissionManager;
use super::registry::ToolRegistry;
use super::tokens::tail_utf8;
use super::types::{params_to_json, FormattedMessage, Role, ToolCall};
use crate::inference::client::LanguageModel;
use crate::inference::tool_call_parser::ToolCallExtractor;
use crate::inference::types::GenerateOptions;

// ─── Constants ──────────────────────────────────────────────────────────────

/// Default maximum number of tool calls per user message.
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Default cap on the accumulated response text (bytes, tail kept).
pub const DEFAULT_MAX_RESPONSE_CHARS: usize = 32_000;

/// Appended when the ceiling stops a turn with a tool call still pending.
pub const ITERATION_LIMIT_NOTICE: &str = "\
[I reached the maximum number of tool calls for this request and could not \
fully resolve it. You can ask me to continue.]";

// ─── Types ──────────────────────────────────────────────────────────────────

/// Loop state, traced on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    AwaitingUserInput,
    Generating,
    ExtractingToolCall,
    RequestingPermission,
    Executing,
    Done,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoopState::AwaitingUserInput => "awaiting_user_input",
            LoopState::Generating => "generating",
            LoopState::ExtractingToolCall => "extracting_tool_call",
            LoopState::RequestingPermission => "requesting_permission",
            LoopState::Executing => "executing",
            LoopState::Done => "done",
        };
        f.write_str(s)
    }
}

/// Loop tuning.
#[derive(Debug, Clone)]
pub struct AgentLoopConfig {
    /// Tool calls allowed per user message.
    pub max_iterations: usize,
    /// Cap on accumulated response text; older text is dropped first.
    pub max_response_chars: usize,
    /// Context budget in tokens (`0` selects the default).
    pub context_max_tokens: u32,
    /// Model, sampling and timeout for every generation.
    pub generation: GenerateOptions,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_response_chars: DEFAULT_MAX_RESPONSE_CHARS,
            context_max_tokens: 0,
            generation: GenerateOptions::default(),
        }
    }
}

// ─── Agent ──────────────────────────────────────────────────────────────────

/// A tool-using agent session.
pub struct Agent {
    model: Arc<dyn LanguageModel>,
    tools: Arc<ToolRegistry>,
    permissions: Arc<PermissionManager>,
    context: Arc<ConversationContext>,
    extractor: ToolCallExtractor,
    config: AgentLoopConfig,
}

impl Agent {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        tools: Arc<ToolRegistry>,
        permissions: Arc<PermissionManager>,
        config: AgentLoopConfig,
    ) -> Self {
        let context = Arc::new(ConversationContext::new(config.context_max_tokens));
        Self {
            model,
            tools,
            permissions,
            context,
            extractor: ToolCallExtractor::new(),
            config,
        }
    }

    /// Use an existing (possibly shared) context instead of a fresh one.
    pub fn with_context(mut self, context: Arc<ConversationContext>) -> Self {
        self.context = context;
        self
    }

    /// Replace the default decoder chain.
    pub fn with_extractor(mut self, extractor: ToolCallExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    // ─── Caller Surface ─────────────────────────────────────────────────

    pub fn context(&self) -> &Arc<ConversationContext> {
        &self.context
    }

    pub fn permissions(&self) -> &Arc<PermissionManager> {
        &self.permissions
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn config(&self) -> &AgentLoopConfig {
        &self.config
    }

    pub fn add_system_message(&self, text: &str) {
        self.context.add_system_message(text);
    }

    /// Forget the conversation but keep system messages.
    pub fn clear_context(&self) {
        self.context.clear();
    }

    pub fn set_model(&mut self, model: &str) {
        tracing::info!(model, "model changed");
        self.config.generation.model = model.to_string();
    }

    pub fn set_temperature(&mut self, temperature: f32) {
        self.config.generation.temperature = temperature;
    }

    pub fn set_max_tokens(&mut self, max_tokens: u32) {
        self.config.generation.max_tokens = max_tokens;
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.config.generation.timeout = timeout;
    }

    /// Run one user turn to completion and return the final answer.
    ///
    /// Only the first generation of the turn is fatal on failure; later
    /// failures end the turn with the best text produced so far.
    pub async fn process_message(
        &self,
        cancel: &CancellationToken,
        text: &str,
    ) -> Result<String, AgentError> {
        trace_state(LoopState::AwaitingUserInput, 0);
        self.context.add_user_message(text);

        trace_state(LoopState::Generating, 0);
        let mut response = self.generate(cancel).await?;
        let mut iterations = 0usize;

        let final_text = loop {
            response = self.cap_response(response);

            trace_state(LoopState::ExtractingToolCall, iterations);
            let extraction = self.extractor.extract(&response);
            let Some(call) = extraction.tool_call else {
                break response;
            };
            let leftover = extraction.remaining;

            if iterations >= self.config.max_iterations {
                tracing::warn!(
                    iterations,
                    tool = %call.tool_name,
                    "tool call limit reached, ending turn"
                );
                let base = if leftover.is_empty() { response } else { leftover };
                break format!("{base}\n\n{ITERATION_LIMIT_NOTICE}");
            }
            iterations += 1;

            self.context
                .add_tool_call_message(&call.tool_name, call.params.clone());

            match self.run_tool(cancel, &call, iterations).await {
                Ok(value) => self.context.add_tool_result_message(value, None),
                Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
                Err(e) => {
                    tracing::info!(tool = %call.tool_name, error = %e, "tool call failed");
                    self.context
                        .add_tool_result_message(serde_json::Value::Null, Some(e.to_string()));
                }
            }

            trace_state(LoopState::Generating, iterations);
            match self.generate(cancel).await {
                Ok(next) if leftover.is_empty() => response = next,
                Ok(next) => response = format!("{leftover}\n\n{next}"),
                Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
                Err(e) => {
                    tracing::warn!(error = %e, iterations, "follow-up generation failed");
                    break if leftover.is_empty() { response } else { leftover };
                }
            }
        };

        self.context.add_assistant_message(&final_text);
        trace_state(LoopState::Done, iterations);
        tracing::info!(
            iterations,
            response_len = final_text.len(),
            tokens = self.context.current_tokens(),
            "turn complete"
        );

        Ok(final_text)
    }

    // ─── Steps ──────────────────────────────────────────────────────────

    /// One model call, bounded by the timeout and the cancellation token.
    async fn generate(&self, cancel: &CancellationToken) -> Result<String, AgentError> {
        let (system_prompt, user_prompt) = flatten_prompt(&self.context.formatted_messages());
        let options = &self.config.generation;
        let call = self.model.generate(&system_prompt, &user_prompt, options);

        tokio::select! {
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            res = timeout(options.timeout, call) => match res {
                Ok(Ok(text)) => Ok(text),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(AgentError::GenerationFailed {
                    reason: format!("generation timed out after {}s", options.timeout.as_secs()),
                }),
            },
        }
    }

    /// Look up, validate, approve and execute one call.
    ///
    /// `Cancelled` must abort the turn; every other error becomes the
    /// recorded tool result.
    async fn run_tool(
        &self,
        cancel: &CancellationToken,
        call: &ToolCall,
        iteration: usize,
    ) -> Result<serde_json::Value, AgentError> {
        let tool_name = call.tool_name.as_str();

        let tool = self
            .tools
            .get_tool(tool_name)
            .ok_or_else(|| AgentError::ToolNotFound {
                tool_name: tool_name.to_string(),
            })?;

        tool.validate_params(&call.params)
            .map_err(|reason| AgentError::InvalidToolParams {
                tool_name: tool_name.to_string(),
                reason,
            })?;

        trace_state(LoopState::RequestingPermission, iteration);
        let granted = self
            .permissions
            .request_permission(cancel, tool_name, &call.params, tool.describe_call(&call.params))
            .await?;
        if !granted {
            return Err(AgentError::PermissionDenied {
                tool_name: tool_name.to_string(),
            });
        }

        trace_state(LoopState::Executing, iteration);
        tokio::select! {
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            res = tool.execute(cancel, &call.params) => res.map_err(|reason| {
                AgentError::ToolExecutionFailed {
                    tool_name: tool_name.to_string(),
                    reason,
                }
            }),
        }
    }

    fn cap_response(&self, response: String) -> String {
        if response.len() <= self.config.max_response_chars {
            return response;
        }
        tracing::warn!(
            len = response.len(),
            max = self.config.max_response_chars,
            "response too long, keeping the tail"
        );
        tail_utf8(&response, self.config.max_response_chars).to_string()
    }
}

fn trace_state(state: LoopState, iteration: usize) {
    tracing::debug!(state = %state, iteration, "agent loop transition");
}

// ─── Prompt Flattening ──────────────────────────────────────────────────────

/// Flatten formatted messages into `(system_prompt, user_prompt)`.
///
/// System messages are joined with blank lines. Everything else becomes a
/// `User:` / `Assistant:` / `Tool:` transcript that ends with `Assistant:` so
/// the model continues as the assistant.
pub fn flatten_prompt(messages: &[FormattedMessage]) -> (String, String) {
    let system_prompt = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut turns: Vec<String> = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| {
            let prefix = match m.role {
                Role::User => "User:",
                Role::Tool => "Tool:",
                _ => "Assistant:",
            };
            match m.tool_call {
                Some(ref call) => {
                    let json = serde_json::json!({
                        "tool": call.tool_name,
                        "params": params_to_json(&call.params),
                    });
                    format!("{prefix} {}\n```json\n{json}\n```", m.content)
                }
                None => format!("{prefix} {}", m.content),
            }
        })
        .collect();
    turns.push("Assistant:".to_string());

    (system_prompt, turns.join("\n\n"))
}

// ─── Tests ──────────────────────────────────────────────────────────────────
