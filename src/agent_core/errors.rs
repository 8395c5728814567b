//! Agent Core error types.

use thiserror::Error;

use crate::inference::errors::InferenceError;

/// Errors that can occur during agent core operations.
///
/// `ToolNotFound`, `InvalidToolParams`, `PermissionDenied` and
/// `ToolExecutionFailed` are not surfaced to the caller: the loop records
/// their Display text as the tool result and lets the model react.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Model output could not be interpreted.
    #[error("invalid response format: {reason}")]
    InvalidResponseFormat { reason: String },

    /// Tool name is not registered.
    #[error("tool not found: '{tool_name}'")]
    ToolNotFound { tool_name: String },

    /// Tool rejected the decoded parameters.
    #[error("invalid parameters for tool '{tool_name}': {reason}")]
    InvalidToolParams { tool_name: String, reason: String },

    /// Policy or user denied the call.
    #[error("permission denied for tool '{tool_name}'")]
    PermissionDenied { tool_name: String },

    /// Tool ran and reported a failure.
    #[error("tool '{tool_name}' execution failed: {reason}")]
    ToolExecutionFailed { tool_name: String, reason: String },

    /// Language model call failed or timed out.
    #[error("generation failed: {reason}")]
    GenerationFailed { reason: String },

    /// Approval callback failed to produce a decision.
    #[error("approval callback failed: {reason}")]
    ApprovalFailed { reason: String },

    /// The turn was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<InferenceError> for AgentError {
    fn from(e: InferenceError) -> Self {
        AgentError::GenerationFailed {
            reason: e.to_string(),
        }
    }
}
