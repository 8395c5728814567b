//! Agent Core — conversation, permissions and the orchestration loop.
//!
//! Submodules:
//! - `conversation`: Conversation history with a token budget
//! - `tokens`: Token estimation for context window budgets
//! - `permissions`: Per-tool permission levels and approval callbacks
//! - `registry`: The `Tool` trait and the name → tool registry
//! - `prompt`: Default system prompt built from the registry
//! - `orchestrator`: Generate → extract → approve → execute loop
//! - `types`: Shared types across the agent core
//! - `errors`: Agent-level error types

pub mod conversation;
pub mod errors;
pub mod orchestrator;
pub mod permissions;
pub mod prompt;
pub mod registry;
pub mod tokens;
pub mod types;

// Re-exports for convenience
pub use conversation::ConversationContext;
pub use errors::AgentError;
pub use orchestrator::{Agent, AgentLoopConfig, LoopState};
pub use permissions::{
    ApprovalCallback, AutoApprove, ChannelApproval, DenyAll, PendingApproval, PermissionLevel,
    PermissionManager, PermissionPolicy,
};
pub use prompt::build_system_prompt;
pub use registry::{Tool, ToolRegistry};
pub use types::{
    FormattedMessage, Message, ParamValue, Params, PermissionRequest, PermissionResponse, Role,
    ToolCall, ToolResult,
};
