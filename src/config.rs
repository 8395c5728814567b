//! Agent configuration loading.
//!
//! Reads `localagent.yaml` and resolves environment variables. Every field has
//! a default, so a missing file or an empty document yields a working setup
//! against a local Ollama server.
//!
//! ```yaml
//! model:
//!   base_url: ${OLLAMA_HOST:-http://localhost:11434}
//!   name: llama3.1
//! agent:
//!   max_iterations: 10
//! permissions:
//!   policies:
//!     execute: always_ask
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::agent_core::orchestrator::{
    AgentLoopConfig, DEFAULT_MAX_ITERATIONS, DEFAULT_MAX_RESPONSE_CHARS,
};
use crate::agent_core::permissions::{PermissionLevel, PermissionManager};
use crate::inference::client::DEFAULT_BASE_URL;
use crate::inference::types::GenerateOptions;

/// File name searched for when no explicit path is given.
pub const CONFIG_FILE_NAME: &str = "localagent.yaml";

/// Env var holding an explicit config path.
pub const CONFIG_ENV_VAR: &str = "LOCALAGENT_CONFIG";

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Configuration loading or validation error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config: {reason}")]
    Parse { reason: String },

    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

// ─── Public Types ────────────────────────────────────────────────────────────

/// Language model endpoint and sampling.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    pub base_url: String,
    pub name: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            name: "llama3.1".to_string(),
            temperature: 0.7,
            max_tokens: 2048,
            timeout_secs: 120,
        }
    }
}

/// Loop and context limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_iterations: usize,
    pub context_max_tokens: u32,
    pub max_response_chars: usize,
    /// Explicit system prompt. When absent one is built from the registered tools.
    pub system_prompt: Option<String>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            context_max_tokens: 4_000,
            max_response_chars: DEFAULT_MAX_RESPONSE_CHARS,
            system_prompt: None,
        }
    }
}

/// Permission persistence and per-tool level overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PermissionsSection {
    /// Save levels and remembered decisions to `path`.
    pub persist: bool,
    /// Defaults to `<data_dir>/permissions.json`.
    pub path: Option<String>,
    pub policies: HashMap<String, PermissionLevel>,
}

impl Default for PermissionsSection {
    fn default() -> Self {
        Self {
            persist: true,
            path: None,
            policies: HashMap::new(),
        }
    }
}

/// Top-level configuration (mirrors `localagent.yaml`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub model: ModelSection,
    pub agent: AgentSection,
    pub permissions: PermissionsSection,
}

impl AgentConfig {
    /// Reject values that would make the agent unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                reason: "model.base_url must not be empty".into(),
            });
        }
        if self.model.name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                reason: "model.name must not be empty".into(),
            });
        }
        if self.model.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                reason: "model.timeout_secs must be positive".into(),
            });
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "model.temperature must be within 0.0..=2.0, got {}",
                    self.model.temperature
                ),
            });
        }
        Ok(())
    }

    /// Generation settings for the language model.
    pub fn generate_options(&self) -> GenerateOptions {
        GenerateOptions {
            model: self.model.name.clone(),
            temperature: self.model.temperature,
            max_tokens: self.model.max_tokens,
            timeout: Duration::from_secs(self.model.timeout_secs),
        }
    }

    /// Loop settings for the agent.
    pub fn loop_config(&self) -> AgentLoopConfig {
        AgentLoopConfig {
            max_iterations: self.agent.max_iterations,
            max_response_chars: self.agent.max_response_chars,
            context_max_tokens: self.agent.context_max_tokens,
            generation: self.generate_options(),
        }
    }

    /// Where permission decisions are saved, if persistence is on.
    pub fn permissions_path(&self) -> Option<PathBuf> {
        if !self.permissions.persist {
            return None;
        }
        Some(match self.permissions.path {
            Some(ref p) => PathBuf::from(expand_tilde(p)),
            None => crate::data_dir().join("permissions.json"),
        })
    }

    /// Build the permission manager and apply configured level overrides.
    pub fn build_permissions(&self) -> PermissionManager {
        let manager = match self.permissions_path() {
            Some(path) => PermissionManager::with_persist_path(path),
            None => PermissionManager::new(),
        };
        for (tool, level) in &self.permissions.policies {
            manager.set_policy(tool, *level);
        }
        manager
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// Checks `LOCALAGENT_CONFIG` first, then searches upward from `start` for
/// `localagent.yaml`. Returns `None` when neither exists.
pub fn find_config_path(start: &Path) -> Option<PathBuf> {
    // 1. Check env var
    if let Ok(explicit) = std::env::var(CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(expand_tilde(&explicit));
        if candidate.exists() {
            return Some(candidate);
        }
        tracing::warn!(path = %candidate.display(), "{CONFIG_ENV_VAR} points to a missing file");
    }

    // 2. Walk upward from `start`
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Some(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    None
}

/// Load and parse a config file.
///
/// Performs environment-variable interpolation on `${VAR_NAME}` and
/// `${VAR_NAME:-default}` before parsing.
pub fn load_config(path: &Path) -> Result<AgentConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let config = parse_config(&raw)?;
    tracing::info!(path = %path.display(), model = %config.model.name, "config loaded");
    Ok(config)
}

/// Parse config text (after env-var interpolation) and validate it.
pub fn parse_config(raw: &str) -> Result<AgentConfig, ConfigError> {
    let interpolated = interpolate_env_vars(raw);

    // An empty document deserializes to unit, not a mapping
    let config: AgentConfig = if interpolated.trim().is_empty() {
        AgentConfig::default()
    } else {
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?
    };

    config.validate()?;
    Ok(config)
}

/// Find and load the config, falling back to defaults when none exists.
pub fn load_or_default() -> Result<AgentConfig, ConfigError> {
    let cwd = std::env::current_dir().unwrap_or_default();
    match find_config_path(&cwd) {
        Some(path) => load_config(&path),
        None => {
            tracing::info!("no {CONFIG_FILE_NAME} found, using defaults");
            Ok(AgentConfig::default())
        }
    }
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((var_name, default)) => {
            std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
        }
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
