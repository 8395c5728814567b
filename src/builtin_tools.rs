//! Built-in tools for the `localagent` binary.
//!
//! - `execute`: runs a shell command and returns stdout, stderr and exit code
//! - `read_file`: returns a text file's contents
//!
//! Both stay small on purpose. Any safety policy is the permission manager's
//! job (`execute` asks every time by default).

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::agent_core::registry::Tool;
use crate::agent_core::tokens::truncate_utf8;
use crate::agent_core::types::Params;
use crate::inference::tool_call_parser::SHELL_TOOL;

/// Per-stream cap on captured command output.
const MAX_OUTPUT_BYTES: usize = 16 * 1024;

/// Commands that run longer than this are killed.
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 60;

/// Default cap for `read_file`.
const DEFAULT_READ_LIMIT_BYTES: usize = 64 * 1024;

// ─── execute ─────────────────────────────────────────────────────────────────

/// Runs a command through `sh -c`.
pub struct ExecuteTool {
    timeout: Duration,
}

impl ExecuteTool {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ExecuteTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ExecuteTool {
    fn name(&self) -> &str {
        SHELL_TOOL
    }

    fn description(&self) -> &str {
        "Run a shell command and return its stdout, stderr and exit code"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Command line passed to sh -c" },
                "cwd": { "type": "string", "description": "Working directory" }
            },
            "required": ["command"]
        })
    }

    fn validate_params(&self, params: &Params) -> Result<(), String> {
        match params.get("command").and_then(|v| v.as_str()) {
            Some(cmd) if !cmd.trim().is_empty() => Ok(()),
            Some(_) => Err("'command' must not be empty".into()),
            None => Err("missing required field: 'command'".into()),
        }
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        params: &Params,
    ) -> Result<serde_json::Value, String> {
        let command = params
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or("missing required field: 'command'")?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        if let Some(cwd) = params.get("cwd").and_then(|v| v.as_str()) {
            cmd.current_dir(cwd);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // Dropping the future (timeout, cancel) must not leave the child running
        cmd.kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| format!("failed to spawn command: {e}"))?;

        tracing::info!(command = %command, "executing shell command");

        let output = tokio::select! {
            _ = cancel.cancelled() => {
                return Err("command cancelled".into());
            }
            res = tokio::time::timeout(self.timeout, child.wait_with_output()) => {
                match res {
                    Ok(Ok(output)) => output,
                    Ok(Err(e)) => return Err(format!("failed to wait for command: {e}")),
                    Err(_) => {
                        tracing::warn!(
                            command = %command,
                            timeout_secs = self.timeout.as_secs(),
                            "command timed out"
                        );
                        return Err(format!(
                            "command timed out after {}s",
                            self.timeout.as_secs()
                        ));
                    }
                }
            }
        };

        let exit_code = output.status.code();
        tracing::debug!(command = %command, ?exit_code, "command finished");

        Ok(json!({
            "stdout": capture(&output.stdout),
            "stderr": capture(&output.stderr),
            "exit_code": exit_code,
        }))
    }
}

/// Decode a captured stream, capped at `MAX_OUTPUT_BYTES`.
fn capture(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= MAX_OUTPUT_BYTES {
        return text.into_owned();
    }
    format!(
        "{}\n[output truncated, {} bytes total]",
        truncate_utf8(&text, MAX_OUTPUT_BYTES),
        text.len()
    )
}

// ─── read_file ───────────────────────────────────────────────────────────────

/// Reads a file as (lossy) UTF-8 text.
#[derive(Default)]
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a text file"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Absolute path (~ is expanded)" },
                "max_bytes": { "type": "integer", "description": "Maximum bytes to return" }
            },
            "required": ["path"]
        })
    }

    async fn execute(
        &self,
        _cancel: &CancellationToken,
        params: &Params,
    ) -> Result<serde_json::Value, String> {
        let raw_path = params
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or("'path' must be a string")?;
        let limit = match params.get("max_bytes").and_then(|v| v.as_i64()) {
            Some(n) if n > 0 => n as usize,
            Some(n) => return Err(format!("'max_bytes' must be positive, got {n}")),
            None => DEFAULT_READ_LIMIT_BYTES,
        };

        let path = expand_home(raw_path);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| format!("cannot read {}: {e}", path.display()))?;

        tracing::debug!(path = %path.display(), bytes = bytes.len(), "read file");

        let text = String::from_utf8_lossy(&bytes);
        if text.len() <= limit {
            return Ok(serde_json::Value::String(text.into_owned()));
        }
        Ok(serde_json::Value::String(format!(
            "{}\n[truncated, {} of {} bytes shown]",
            truncate_utf8(&text, limit),
            truncate_utf8(&text, limit).len(),
            text.len()
        )))
    }
}

fn expand_home(path: &str) -> std::path::PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    std::path::PathBuf::from(path)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
