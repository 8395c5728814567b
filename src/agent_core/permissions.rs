//! Permission Manager — policy-gated approval for tool execution.
//!
//! Every tool has a policy level:
//! - **NeverAsk** — runs without consulting anyone.
//! - **AskOnce** — asks until a given parameter set is approved once, then
//!   reuses the grant for identical calls.
//! - **AlwaysAsk** — asks on every call unless the user chose "remember".
//!
//! Remembered decisions are keyed by a signature of the call parameters, so
//! approving `ls` does not approve `rm -rf /`. Decisions are collected through
//! an `ApprovalCallback`; adapters for auto-approve, deny-all and a channel
//! pair (for UIs) live here too.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::errors::AgentError;
use super::tokens::truncate_utf8;
use super::types::{ParamValue, Params, PermissionRequest, PermissionResponse};

// ─── Types ──────────────────────────────────────────────────────────────────

/// How often a tool needs the user's approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    /// Ask on every call unless a remembered decision exists.
    AlwaysAsk,
    /// Ask once per distinct parameter set.
    AskOnce,
    /// Never ask.
    NeverAsk,
}

/// Policy for a single tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionPolicy {
    pub tool_name: String,
    pub level: PermissionLevel,
    /// Parameter signature → granted.
    #[serde(default)]
    pub remembered: HashMap<String, bool>,
}

impl PermissionPolicy {
    fn new(tool_name: &str, level: PermissionLevel) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            level,
            remembered: HashMap::new(),
        }
    }
}

/// Tools considered read-only; everything else asks by default.
const NEVER_ASK_TOOLS: &[&str] = &[
    "read_file",
    "list_directory",
    "scan_directory",
    "analyze_directory",
    "calculator",
    "todo_read",
];

/// Built-in default level for a tool that has no stored policy yet.
pub fn default_level(tool_name: &str) -> PermissionLevel {
    if NEVER_ASK_TOOLS.contains(&tool_name) {
        PermissionLevel::NeverAsk
    } else {
        PermissionLevel::AlwaysAsk
    }
}

// ─── Approval Callbacks ─────────────────────────────────────────────────────

/// Collects a yes/no decision for a tool call, usually from a human.
#[async_trait]
pub trait ApprovalCallback: Send + Sync {
    async fn request_approval(
        &self,
        request: PermissionRequest,
    ) -> Result<PermissionResponse, AgentError>;
}

/// Grants everything. For tests and trusted batch runs.
pub struct AutoApprove;

#[async_trait]
impl ApprovalCallback for AutoApprove {
    async fn request_approval(
        &self,
        _request: PermissionRequest,
    ) -> Result<PermissionResponse, AgentError> {
        Ok(PermissionResponse::allow())
    }
}

/// Denies everything.
pub struct DenyAll;

#[async_trait]
impl ApprovalCallback for DenyAll {
    async fn request_approval(
        &self,
        _request: PermissionRequest,
    ) -> Result<PermissionResponse, AgentError> {
        Ok(PermissionResponse::deny())
    }
}

/// An approval request waiting for a UI to answer it.
#[derive(Debug)]
pub struct PendingApproval {
    pub request: PermissionRequest,
    reply: oneshot::Sender<PermissionResponse>,
}

impl PendingApproval {
    /// Answer the request. Returns `false` if the requester has gone away.
    pub fn respond(self, response: PermissionResponse) -> bool {
        self.reply.send(response).is_ok()
    }
}

/// Forwards approval requests over a channel.
///
/// The receiving side (a UI, a test) answers each `PendingApproval` through
/// its embedded oneshot sender.
pub struct ChannelApproval {
    tx: mpsc::Sender<PendingApproval>,
}

impl ChannelApproval {
    /// Create the callback plus the receiver the UI drains.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<PendingApproval>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ApprovalCallback for ChannelApproval {
    async fn request_approval(
        &self,
        request: PermissionRequest,
    ) -> Result<PermissionResponse, AgentError> {
        let (reply, response_rx) = oneshot::channel();
        self.tx
            .send(PendingApproval { request, reply })
            .await
            .map_err(|e| AgentError::ApprovalFailed {
                reason: format!("approval channel closed: {e}"),
            })?;

        response_rx.await.map_err(|_| AgentError::ApprovalFailed {
            reason: "approval dropped without a response".to_string(),
        })
    }
}

// ─── Persistent Format ──────────────────────────────────────────────────────

/// On-disk format for `permissions.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedPolicies {
    /// Version for forward compatibility.
    version: u32,
    /// Tool name → policy mapping.
    policies: HashMap<String, PermissionPolicy>,
}

// ─── PermissionManager ──────────────────────────────────────────────────────

/// Policy store plus the approval gate in front of tool execution.
pub struct PermissionManager {
    policies: RwLock<HashMap<String, PermissionPolicy>>,
    callback: RwLock<Option<Arc<dyn ApprovalCallback>>>,
    /// `None` keeps everything in memory.
    persist_path: Option<PathBuf>,
    /// Serializes saves so the last write always carries the latest snapshot.
    save_lock: Mutex<()>,
}

impl Default for PermissionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionManager {
    /// Create an in-memory manager with no approval callback.
    pub fn new() -> Self {
        Self {
            policies: RwLock::new(HashMap::new()),
            callback: RwLock::new(None),
            persist_path: None,
            save_lock: Mutex::new(()),
        }
    }

    /// Create a manager backed by a JSON file, loading any saved policies.
    pub fn with_persist_path(path: impl Into<PathBuf>) -> Self {
        let persist_path = path.into();
        let policies = load_from_disk(&persist_path);
        Self {
            policies: RwLock::new(policies),
            callback: RwLock::new(None),
            persist_path: Some(persist_path),
            save_lock: Mutex::new(()),
        }
    }

    /// Register the callback used for AskOnce/AlwaysAsk decisions.
    pub fn set_approval_callback(&self, callback: Arc<dyn ApprovalCallback>) {
        *self.callback.write().unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, PermissionPolicy>> {
        self.policies.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, PermissionPolicy>> {
        self.policies.write().unwrap_or_else(|e| e.into_inner())
    }

    // ─── Policies ───────────────────────────────────────────────────────

    /// Current policy for a tool, creating the default on first access.
    pub fn get_policy(&self, tool_name: &str) -> PermissionPolicy {
        if let Some(policy) = self.read().get(tool_name) {
            return policy.clone();
        }
        self.write()
            .entry(tool_name.to_string())
            .or_insert_with(|| PermissionPolicy::new(tool_name, default_level(tool_name)))
            .clone()
    }

    /// Change a tool's level. Remembered decisions are kept.
    pub fn set_policy(&self, tool_name: &str, level: PermissionLevel) {
        {
            let mut policies = self.write();
            policies
                .entry(tool_name.to_string())
                .or_insert_with(|| PermissionPolicy::new(tool_name, level))
                .level = level;
        }
        tracing::info!(tool = tool_name, level = ?level, "permission policy set");
        self.save_to_disk();
    }

    /// All stored policies, sorted by tool name.
    pub fn policies(&self) -> Vec<PermissionPolicy> {
        let mut policies: Vec<PermissionPolicy> = self.read().values().cloned().collect();
        policies.sort_by(|a, b| a.tool_name.cmp(&b.tool_name));
        policies
    }

    /// Forget every policy and remembered decision.
    pub fn reset(&self) {
        let count = {
            let mut policies = self.write();
            let count = policies.len();
            policies.clear();
            count
        };
        tracing::info!(cleared = count, "permission policies reset");
        self.save_to_disk();
    }

    fn remember(&self, tool_name: &str, signature: String, granted: bool) {
        {
            let mut policies = self.write();
            policies
                .entry(tool_name.to_string())
                .or_insert_with(|| PermissionPolicy::new(tool_name, default_level(tool_name)))
                .remembered
                .insert(signature, granted);
        }
        self.save_to_disk();
    }

    // ─── Approval Gate ──────────────────────────────────────────────────

    /// Decide whether a tool call may run.
    ///
    /// `description` overrides the built-in description shown to the user.
    /// The callback is awaited without holding any lock and is raced against
    /// `cancel`.
    pub async fn request_permission(
        &self,
        cancel: &CancellationToken,
        tool_name: &str,
        params: &Params,
        description: Option<String>,
    ) -> Result<bool, AgentError> {
        let policy = self.get_policy(tool_name);

        if policy.level == PermissionLevel::NeverAsk {
            tracing::debug!(tool = tool_name, "permission not required");
            return Ok(true);
        }

        let sig = signature(params);
        if let Some(&granted) = policy.remembered.get(&sig) {
            tracing::debug!(tool = tool_name, granted, "using remembered decision");
            return Ok(granted);
        }

        let callback = self
            .callback
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let Some(callback) = callback else {
            tracing::warn!(tool = tool_name, "no approval callback registered, denying");
            return Ok(false);
        };

        let request = PermissionRequest {
            request_id: Uuid::new_v4().to_string(),
            tool_name: tool_name.to_string(),
            params: params.clone(),
            description: description.unwrap_or_else(|| describe_request(tool_name, params)),
            requested_at: Utc::now(),
        };
        let request_id = request.request_id.clone();

        tracing::info!(tool = tool_name, request_id = %request_id, "requesting approval");

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            r = callback.request_approval(request) => r?,
        };

        // AskOnce keeps grants implicitly; a denial sticks only when asked to
        let implicit = policy.level == PermissionLevel::AskOnce && response.granted;
        if response.remember_me || implicit {
            self.remember(tool_name, sig, response.granted);
        }

        tracing::info!(
            tool = tool_name,
            request_id = %request_id,
            granted = response.granted,
            remembered = response.remember_me,
            "approval decided"
        );

        Ok(response.granted)
    }

    // ─── Persistence ────────────────────────────────────────────────────

    /// Save policies to disk (atomic write). No-op when in-memory.
    ///
    /// The snapshot is taken under `save_lock`, so concurrent saves land in
    /// order and none can overwrite a newer state with an older one.
    fn save_to_disk(&self) {
        let Some(ref path) = self.persist_path else {
            return;
        };
        let _saving = self.save_lock.lock().unwrap_or_else(|e| e.into_inner());

        let persisted = PersistedPolicies {
            version: 1,
            policies: self.read().clone(),
        };

        let content = match serde_json::to_string_pretty(&persisted) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize permissions");
                return;
            }
        };

        if let Err(e) = write_atomic(path, content.as_bytes()) {
            tracing::error!(error = %e, path = %path.display(), "failed to save permissions");
            return;
        }

        tracing::debug!(count = persisted.policies.len(), "saved permission policies");
    }
}

/// Write through a uniquely named temp file in the same directory, then rename.
fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Load persisted policies. Missing or unreadable files start fresh.
fn load_from_disk(path: &Path) -> HashMap<String, PermissionPolicy> {
    if !path.exists() {
        return HashMap::new();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<PersistedPolicies>(&content) {
            Ok(persisted) => {
                tracing::info!(
                    count = persisted.policies.len(),
                    path = %path.display(),
                    "loaded permission policies"
                );
                persisted.policies
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %path.display(),
                    "failed to parse permissions file, starting fresh"
                );
                HashMap::new()
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "failed to read permissions file");
            HashMap::new()
        }
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Canonical signature of a parameter set: SHA-256 of its key-sorted JSON.
pub fn signature(params: &Params) -> String {
    let canonical = serde_json::to_string(params).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Human-readable description of a tool call for the approval prompt.
pub fn describe_request(tool_name: &str, params: &Params) -> String {
    let param = |key: &str| {
        params
            .get(key)
            .map(ParamValue::to_string)
            .unwrap_or_else(|| "<unknown>".to_string())
    };

    match tool_name {
        "execute" => format!("Execute shell command: {}", param("command")),
        "write_file" => format!("Write to file: {}", param("path")),
        "read_file" => format!("Read file: {}", param("path")),
        _ => {
            let args_preview = serde_json::to_string(params).unwrap_or_default();
            let truncated = if args_preview.len() > 100 {
                format!("{}...", truncate_utf8(&args_preview, 100))
            } else {
                args_preview
            };
            format!("Use tool {tool_name} with parameters: {truncated}")
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Answers with a fixed response and records every request.
    struct Recording {
        response: PermissionResponse,
        calls: AtomicUsize,
        seen: Mutex<Vec<PermissionRequest>>,
    }

    impl Recording {
        fn new(response: PermissionResponse) -> Arc<Self> {
            Arc::new(Self {
                response,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ApprovalCallback for Recording {
        async fn request_approval(
            &self,
            request: PermissionRequest,
        ) -> Result<PermissionResponse, AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request);
            Ok(self.response)
        }
    }

    struct Failing;

    #[async_trait]
    impl ApprovalCallback for Failing {
        async fn request_approval(
            &self,
            _request: PermissionRequest,
        ) -> Result<PermissionResponse, AgentError> {
            Err(AgentError::ApprovalFailed {
                reason: "ui crashed".into(),
            })
        }
    }

    fn command(cmd: &str) -> Params {
        let mut params = Params::new();
        params.insert("command".into(), ParamValue::from(cmd));
        params
    }

    #[test]
    fn test_default_levels() {
        let mgr = PermissionManager::new();
        assert_eq!(mgr.get_policy("read_file").level, PermissionLevel::NeverAsk);
        assert_eq!(mgr.get_policy("todo_read").level, PermissionLevel::NeverAsk);
        assert_eq!(mgr.get_policy("execute").level, PermissionLevel::AlwaysAsk);
        assert_eq!(mgr.get_policy("write_file").level, PermissionLevel::AlwaysAsk);
        assert_eq!(mgr.get_policy("mystery").level, PermissionLevel::AlwaysAsk);
    }

    #[test]
    fn test_get_policy_creates_entry() {
        let mgr = PermissionManager::new();
        assert!(mgr.policies().is_empty());
        mgr.get_policy("execute");
        assert_eq!(mgr.policies().len(), 1);
    }

    #[test]
    fn test_set_policy_and_sorted_listing() {
        let mgr = PermissionManager::new();
        mgr.set_policy("zzz", PermissionLevel::NeverAsk);
        mgr.set_policy("aaa", PermissionLevel::AskOnce);

        let policies = mgr.policies();
        assert_eq!(policies[0].tool_name, "aaa");
        assert_eq!(policies[0].level, PermissionLevel::AskOnce);
        assert_eq!(policies[1].tool_name, "zzz");
    }

    #[test]
    fn test_signature_is_canonical() {
        let mut a = Params::new();
        a.insert("b".into(), ParamValue::Int(1));
        a.insert("a".into(), ParamValue::from("x"));
        let mut b = Params::new();
        b.insert("a".into(), ParamValue::from("x"));
        b.insert("b".into(), ParamValue::Int(1));

        assert_eq!(signature(&a), signature(&b));
        assert_eq!(signature(&a).len(), 64);
        assert_ne!(signature(&a), signature(&command("ls")));
    }

    #[test]
    fn test_describe_request_table() {
        assert_eq!(
            describe_request("execute", &command("ls -la")),
            "Execute shell command: ls -la"
        );
        let mut p = Params::new();
        p.insert("path".into(), ParamValue::from("/tmp/a.txt"));
        assert_eq!(describe_request("write_file", &p), "Write to file: /tmp/a.txt");
        assert_eq!(describe_request("read_file", &p), "Read file: /tmp/a.txt");
        assert!(describe_request("calculator", &p)
            .starts_with("Use tool calculator with parameters: {"));
    }

    #[test]
    fn test_describe_request_truncates_long_params() {
        let mut p = Params::new();
        p.insert("blob".into(), ParamValue::from("═".repeat(100)));
        let desc = describe_request("upload", &p);
        assert!(desc.ends_with("..."));
    }

    #[tokio::test]
    async fn test_never_ask_skips_callback() {
        let mgr = PermissionManager::new();
        let cb = Recording::new(PermissionResponse::deny());
        mgr.set_approval_callback(cb.clone());

        let granted = mgr
            .request_permission(&CancellationToken::new(), "read_file", &Params::new(), None)
            .await
            .unwrap();
        assert!(granted);
        assert_eq!(cb.calls(), 0);
    }

    #[tokio::test]
    async fn test_always_ask_invokes_every_time() {
        let mgr = PermissionManager::new();
        let cb = Recording::new(PermissionResponse::allow());
        mgr.set_approval_callback(cb.clone());
        let cancel = CancellationToken::new();

        for _ in 0..3 {
            assert!(mgr
                .request_permission(&cancel, "execute", &command("ls"), None)
                .await
                .unwrap());
        }
        assert_eq!(cb.calls(), 3);

        let seen = cb.seen.lock().unwrap();
        assert_eq!(seen[0].description, "Execute shell command: ls");
        assert_ne!(seen[0].request_id, seen[1].request_id);
    }

    #[tokio::test]
    async fn test_always_ask_honours_remember_me() {
        let mgr = PermissionManager::new();
        let cb = Recording::new(PermissionResponse::allow_always());
        mgr.set_approval_callback(cb.clone());
        let cancel = CancellationToken::new();

        for _ in 0..2 {
            let granted = mgr
                .request_permission(&cancel, "execute", &command("ls"), None)
                .await
                .unwrap();
            assert!(granted);
        }
        assert_eq!(cb.calls(), 1);

        // A different command is a different signature
        mgr.request_permission(&cancel, "execute", &command("pwd"), None)
            .await
            .unwrap();
        assert_eq!(cb.calls(), 2);
    }

    #[tokio::test]
    async fn test_remembered_denial() {
        let mgr = PermissionManager::new();
        let cb = Recording::new(PermissionResponse::deny_always());
        mgr.set_approval_callback(cb.clone());
        let cancel = CancellationToken::new();

        for _ in 0..2 {
            let granted = mgr
                .request_permission(&cancel, "execute", &command("rm -rf /"), None)
                .await
                .unwrap();
            assert!(!granted);
        }
        assert_eq!(cb.calls(), 1);
    }

    #[tokio::test]
    async fn test_ask_once_remembers_without_flag() {
        let mgr = PermissionManager::new();
        mgr.set_policy("write_file", PermissionLevel::AskOnce);
        let cb = Recording::new(PermissionResponse::allow());
        mgr.set_approval_callback(cb.clone());
        let cancel = CancellationToken::new();

        let mut p = Params::new();
        p.insert("path".into(), ParamValue::from("notes.md"));
        assert!(mgr.request_permission(&cancel, "write_file", &p, None).await.unwrap());
        assert!(mgr.request_permission(&cancel, "write_file", &p, None).await.unwrap());
        assert_eq!(cb.calls(), 1);
        assert_eq!(mgr.get_policy("write_file").remembered.len(), 1);
    }

    #[tokio::test]
    async fn test_ask_once_asks_again_after_plain_denial() {
        let mgr = PermissionManager::new();
        mgr.set_policy("write_file", PermissionLevel::AskOnce);
        let cb = Recording::new(PermissionResponse::deny());
        mgr.set_approval_callback(cb.clone());
        let cancel = CancellationToken::new();

        let mut p = Params::new();
        p.insert("path".into(), ParamValue::from("notes.md"));
        assert!(!mgr.request_permission(&cancel, "write_file", &p, None).await.unwrap());
        assert!(!mgr.request_permission(&cancel, "write_file", &p, None).await.unwrap());
        assert_eq!(cb.calls(), 2);
        assert!(mgr.get_policy("write_file").remembered.is_empty());
    }

    #[tokio::test]
    async fn test_no_callback_denies() {
        let mgr = PermissionManager::new();
        let granted = mgr
            .request_permission(&CancellationToken::new(), "execute", &command("ls"), None)
            .await
            .unwrap();
        assert!(!granted);
    }

    #[tokio::test]
    async fn test_callback_error_propagates() {
        let mgr = PermissionManager::new();
        mgr.set_approval_callback(Arc::new(Failing));
        let err = mgr
            .request_permission(&CancellationToken::new(), "execute", &command("ls"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ApprovalFailed { .. }));
        assert!(mgr.get_policy("execute").remembered.is_empty());
    }

    #[tokio::test]
    async fn test_custom_description_is_forwarded() {
        let mgr = PermissionManager::new();
        let cb = Recording::new(PermissionResponse::allow());
        mgr.set_approval_callback(cb.clone());
        mgr.request_permission(
            &CancellationToken::new(),
            "deploy",
            &Params::new(),
            Some("Deploy to staging".into()),
        )
        .await
        .unwrap();
        assert_eq!(cb.seen.lock().unwrap()[0].description, "Deploy to staging");
    }

    #[tokio::test]
    async fn test_cancellation_while_waiting() {
        let mgr = PermissionManager::new();
        // Nobody drains the receiver, so the request never gets an answer
        let (approval, _rx) = ChannelApproval::new(1);
        mgr.set_approval_callback(Arc::new(approval));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = mgr
            .request_permission(&cancel, "execute", &command("ls"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
    }

    #[tokio::test]
    async fn test_channel_approval_round_trip() {
        let mgr = Arc::new(PermissionManager::new());
        let (approval, mut rx) = ChannelApproval::new(4);
        mgr.set_approval_callback(Arc::new(approval));

        let ui = tokio::spawn(async move {
            let pending = rx.recv().await.unwrap();
            assert_eq!(pending.request.tool_name, "execute");
            pending.respond(PermissionResponse::allow())
        });

        let granted = mgr
            .request_permission(&CancellationToken::new(), "execute", &command("ls"), None)
            .await
            .unwrap();
        assert!(granted);
        assert!(ui.await.unwrap());
    }

    #[tokio::test]
    async fn test_channel_approval_dropped_is_error() {
        let (approval, rx) = ChannelApproval::new(1);
        drop(rx);
        let request = PermissionRequest {
            request_id: "r".into(),
            tool_name: "execute".into(),
            params: Params::new(),
            description: String::new(),
            requested_at: Utc::now(),
        };
        let err = approval.request_approval(request).await.unwrap_err();
        assert!(matches!(err, AgentError::ApprovalFailed { .. }));
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("permissions.json");

        {
            let mgr = PermissionManager::with_persist_path(&path);
            mgr.set_policy("write_file", PermissionLevel::AskOnce);
            mgr.set_approval_callback(Recording::new(PermissionResponse::allow_always()));
            mgr.request_permission(&CancellationToken::new(), "execute", &command("ls"), None)
                .await
                .unwrap();
        }
        assert!(path.exists());

        let reloaded = PermissionManager::with_persist_path(&path);
        assert_eq!(reloaded.get_policy("write_file").level, PermissionLevel::AskOnce);
        // Remembered grant survives; no callback needed
        assert!(reloaded
            .request_permission(&CancellationToken::new(), "execute", &command("ls"), None)
            .await
            .unwrap());
    }

    #[test]
    fn test_concurrent_saves_keep_every_policy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("permissions.json");

        for _ in 0..5 {
            let mgr = Arc::new(PermissionManager::with_persist_path(&path));
            mgr.reset();
            let handles: Vec<_> = (0..16)
                .map(|i| {
                    let mgr = Arc::clone(&mgr);
                    std::thread::spawn(move || {
                        mgr.set_policy(&format!("tool_{i}"), PermissionLevel::NeverAsk)
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            let reloaded = PermissionManager::with_persist_path(&path);
            assert_eq!(reloaded.policies().len(), 16);
        }

        // Only the target file remains; temp files were renamed or cleaned up
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_reset_clears_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("permissions.json");
        let mgr = PermissionManager::with_persist_path(&path);
        mgr.set_policy("execute", PermissionLevel::NeverAsk);
        mgr.reset();

        assert!(mgr.policies().is_empty());
        let reloaded = PermissionManager::with_persist_path(&path);
        assert_eq!(reloaded.get_policy("execute").level, PermissionLevel::AlwaysAsk);
    }

    #[test]
    fn test_corrupt_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("permissions.json");
        std::fs::write(&path, "not json").unwrap();
        let mgr = PermissionManager::with_persist_path(&path);
        assert!(mgr.policies().is_empty());
    }

    #[test]
    fn test_permission_level_serialization() {
        assert_eq!(
            serde_json::to_string(&PermissionLevel::AlwaysAsk).unwrap(),
            "\"always_ask\""
        );
        let level: PermissionLevel = serde_json::from_str("\"never_ask\"").unwrap();
        assert_eq!(level, PermissionLevel::NeverAsk);
    }
}
