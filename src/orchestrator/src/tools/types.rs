//! Core types for the tool system

use super::input::ToolInput;
use crate::tasks::{BackgroundTaskManager, TaskSpec};
use a3s_orchestrator_core::{ErrorCode, OrchestratorError};
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Tool execution context
///
/// Provides tools with access to the workspace, the session and the
/// background task manager. The registry derives a fresh context for every
/// invocation so that tasks spawned as owned resources can be traced back
/// to the call that created them.
#[derive(Clone)]
pub struct ToolContext {
    /// Workspace root directory (sandbox boundary)
    pub workspace: PathBuf,
    /// Session id handed to hooks and sub-agents
    pub session_id: String,
    /// Background task manager shared by all invocations
    pub tasks: Arc<BackgroundTaskManager>,
    owned_tasks: Arc<Mutex<Vec<String>>>,
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("workspace", &self.workspace)
            .field("session_id", &self.session_id)
            .field("owned_tasks", &*self.owned_tasks.lock())
            .finish()
    }
}

impl ToolContext {
    pub fn new(workspace: PathBuf) -> Self {
        // Canonicalize workspace to handle symlinks (e.g., /var -> /private/var on macOS)
        let canonical_workspace = workspace
            .canonicalize()
            .unwrap_or_else(|_| workspace.clone());
        Self {
            workspace: canonical_workspace,
            session_id: "default".to_string(),
            tasks: Arc::new(BackgroundTaskManager::default()),
            owned_tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_tasks(mut self, tasks: Arc<BackgroundTaskManager>) -> Self {
        self.tasks = tasks;
        self
    }

    /// Context for a single invocation, with an empty owned-task list
    pub fn for_invocation(&self) -> Self {
        Self {
            owned_tasks: Arc::new(Mutex::new(Vec::new())),
            ..self.clone()
        }
    }

    /// Spawn a background task tied to this invocation.
    ///
    /// Owned tasks are killed when the invocation hits its tool-level timeout.
    /// Use `tasks.spawn` directly for work that must outlive the call.
    pub fn spawn_owned(&self, spec: TaskSpec) -> a3s_orchestrator_core::Result<String> {
        let id = self.tasks.spawn(spec)?;
        self.owned_tasks.lock().push(id.clone());
        Ok(id)
    }

    /// Ids of tasks spawned through [`ToolContext::spawn_owned`]
    pub fn owned_tasks(&self) -> Vec<String> {
        self.owned_tasks.lock().clone()
    }

    /// Resolve path relative to workspace, ensuring it stays within sandbox
    pub fn resolve_path(&self, path: &str) -> Result<PathBuf> {
        Ok(resolve_in_workspace(&self.workspace, path)?)
    }
}

/// Resolve `path` against `workspace`, rejecting anything that escapes it.
///
/// `..` components are folded lexically before the check, and the longest
/// existing ancestor is canonicalized so symlinks pointing outside the
/// workspace are caught as well. The target itself need not exist.
pub fn resolve_in_workspace(
    workspace: &Path,
    path: &str,
) -> a3s_orchestrator_core::Result<PathBuf> {
    let requested = Path::new(path);
    let joined = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        workspace.join(requested)
    };
    let normalized = normalize_lexically(&joined);

    let outside = || {
        OrchestratorError::new(
            ErrorCode::PATH_OUTSIDE_WORKSPACE,
            format!(
                "Path {} is outside workspace {}",
                normalized.display(),
                workspace.display()
            ),
        )
        .with_context("path", path)
    };

    if !normalized.starts_with(workspace) {
        return Err(outside());
    }

    // Walk up to the nearest existing ancestor and check where it really points
    let mut existing = normalized.as_path();
    while !existing.exists() {
        match existing.parent() {
            Some(parent) => existing = parent,
            None => break,
        }
    }
    if let Ok(canonical) = existing.canonicalize() {
        if !canonical.starts_with(workspace) {
            return Err(outside());
        }
    }

    Ok(normalized)
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Tool execution output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Output content
    pub content: String,
    /// Whether execution was successful
    pub success: bool,
    /// Tool-specific fields, flattened into the result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Classified error for unsuccessful output
    #[serde(skip)]
    pub error: Option<OrchestratorError>,
}

impl ToolOutput {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            success: true,
            metadata: None,
            error: None,
        }
    }

    /// Unsuccessful output classified as a generic execution failure
    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            error: Some(OrchestratorError::new(
                ErrorCode::TOOL_EXECUTION_FAILED,
                message.clone(),
            )),
            content: message,
            success: false,
            metadata: None,
        }
    }

    /// Unsuccessful output carrying a specific classified error
    pub fn failure(error: OrchestratorError) -> Self {
        Self {
            content: error.message().to_string(),
            success: false,
            metadata: None,
            error: Some(error),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Tool trait - the core abstraction for all tools
///
/// Implement this trait to create custom tools that can be registered
/// with the ToolRegistry.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (must be unique within registry)
    fn name(&self) -> &str;

    /// Human-readable description for LLM
    fn description(&self) -> &str;

    /// JSON Schema for tool parameters
    fn parameters(&self) -> serde_json::Value;

    /// Tool-level timeout; the registry default applies when `None`
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Parse `args` into typed input.
    ///
    /// Runs once per invocation, after schema validation and before any
    /// hook; a parse error rejects the call. Built-in tools return their
    /// [`ToolInput`] variant, other tools keep the raw JSON (`None`).
    fn parse_input(&self, _args: &serde_json::Value) -> Result<Option<ToolInput>> {
        Ok(None)
    }

    /// Execute the tool with given arguments
    async fn execute(&self, args: &serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput>;

    /// Execute with the input [`Tool::parse_input`] already produced
    async fn execute_parsed(
        &self,
        _parsed: Option<ToolInput>,
        args: &serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput> {
        self.execute(args, ctx).await
    }
}
