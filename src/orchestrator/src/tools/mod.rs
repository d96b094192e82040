//! Tool System
//!
//! Named, schema-described tools dispatched through the hook pipeline.
//!
//! ## Architecture
//!
//! ```text
//! ToolRegistry::execute(name, input)
//!   ├── lookup ──────────────── TOOL_NOT_FOUND
//!   ├── schema + typed input ── VALIDATION_FAILED
//!   ├── PreToolUse hooks ────── HOOK_BLOCKED
//!   ├── handler (timeout, panics caught)
//!   │     ├── edit / multi_edit ──> EditEngine
//!   │     └── bash / task* ───────> BackgroundTaskManager
//!   └── PostToolUse | PostToolUseFailure hooks
//! ```

mod builtin;
pub mod input;
mod registry;
pub mod schema;
mod types;

pub use builtin::{
    register_builtin_tools, BashTool, EditTool, MultiEditTool, TaskKillTool, TaskOutputTool,
    TaskTool,
};
pub use input::{ToolInput, BUILTIN_TOOLS};
pub use registry::{ToolRegistry, DEFAULT_TOOL_TIMEOUT};
pub use types::{resolve_in_workspace, Tool, ToolContext, ToolOutput};

use a3s_orchestrator_core::{ErrorCode, OrchestratorError, SerializedError};
use serde::{Deserialize, Serialize};

/// Maximum foreground command output kept in a result
pub const MAX_OUTPUT_SIZE: usize = 100 * 1024; // 100KB

/// Result keys tool metadata can never overwrite
const RESERVED_KEYS: [&str; 4] = ["success", "output", "error", "hook_feedback"];

/// Capability advertisement of a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the input
    pub parameters: serde_json::Value,
}

/// A single tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    #[serde(alias = "name")]
    pub tool: String,
    #[serde(default = "empty_object")]
    pub input: serde_json::Value,
    /// Falls back to the registry's session when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ToolInvocation {
    pub fn new(tool: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            tool: tool.into(),
            input,
            session_id: None,
        }
    }
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Normalized outcome of a tool call
///
/// Exactly one of `output` and `error` is set. Tool-specific fields are
/// flattened alongside.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SerializedError>,
    /// Message of a post-execution hook that objected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_feedback: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
            hook_feedback: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn failure(error: &OrchestratorError) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.to_serialized(false)),
            hook_feedback: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Normalize a handler's output; `tool` is attached to any error
    pub fn from_output(tool: &str, output: ToolOutput) -> Self {
        let mut result = if output.success {
            Self::success(output.content)
        } else {
            let error = output.error.unwrap_or_else(|| {
                OrchestratorError::new(ErrorCode::TOOL_EXECUTION_FAILED, output.content)
            });
            Self::failure(&error.with_context("tool", tool))
        };
        if let Some(metadata) = output.metadata {
            result.merge_extra(metadata);
        }
        result
    }

    /// Merge an object's fields into `extra`, never touching reserved keys.
    /// Non-object values land under `metadata`.
    pub fn merge_extra(&mut self, metadata: serde_json::Value) {
        match metadata {
            serde_json::Value::Object(fields) => {
                for (key, value) in fields {
                    if !RESERVED_KEYS.contains(&key.as_str()) {
                        self.extra.insert(key, value);
                    }
                }
            }
            serde_json::Value::Null => {}
            other => {
                self.extra.insert("metadata".to_string(), other);
            }
        }
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(SerializedError::error_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_wire_format() {
        let mut result = ToolResult::success("done");
        result.merge_extra(serde_json::json!({"exit_code": 0, "success": false}));

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["output"], "done");
        assert_eq!(value["exit_code"], 0);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_failed_output_gets_error_not_output() {
        let result = ToolResult::from_output("bash", ToolOutput::error("exit 1"));
        assert!(!result.success);
        assert!(result.output.is_none());
        assert_eq!(result.error_code(), Some(ErrorCode::TOOL_EXECUTION_FAILED));
        assert_eq!(result.error.unwrap().context["tool"], "bash");
    }

    #[test]
    fn test_invocation_accepts_name_alias() {
        let invocation: ToolInvocation =
            serde_json::from_str(r#"{"name": "bash", "input": {"command": "ls"}}"#).unwrap();
        assert_eq!(invocation.tool, "bash");
        assert!(invocation.session_id.is_none());

        let bare: ToolInvocation = serde_json::from_str(r#"{"tool": "task_kill"}"#).unwrap();
        assert!(bare.input.is_object());
    }

    #[test]
    fn test_result_round_trips_extra_fields() {
        let json = r#"{"success": true, "output": "ok", "files_modified": 2}"#;
        let result: ToolResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.extra["files_modified"], 2);
    }
}
