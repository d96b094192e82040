//! Typed inputs of the built-in tools
//!
//! Each built-in tool has one [`ToolInput`] variant and one entry in the
//! schema table below. The registry validates raw JSON against the table and
//! then parses it into the variant, so handlers only ever see typed input.

use crate::edit::{EditOperation, EditPair};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};

/// Names of all built-in tools, in advertisement order
pub const BUILTIN_TOOLS: [&str; 6] = ["bash", "edit", "multi_edit", "task", "task_output", "task_kill"];

/// Input of the `edit` tool
///
/// Either a single `old_string`/`new_string` pair or an `edits` list of
/// pairs, all applied to `file_path` atomically.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditInput {
    pub file_path: String,
    #[serde(default)]
    pub old_string: Option<String>,
    #[serde(default)]
    pub new_string: Option<String>,
    #[serde(default)]
    pub replace_all: bool,
    #[serde(default)]
    pub edits: Vec<EditPair>,
}

impl EditInput {
    /// Collapse both input forms into the list of pairs to apply
    pub fn pairs(&self) -> Result<Vec<EditPair>> {
        match (&self.old_string, &self.new_string, self.edits.is_empty()) {
            (Some(old), Some(new), true) => Ok(vec![EditPair {
                old_string: old.clone(),
                new_string: new.clone(),
                replace_all: self.replace_all,
            }]),
            (None, None, false) => Ok(self.edits.clone()),
            (None, None, true) => anyhow::bail!("Provide old_string/new_string or a non-empty edits list"),
            _ => anyhow::bail!("old_string/new_string and edits are mutually exclusive"),
        }
    }
}

/// Input of the `multi_edit` tool
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MultiEditInput {
    pub edits: Vec<EditOperation>,
}

/// Input of the `bash` tool
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BashInput {
    pub command: String,
    /// Timeout in milliseconds (foreground) or max runtime (background)
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub run_in_background: bool,
    #[serde(default)]
    pub description: Option<String>,
}

/// Input of the `task` tool
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskInput {
    pub description: String,
    pub prompt: String,
    #[serde(default = "default_true")]
    pub run_in_background: bool,
}

/// Input of the `task_output` tool
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskOutputInput {
    pub task_id: String,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub block: bool,
    /// Block timeout in milliseconds
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// Input of the `task_kill` tool
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskKillInput {
    pub task_id: String,
}

fn default_true() -> bool {
    true
}

/// Parsed input of a built-in tool
#[derive(Debug, Clone)]
pub enum ToolInput {
    Bash(BashInput),
    Edit(EditInput),
    MultiEdit(MultiEditInput),
    Task(TaskInput),
    TaskOutput(TaskOutputInput),
    TaskKill(TaskKillInput),
}

impl ToolInput {
    /// Parse raw input for the built-in tool `name`.
    ///
    /// Returns `None` when `name` is not a built-in tool.
    pub fn parse(name: &str, args: &Value) -> Option<Result<ToolInput>> {
        fn typed<T: for<'de> Deserialize<'de>>(name: &str, args: &Value) -> Result<T> {
            serde_json::from_value(args.clone())
                .with_context(|| format!("Invalid input for tool {}", name))
        }

        let parsed = match name {
            "bash" => typed(name, args).map(ToolInput::Bash),
            "edit" => typed::<EditInput>(name, args).and_then(|input| {
                input.pairs()?;
                Ok(ToolInput::Edit(input))
            }),
            "multi_edit" => typed(name, args).map(ToolInput::MultiEdit),
            "task" => typed(name, args).map(ToolInput::Task),
            "task_output" => typed(name, args).map(ToolInput::TaskOutput),
            "task_kill" => typed(name, args).map(ToolInput::TaskKill),
            _ => return None,
        };
        Some(parsed)
    }

    /// Declared JSON schema of the built-in tool `name`
    pub fn schema(name: &str) -> Option<Value> {
        let edit_pair = json!({
            "type": "object",
            "properties": {
                "old_string": {"type": "string", "minLength": 1, "description": "Exact text to replace"},
                "new_string": {"type": "string", "description": "Replacement text"},
                "replace_all": {"type": "boolean", "description": "Replace every occurrence (default: false)"}
            },
            "required": ["old_string", "new_string"],
            "additionalProperties": false
        });

        let schema = match name {
            "bash" => json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "minLength": 1, "description": "The bash command to execute"},
                    "timeout": {"type": "integer", "minimum": 1,
                        "description": "Timeout in milliseconds (default: 120000, max: 600000). In the background, the task's max runtime (default and max: the task limit)"},
                    "run_in_background": {"type": "boolean",
                        "description": "Run as a background task and return its id"},
                    "description": {"type": "string", "description": "Short description of the command"}
                },
                "required": ["command"],
                "additionalProperties": false
            }),
            "edit" => json!({
                "type": "object",
                "properties": {
                    "file_path": {"type": "string", "minLength": 1, "description": "Path to the file to edit"},
                    "old_string": {"type": "string", "minLength": 1,
                        "description": "The exact string to replace (must be unique unless replace_all=true)"},
                    "new_string": {"type": "string", "description": "The string to replace it with"},
                    "replace_all": {"type": "boolean", "description": "Replace all occurrences (default: false)"},
                    "edits": {"type": "array", "items": edit_pair,
                        "description": "Several replacements applied all-or-nothing, in order"}
                },
                "required": ["file_path"],
                "additionalProperties": false
            }),
            "multi_edit" => json!({
                "type": "object",
                "properties": {
                    "edits": {
                        "type": "array",
                        "description": "Independent edit operations; a failed operation does not undo earlier ones",
                        "items": {
                            "type": "object",
                            "properties": {
                                "file_path": {"type": "string", "minLength": 1},
                                "old_string": {"type": "string", "minLength": 1},
                                "new_string": {"type": "string"},
                                "replace_all": {"type": "boolean"}
                            },
                            "required": ["file_path", "old_string", "new_string"],
                            "additionalProperties": false
                        }
                    }
                },
                "required": ["edits"],
                "additionalProperties": false
            }),
            "task" => json!({
                "type": "object",
                "properties": {
                    "description": {"type": "string", "minLength": 1, "description": "Short task description"},
                    "prompt": {"type": "string", "minLength": 1, "description": "Instructions for the sub-agent"},
                    "run_in_background": {"type": "boolean",
                        "description": "Return immediately with a task id (default: true)"}
                },
                "required": ["description", "prompt"],
                "additionalProperties": false
            }),
            "task_output" => json!({
                "type": "object",
                "properties": {
                    "task_id": {"type": "string", "minLength": 1},
                    "filter": {"type": "string", "description": "Regex; only matching lines are returned"},
                    "block": {"type": "boolean", "description": "Wait until the task finishes (default: false)"},
                    "timeout": {"type": "integer", "minimum": 1, "maximum": 600000,
                        "description": "Maximum wait in milliseconds when blocking (default: 30000)"}
                },
                "required": ["task_id"],
                "additionalProperties": false
            }),
            "task_kill" => json!({
                "type": "object",
                "properties": {
                    "task_id": {"type": "string", "minLength": 1}
                },
                "required": ["task_id"],
                "additionalProperties": false
            }),
            _ => return None,
        };
        Some(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::schema;

    #[test]
    fn test_every_builtin_has_schema() {
        for name in BUILTIN_TOOLS {
            assert!(ToolInput::schema(name).is_some(), "{} has no schema", name);
        }
        assert!(ToolInput::schema("custom").is_none());
        assert!(ToolInput::parse("custom", &json!({})).is_none());
    }

    #[test]
    fn test_parse_bash() {
        let parsed = ToolInput::parse("bash", &json!({"command": "ls", "run_in_background": true}))
            .unwrap()
            .unwrap();
        match parsed {
            ToolInput::Bash(input) => {
                assert_eq!(input.command, "ls");
                assert!(input.run_in_background);
                assert!(input.timeout.is_none());
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_edit_forms() {
        let single = json!({"file_path": "a.txt", "old_string": "x", "new_string": "y"});
        assert!(ToolInput::parse("edit", &single).unwrap().is_ok());

        let batch = json!({"file_path": "a.txt", "edits": [{"old_string": "x", "new_string": "y"}]});
        assert!(ToolInput::parse("edit", &batch).unwrap().is_ok());

        let both = json!({
            "file_path": "a.txt", "old_string": "x", "new_string": "y",
            "edits": [{"old_string": "x", "new_string": "y"}]
        });
        assert!(ToolInput::parse("edit", &both).unwrap().is_err());

        let neither = json!({"file_path": "a.txt"});
        assert!(ToolInput::parse("edit", &neither).unwrap().is_err());
    }

    #[test]
    fn test_task_defaults_to_background() {
        match ToolInput::parse("task", &json!({"description": "d", "prompt": "p"}))
            .unwrap()
            .unwrap()
        {
            ToolInput::Task(input) => assert!(input.run_in_background),
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_schema_table_matches_parser() {
        let input = json!({"task_id": "shell_1", "block": true, "timeout": 500});
        assert!(schema::validate(&ToolInput::schema("task_output").unwrap(), &input).is_empty());
        assert!(ToolInput::parse("task_output", &input).unwrap().is_ok());

        let bad = json!({"task_id": "shell_1", "unknown": 1});
        assert!(!schema::validate(&ToolInput::schema("task_kill").unwrap(), &bad).is_empty());
        assert!(ToolInput::parse("task_kill", &bad).unwrap().is_err());
    }
}
