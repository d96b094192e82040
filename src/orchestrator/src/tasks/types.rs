//! Background task types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Kind of background work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Shell,
    Agent,
}

impl TaskKind {
    /// Prefix of the task ids of this kind
    pub fn prefix(&self) -> &'static str {
        match self {
            TaskKind::Shell => "shell",
            TaskKind::Agent => "agent",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// What to run
#[derive(Debug, Clone)]
pub enum TaskSpec {
    /// `bash -c <command>`
    Shell {
        command: String,
        cwd: PathBuf,
        env: BTreeMap<String, String>,
        /// Lower runtime cap than the configured one
        max_runtime: Option<Duration>,
    },
    /// Sub-agent run through the configured [`AgentRunner`](super::AgentRunner)
    Agent {
        description: String,
        prompt: String,
        cwd: PathBuf,
        session_id: String,
        max_runtime: Option<Duration>,
    },
}

impl TaskSpec {
    pub fn shell(command: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        TaskSpec::Shell {
            command: command.into(),
            cwd: cwd.into(),
            env: BTreeMap::new(),
            max_runtime: None,
        }
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            TaskSpec::Shell { .. } => TaskKind::Shell,
            TaskSpec::Agent { .. } => TaskKind::Agent,
        }
    }

    pub fn with_max_runtime(mut self, limit: Duration) -> Self {
        match &mut self {
            TaskSpec::Shell { max_runtime, .. } | TaskSpec::Agent { max_runtime, .. } => {
                *max_runtime = Some(limit)
            }
        }
        self
    }

    pub(crate) fn max_runtime(&self) -> Option<Duration> {
        match self {
            TaskSpec::Shell { max_runtime, .. } | TaskSpec::Agent { max_runtime, .. } => {
                *max_runtime
            }
        }
    }

    /// Short human-readable label
    pub fn summary(&self) -> String {
        match self {
            TaskSpec::Shell { command, .. } => command.clone(),
            TaskSpec::Agent { description, .. } => description.clone(),
        }
    }
}

/// Poll options
#[derive(Debug, Clone, Default)]
pub struct PollOptions {
    /// Regex; only matching lines of the new output are returned
    pub filter: Option<String>,
    /// Wait until the task reaches a terminal state (or `timeout`)
    pub block: bool,
    /// Bound on the wait when blocking; 30 s when unset
    pub timeout: Option<Duration>,
}

/// Result of a poll
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollResult {
    pub task_id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    /// Output since the previous poll, or the no-new-output sentinel
    pub new_output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub truncated: bool,
    pub runtime_ms: u64,
}

/// Snapshot of a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub summary: String,
    pub started_at: DateTime<Utc>,
    pub runtime_ms: u64,
    /// Runtime cap after which the task is killed
    pub max_runtime_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// Acknowledgement of a kill request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillOutcome {
    /// Task was running and has been terminated
    Killed,
    /// Task had already finished; it has been reaped
    AlreadyFinished,
    /// Task had already been removed
    AlreadyRemoved,
}
