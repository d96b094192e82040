use crate::error::{ErrorCode, OrchestratorError, Result};
use crate::hooks::HooksConfig;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Orchestrator configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Workspace directory; every file path a tool touches must stay inside it
    pub workspace: PathBuf,

    /// Session id handed to hooks (generated when absent)
    pub session_id: Option<String>,

    /// Default tool-level timeout in milliseconds
    pub tool_timeout_ms: u64,

    /// Background task limits
    pub tasks: TaskConfig,

    /// Sub-agent runner
    pub agent: AgentConfig,

    /// Hook definitions (canonical or legacy form)
    pub hooks: HooksConfig,

    /// Log level
    pub log_level: LogLevel,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            session_id: None,
            tool_timeout_ms: 900_000, // 15 minutes
            tasks: TaskConfig::default(),
            agent: AgentConfig::default(),
            hooks: HooksConfig::default(),
            log_level: LogLevel::Info,
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from a YAML or JSON file, chosen by extension.
    ///
    /// Files with any other extension are parsed as YAML, which also accepts JSON.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            let code = if e.kind() == std::io::ErrorKind::NotFound {
                ErrorCode::CONFIG_NOT_FOUND
            } else {
                ErrorCode::CONFIG_PARSE_FAILED
            };
            OrchestratorError::new(code, format!("Failed to read config {}: {}", path.display(), e))
                .with_context("path", path.display().to_string())
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let mut config = if is_json {
            Self::from_json_str(&content)?
        } else {
            Self::from_yaml_str(&content)?
        };

        // Relative workspaces are relative to the config file
        if config.workspace.is_relative() {
            if let Some(dir) = path.parent() {
                config.workspace = dir.join(&config.workspace);
            }
        }

        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s).map_err(|e| {
            OrchestratorError::new(ErrorCode::CONFIG_PARSE_FAILED, e.to_string())
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject limits that would make every spawn or call fail
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| OrchestratorError::new(ErrorCode::CONFIG_INVALID, msg);

        if self.tool_timeout_ms == 0 {
            return Err(invalid("tool_timeout_ms must be greater than 0"));
        }
        for (kind, limits) in [("shell", &self.tasks.shell), ("agent", &self.tasks.agent)] {
            if limits.max_concurrent == 0 {
                return Err(invalid(&format!("tasks.{}.max_concurrent must be greater than 0", kind)));
            }
            if limits.max_runtime_secs == 0 {
                return Err(invalid(&format!("tasks.{}.max_runtime_secs must be greater than 0", kind)));
            }
            if limits.max_output_bytes == 0 {
                return Err(invalid(&format!("tasks.{}.max_output_bytes must be greater than 0", kind)));
            }
        }
        Ok(())
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }
}

/// Background task configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Shell command limits
    pub shell: TaskLimits,

    /// Sub-agent limits
    #[serde(
        default = "TaskLimits::agent_default",
        deserialize_with = "TaskLimits::deserialize_agent"
    )]
    pub agent: TaskLimits,

    /// Grace period between SIGTERM and SIGKILL
    pub kill_grace_ms: u64,

    /// Terminal tasks older than this are reaped by the background reaper
    pub reap_after_secs: u64,

    /// Reaper interval (0 disables the reaper)
    pub reap_interval_secs: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            shell: TaskLimits::default(),
            agent: TaskLimits::agent_default(),
            kill_grace_ms: 1000,
            reap_after_secs: 3600,
            reap_interval_secs: 60,
        }
    }
}

impl TaskConfig {
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

/// Per-kind task limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskLimits {
    /// Maximum number of concurrently running tasks
    pub max_concurrent: usize,

    /// Maximum runtime before the task is killed
    pub max_runtime_secs: u64,

    /// Output buffer cap; output beyond it is truncated
    pub max_output_bytes: usize,
}

impl Default for TaskLimits {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            max_runtime_secs: 3600, // 1 hour
            max_output_bytes: 10 * 1024 * 1024,
        }
    }
}

impl TaskLimits {
    fn agent_default() -> Self {
        Self {
            max_output_bytes: 1024 * 1024,
            ..Self::default()
        }
    }

    /// Agent limits from config; unset fields keep the agent defaults
    fn deserialize_agent<'de, D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(PartialLimits::deserialize(deserializer)?.over(Self::agent_default()))
    }

    pub fn max_runtime(&self) -> Duration {
        Duration::from_secs(self.max_runtime_secs)
    }
}

#[derive(Deserialize)]
struct PartialLimits {
    max_concurrent: Option<usize>,
    max_runtime_secs: Option<u64>,
    max_output_bytes: Option<usize>,
}

impl PartialLimits {
    fn over(self, base: TaskLimits) -> TaskLimits {
        TaskLimits {
            max_concurrent: self.max_concurrent.unwrap_or(base.max_concurrent),
            max_runtime_secs: self.max_runtime_secs.unwrap_or(base.max_runtime_secs),
            max_output_bytes: self.max_output_bytes.unwrap_or(base.max_output_bytes),
        }
    }
}

/// Sub-agent runner configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Command that runs a sub-agent; the prompt is written to its stdin.
    /// When unset, the `task` tool is not registered.
    pub command: Option<String>,
}

/// Log level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive for `tracing_subscriber::EnvFilter`
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}
