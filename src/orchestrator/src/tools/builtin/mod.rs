//! Built-in tool implementations
//!
//! These are the core tools that come with the orchestrator:
//! - bash: Execute shell commands, in the foreground or as background tasks
//! - edit: Atomic string replacement within one file
//! - multi_edit: Independent string replacements across files
//! - task: Delegate work to a sub-agent (only with an agent runner)
//! - task_output: Read background task output
//! - task_kill: Terminate a background task

mod bash;
mod edit;
mod task;

use super::input::ToolInput;
use super::registry::ToolRegistry;
use a3s_orchestrator_core::Result;
use std::sync::Arc;

pub use bash::BashTool;
pub use edit::{EditTool, MultiEditTool};
pub use task::{TaskKillTool, TaskOutputTool, TaskTool};

/// Register all built-in tools with the registry, returning how many were added
pub fn register_builtin_tools(registry: &ToolRegistry) -> Result<usize> {
    let before = registry.len();

    registry.register(Arc::new(BashTool))?;
    registry.register(Arc::new(EditTool))?;
    registry.register(Arc::new(MultiEditTool))?;
    registry.register(Arc::new(TaskOutputTool))?;
    registry.register(Arc::new(TaskKillTool))?;
    if registry.context().tasks.has_agent_runner() {
        registry.register(Arc::new(TaskTool))?;
    } else {
        tracing::debug!("No agent runner configured; task tool not registered");
    }

    let added = registry.len() - before;
    tracing::info!("Registered {} built-in tools", added);
    Ok(added)
}

/// Parse raw input into the [`ToolInput`] variant of the built-in tool `name`
pub(super) fn builtin_input(name: &str, args: &serde_json::Value) -> anyhow::Result<ToolInput> {
    ToolInput::parse(name, args)
        .unwrap_or_else(|| Err(anyhow::anyhow!("{} is not a built-in tool", name)))
}
