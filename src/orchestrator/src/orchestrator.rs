//! Orchestrator facade
//!
//! Wires configuration into the components: one task manager, one hook
//! engine and one registry with the built-in tools, all scoped to a session.

use crate::hooks::{HookDispatchResult, HookEngine, HookPayload};
use crate::tasks::{AgentRunner, BackgroundTaskManager, CommandAgentRunner, NoSandbox, ProcessSandbox};
use crate::tools::{register_builtin_tools, ToolContext, ToolDefinition, ToolInvocation, ToolRegistry, ToolResult};
use a3s_orchestrator_core::{HookEventType, OrchestratorConfig, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// A configured orchestration session
pub struct Orchestrator {
    session_id: String,
    registry: ToolRegistry,
    hooks: Arc<HookEngine>,
    tasks: Arc<BackgroundTaskManager>,
    reaper: Option<JoinHandle<()>>,
}

impl Orchestrator {
    /// Build from configuration, unconfined, with a command-backed agent
    /// runner when `agent.command` is set.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: OrchestratorConfig) -> Result<Self> {
        let runner = config
            .agent
            .command
            .as_deref()
            .map(|command| Arc::new(CommandAgentRunner::new(command)) as Arc<dyn AgentRunner>);
        Self::with_collaborators(config, runner, Arc::new(NoSandbox))
    }

    /// Build with explicit collaborators
    pub fn with_collaborators(
        config: OrchestratorConfig,
        agent_runner: Option<Arc<dyn AgentRunner>>,
        sandbox: Arc<dyn ProcessSandbox>,
    ) -> Result<Self> {
        config.validate()?;

        let session_id = config
            .session_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut tasks = BackgroundTaskManager::new(config.tasks.clone()).with_sandbox(sandbox);
        if let Some(runner) = agent_runner {
            tasks = tasks.with_agent_runner(runner);
        }
        let tasks = Arc::new(tasks);
        let reaper = tasks.start_reaper();

        let hooks = Arc::new(HookEngine::new(config.hooks.clone()));
        let context = ToolContext::new(config.workspace.clone())
            .with_session(session_id.clone())
            .with_tasks(tasks.clone());
        let registry =
            ToolRegistry::new(context, hooks.clone()).with_default_timeout(config.tool_timeout());
        register_builtin_tools(&registry)?;

        tracing::info!(
            session_id = %session_id,
            workspace = %config.workspace.display(),
            tools = registry.len(),
            hooks = hooks.len(),
            "Orchestrator ready"
        );

        Ok(Self {
            session_id,
            registry,
            hooks,
            tasks,
            reaper,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn tasks(&self) -> &Arc<BackgroundTaskManager> {
        &self.tasks
    }

    pub fn hooks(&self) -> &Arc<HookEngine> {
        &self.hooks
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    pub async fn execute(&self, tool: &str, input: &serde_json::Value) -> ToolResult {
        self.registry.execute(tool, input).await
    }

    pub async fn execute_invocation(&self, invocation: &ToolInvocation) -> ToolResult {
        self.registry.execute_invocation(invocation).await
    }

    /// Fire `SessionStart`
    pub async fn start_session(&self) -> HookDispatchResult {
        self.fire(HookEventType::SessionStart, None).await
    }

    /// Fire `UserPromptSubmit`; a block means the prompt must not be processed
    pub async fn submit_prompt(&self, prompt: &str) -> HookDispatchResult {
        self.fire(HookEventType::UserPromptSubmit, Some(prompt)).await
    }

    /// Fire a lifecycle event that carries no tool data
    pub async fn fire(&self, event: HookEventType, message: Option<&str>) -> HookDispatchResult {
        let mut payload = HookPayload::new(event, self.session_id.clone());
        if let Some(message) = message {
            payload = payload.with_message(message);
        }
        self.hooks.fire(&payload).await
    }

    /// Fire `SessionEnd` and kill every background task.
    ///
    /// Returns the number of tasks that were still running.
    pub async fn shutdown(mut self) -> usize {
        self.fire(HookEventType::SessionEnd, None).await;
        if let Some(reaper) = self.reaper.take() {
            reaper.abort();
        }
        let killed = self.tasks.shutdown().await;
        tracing::info!(session_id = %self.session_id, killed, "Orchestrator shut down");
        killed
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(reaper) = self.reaper.take() {
            reaper.abort();
        }
    }
}
