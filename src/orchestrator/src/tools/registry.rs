//! Tool Registry
//!
//! Central registry for all tools. Provides thread-safe registration and
//! lookup, and is the single boundary where invocations are validated, run
//! through the hook pipeline, bounded in time and normalized into a
//! [`ToolResult`]. Nothing a handler does escapes it as an error or a panic.

use super::input::ToolInput;
use super::schema;
use super::types::{Tool, ToolContext, ToolOutput};
use super::{ToolDefinition, ToolInvocation, ToolResult};
use crate::hooks::HookEngine;
use a3s_orchestrator_core::{ErrorCode, OrchestratorError, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Tool-level timeout when neither the tool nor the registry sets one
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(900);

type Handler =
    dyn Fn(serde_json::Value, ToolContext) -> BoxFuture<'static, anyhow::Result<ToolOutput>>
        + Send
        + Sync;

/// A tool backed by a closure
struct FnTool {
    definition: ToolDefinition,
    handler: Box<Handler>,
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn description(&self) -> &str {
        &self.definition.description
    }

    fn parameters(&self) -> serde_json::Value {
        self.definition.parameters.clone()
    }

    async fn execute(
        &self,
        args: &serde_json::Value,
        ctx: &ToolContext,
    ) -> anyhow::Result<ToolOutput> {
        (self.handler)(args.clone(), ctx.clone()).await
    }
}

/// Tool registry for managing all available tools
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    context: ToolContext,
    hooks: Arc<HookEngine>,
    default_timeout: Duration,
}

impl ToolRegistry {
    /// Create a new tool registry
    pub fn new(context: ToolContext, hooks: Arc<HookEngine>) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            context,
            hooks,
            default_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Register a tool
    ///
    /// Fails with `TOOL_ALREADY_REGISTERED` if the name is taken.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        let mut tools = self.tools.write();
        if tools.contains_key(&name) {
            return Err(OrchestratorError::new(
                ErrorCode::TOOL_ALREADY_REGISTERED,
                format!("Tool already registered: {}", name),
            )
            .with_context("tool", name));
        }
        tracing::debug!("Registering tool: {}", name);
        tools.insert(name, tool);
        Ok(())
    }

    /// Register a closure as a tool
    pub fn register_handler<F, Fut>(&self, definition: ToolDefinition, handler: F) -> Result<()>
    where
        F: Fn(serde_json::Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ToolOutput>> + Send + 'static,
    {
        self.register(Arc::new(FnTool {
            definition,
            handler: Box::new(move |args, ctx| handler(args, ctx).boxed()),
        }))
    }

    /// Unregister a tool by name
    ///
    /// Returns true if the tool was found and removed.
    pub fn unregister(&self, name: &str) -> bool {
        tracing::debug!("Unregistering tool: {}", name);
        self.tools.write().remove(name).is_some()
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().get(name).cloned()
    }

    /// Check if a tool exists
    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    /// Tool definitions, sorted by name
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .tools
            .read()
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// List all registered tool names, sorted
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Get the number of registered tools
    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the tool context
    pub fn context(&self) -> &ToolContext {
        &self.context
    }

    pub fn hooks(&self) -> &Arc<HookEngine> {
        &self.hooks
    }

    /// Execute a tool by name in the registry's session
    pub async fn execute(&self, name: &str, input: &serde_json::Value) -> ToolResult {
        let session_id = self.context.session_id.clone();
        self.dispatch(name, input, &session_id).await
    }

    /// Execute an invocation, honoring its session id
    pub async fn execute_invocation(&self, invocation: &ToolInvocation) -> ToolResult {
        let session_id = invocation
            .session_id
            .clone()
            .unwrap_or_else(|| self.context.session_id.clone());
        self.dispatch(&invocation.tool, &invocation.input, &session_id).await
    }

    async fn dispatch(&self, name: &str, input: &serde_json::Value, session_id: &str) -> ToolResult {
        let started = Instant::now();

        let Some(tool) = self.get(name) else {
            tracing::warn!(tool = name, "Unknown tool");
            return ToolResult::failure(
                &OrchestratorError::new(ErrorCode::TOOL_NOT_FOUND, format!("Unknown tool: {}", name))
                    .with_context("tool", name),
            );
        };

        let parsed = match validate_input(tool.as_ref(), input) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!(tool = name, "Rejected input: {}", e);
                return ToolResult::failure(&e.with_context("tool", name));
            }
        };

        let decision = self
            .hooks
            .run_pre_tool_use_hooks(session_id, name, input)
            .await;
        if !decision.allowed {
            let message = decision
                .message
                .unwrap_or_else(|| "Blocked by PreToolUse hook".to_string());
            tracing::info!(tool = name, "Tool blocked by hook: {}", message);
            return ToolResult::failure(
                &OrchestratorError::new(
                    ErrorCode::HOOK_BLOCKED,
                    format!("Tool {} blocked by hook: {}", name, message),
                )
                .with_detail("hook_message", message)
                .with_context("tool", name),
            );
        }

        let ctx = self.context.for_invocation().with_session(session_id);
        let timeout = tool.timeout().unwrap_or(self.default_timeout);
        let mut result = match self.invoke(tool, parsed, input, &ctx, timeout).await {
            Ok(output) => ToolResult::from_output(name, output),
            Err(e) => ToolResult::failure(&e.with_context("tool", name)),
        };

        result.hook_feedback = match &result.error {
            None => {
                let output = serde_json::to_value(&result).unwrap_or_default();
                self.hooks
                    .run_post_tool_use_hooks(session_id, name, input, &output)
                    .await
            }
            Some(error) => {
                let error_json = serde_json::to_value(error).unwrap_or_default();
                self.hooks
                    .run_post_tool_use_failure_hooks(
                        session_id,
                        name,
                        input,
                        &error_json,
                        &error.message,
                    )
                    .await
            }
        };

        tracing::info!(
            tool = name,
            success = result.success,
            code = result.error_code().map(|c| c.as_u32()).unwrap_or(0),
            duration_ms = started.elapsed().as_millis() as u64,
            "Tool executed"
        );
        result
    }

    /// Run the handler under `timeout`, converting every failure mode into a
    /// classified error.
    async fn invoke(
        &self,
        tool: Arc<dyn Tool>,
        parsed: Option<ToolInput>,
        input: &serde_json::Value,
        ctx: &ToolContext,
        timeout: Duration,
    ) -> Result<ToolOutput> {
        let name = tool.name().to_string();
        let call = AssertUnwindSafe(tool.execute_parsed(parsed, input, ctx)).catch_unwind();

        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(Ok(output))) => Ok(output),
            Ok(Ok(Err(e))) => Err(OrchestratorError::from_anyhow(
                &e,
                ErrorCode::TOOL_EXECUTION_FAILED,
            )),
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(tool = %name, "Tool panicked: {}", message);
                Err(OrchestratorError::new(
                    ErrorCode::TOOL_PANICKED,
                    format!("Tool {} panicked: {}", name, message),
                ))
            }
            Err(_) => {
                let owned = ctx.owned_tasks();
                tracing::warn!(
                    tool = %name,
                    timeout_ms = timeout.as_millis() as u64,
                    owned_tasks = owned.len(),
                    "Tool timed out"
                );
                for id in &owned {
                    if let Err(e) = ctx.tasks.kill(id).await {
                        tracing::debug!(task_id = %id, "Failed to kill owned task: {}", e);
                    }
                }
                Err(OrchestratorError::new(
                    ErrorCode::TOOL_TIMEOUT,
                    format!("Tool {} timed out after {}ms", name, timeout.as_millis()),
                )
                .with_detail("timeout_ms", timeout.as_millis() as u64)
                .with_detail("killed_tasks", owned))
            }
        }
    }
}

/// Check `input` against the declared schema, then run the tool's typed parse
fn validate_input(tool: &dyn Tool, input: &serde_json::Value) -> Result<Option<ToolInput>> {
    let violations = schema::validate(&tool.parameters(), input);
    if !violations.is_empty() {
        let summary = violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(OrchestratorError::new(
            ErrorCode::VALIDATION_FAILED,
            format!("Invalid input for tool {}: {}", tool.name(), summary),
        )
        .with_detail(
            "violations",
            serde_json::to_value(&violations).unwrap_or_default(),
        ));
    }

    tool.parse_input(input).map_err(|e| {
        OrchestratorError::new(
            ErrorCode::VALIDATION_FAILED,
            format!("Invalid input for tool {}: {:#}", tool.name(), e),
        )
    })
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
