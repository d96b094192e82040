//! Task tools - sub-agent delegation and background task control

use crate::tasks::{PollOptions, TaskSpec, TaskStatus, DEFAULT_POLL_TIMEOUT, NO_NEW_OUTPUT};
use crate::tools::input::ToolInput;
use crate::tools::types::{Tool, ToolContext, ToolOutput};
use a3s_orchestrator_core::{ErrorCode, OrchestratorError};
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Delegates a prompt to a sub-agent
pub struct TaskTool;

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &str {
        "task"
    }

    fn description(&self) -> &str {
        "Delegate a self-contained piece of work to a sub-agent. By default the sub-agent runs in the background and a task id is returned; poll it with task_output. Set run_in_background to false to wait for the result."
    }

    fn parameters(&self) -> serde_json::Value {
        ToolInput::schema(self.name()).unwrap_or_default()
    }

    fn parse_input(&self, args: &serde_json::Value) -> Result<Option<ToolInput>> {
        super::builtin_input(self.name(), args).map(Some)
    }

    async fn execute(&self, args: &serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let parsed = self.parse_input(args)?;
        self.execute_parsed(parsed, args, ctx).await
    }

    async fn execute_parsed(
        &self,
        parsed: Option<ToolInput>,
        _args: &serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput> {
        let Some(ToolInput::Task(input)) = parsed else {
            anyhow::bail!("{} received input for another tool", self.name());
        };
        let spec = TaskSpec::Agent {
            description: input.description.clone(),
            prompt: input.prompt,
            cwd: ctx.workspace.clone(),
            session_id: ctx.session_id.clone(),
            max_runtime: None,
        };

        if input.run_in_background {
            return Ok(match ctx.tasks.spawn(spec) {
                Ok(task_id) => {
                    tracing::info!("Started sub-agent {}: {}", task_id, input.description);
                    ToolOutput::success(format!(
                        "Sub-agent started with id {}. Use task_output to follow its progress.",
                        task_id
                    ))
                    .with_metadata(serde_json::json!({
                        "task_id": task_id,
                        "status": "running",
                    }))
                }
                Err(e) => ToolOutput::failure(e),
            });
        }

        // Owned, so a tool-level timeout takes the sub-agent down with the call
        let task_id = match ctx.spawn_owned(spec) {
            Ok(id) => id,
            Err(e) => return Ok(ToolOutput::failure(e)),
        };

        let mut output = String::new();
        let last = loop {
            let poll = match ctx
                .tasks
                .poll(
                    &task_id,
                    PollOptions {
                        block: true,
                        timeout: Some(DEFAULT_POLL_TIMEOUT),
                        ..Default::default()
                    },
                )
                .await
            {
                Ok(poll) => poll,
                Err(e) => return Ok(ToolOutput::failure(e)),
            };
            if poll.new_output != NO_NEW_OUTPUT {
                output.push_str(&poll.new_output);
            }
            if poll.status.is_terminal() {
                break poll;
            }
        };

        // Reap it; nobody will poll a foreground sub-agent again
        if let Err(e) = ctx.tasks.kill(&task_id).await {
            tracing::debug!("Failed to reap sub-agent {}: {}", task_id, e);
        }

        let metadata = serde_json::json!({
            "task_id": task_id,
            "status": last.status,
            "runtime_ms": last.runtime_ms,
        });
        if last.status == TaskStatus::Completed {
            return Ok(ToolOutput::success(output).with_metadata(metadata));
        }

        let reason = last
            .failure_reason
            .unwrap_or_else(|| "sub-agent failed".to_string());
        let err = OrchestratorError::new(
            ErrorCode::TOOL_EXECUTION_FAILED,
            format!("Sub-agent {} failed: {}\n{}", task_id, reason, output.trim_end()),
        )
        .with_detail("failure_reason", reason)
        .with_context("task_id", task_id.as_str());
        Ok(ToolOutput::failure(err).with_metadata(metadata))
    }
}

/// Reads the output of a background task
pub struct TaskOutputTool;

#[async_trait]
impl Tool for TaskOutputTool {
    fn name(&self) -> &str {
        "task_output"
    }

    fn description(&self) -> &str {
        "Read output a background task produced since the last read. Optionally filter lines with a regex, or block until the task finishes."
    }

    fn parameters(&self) -> serde_json::Value {
        ToolInput::schema(self.name()).unwrap_or_default()
    }

    fn parse_input(&self, args: &serde_json::Value) -> Result<Option<ToolInput>> {
        super::builtin_input(self.name(), args).map(Some)
    }

    async fn execute(&self, args: &serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let parsed = self.parse_input(args)?;
        self.execute_parsed(parsed, args, ctx).await
    }

    async fn execute_parsed(
        &self,
        parsed: Option<ToolInput>,
        _args: &serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput> {
        let Some(ToolInput::TaskOutput(input)) = parsed else {
            anyhow::bail!("{} received input for another tool", self.name());
        };
        let options = PollOptions {
            filter: input.filter,
            block: input.block,
            timeout: input.timeout.map(Duration::from_millis),
        };

        Ok(match ctx.tasks.poll(&input.task_id, options).await {
            Ok(poll) => {
                let metadata = serde_json::to_value(&poll)?;
                ToolOutput::success(poll.new_output).with_metadata(metadata)
            }
            Err(e) => ToolOutput::failure(e),
        })
    }
}

/// Terminates a background task
pub struct TaskKillTool;

#[async_trait]
impl Tool for TaskKillTool {
    fn name(&self) -> &str {
        "task_kill"
    }

    fn description(&self) -> &str {
        "Terminate a background task and discard it. Killing a task that already finished or was already killed is not an error."
    }

    fn parameters(&self) -> serde_json::Value {
        ToolInput::schema(self.name()).unwrap_or_default()
    }

    fn parse_input(&self, args: &serde_json::Value) -> Result<Option<ToolInput>> {
        super::builtin_input(self.name(), args).map(Some)
    }

    async fn execute(&self, args: &serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let parsed = self.parse_input(args)?;
        self.execute_parsed(parsed, args, ctx).await
    }

    async fn execute_parsed(
        &self,
        parsed: Option<ToolInput>,
        _args: &serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput> {
        let Some(ToolInput::TaskKill(input)) = parsed else {
            anyhow::bail!("{} received input for another tool", self.name());
        };

        Ok(match ctx.tasks.kill(&input.task_id).await {
            Ok(outcome) => ToolOutput::success(format!("Task {}: {:?}", input.task_id, outcome))
                .with_metadata(serde_json::json!({
                    "task_id": input.task_id,
                    "outcome": outcome,
                })),
            Err(e) => ToolOutput::failure(e),
        })
    }
}
