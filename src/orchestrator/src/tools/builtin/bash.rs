//! Bash tool - Execute shell commands

use crate::tasks::{GroupKillGuard, TaskKind, TaskSpec};
use crate::tools::input::ToolInput;
use crate::tools::types::{Tool, ToolContext, ToolOutput};
use crate::tools::MAX_OUTPUT_SIZE;
use a3s_orchestrator_core::{ErrorCode, OrchestratorError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

const DEFAULT_TIMEOUT_MS: u64 = 120_000;
const MAX_TIMEOUT_MS: u64 = 600_000;

/// Bash command execution tool
pub struct BashTool;

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a bash command in the workspace directory. Use for running commands, installing packages, running tests, etc. Set run_in_background to get a task id instead of waiting; read its output with task_output."
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
        let Some(ToolInput::Bash(input)) = parsed else {
            anyhow::bail!("{} received input for another tool", self.name());
        };

        // Background runs are bounded by the task limits, not the call timeout
        if input.run_in_background {
            return Ok(spawn_background(&input.command, input.timeout, ctx));
        }

        let timeout_ms = input
            .timeout
            .unwrap_or(DEFAULT_TIMEOUT_MS)
            .clamp(1, MAX_TIMEOUT_MS);

        tracing::debug!("Bash command: {}", input.command);

        let mut cmd = Command::new("bash");
        cmd.arg("-c")
            .arg(&input.command)
            .current_dir(&ctx.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        if let Err(e) = ctx.tasks.sandbox().confine(&mut cmd, TaskKind::Shell) {
            return Ok(ToolOutput::failure(OrchestratorError::from_anyhow(
                &e,
                ErrorCode::SANDBOX_UNAVAILABLE,
            )));
        }

        let mut child = cmd.spawn().context("Failed to spawn bash process")?;
        // Takes the whole group down if this call is abandoned mid-flight
        let guard = GroupKillGuard::new(child.id());

        let stdout = child.stdout.take().context("Missing stdout pipe")?;
        let stderr = child.stderr.take().context("Missing stderr pipe")?;

        let mut stdout_reader = BufReader::new(stdout);
        let mut stderr_reader = BufReader::new(stderr);
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();

        let mut output = String::new();
        let mut truncated = false;
        let mut push_line = |line: &[u8]| {
            if output.len() < MAX_OUTPUT_SIZE {
                output.push_str(&String::from_utf8_lossy(line));
                if !line.ends_with(b"\n") {
                    output.push('\n');
                }
            } else {
                truncated = true;
            }
        };

        let timeout = Duration::from_millis(timeout_ms);
        let result = tokio::time::timeout(timeout, async {
            let mut stdout_done = false;
            let mut stderr_done = false;
            while !(stdout_done && stderr_done) {
                tokio::select! {
                    read = stdout_reader.read_until(b'\n', &mut stdout_buf), if !stdout_done => {
                        match read {
                            Ok(0) => stdout_done = true,
                            Ok(_) => {
                                push_line(&stdout_buf);
                                stdout_buf.clear();
                            }
                            Err(e) => {
                                tracing::warn!("Error reading stdout: {}", e);
                                stdout_done = true;
                            }
                        }
                    }
                    read = stderr_reader.read_until(b'\n', &mut stderr_buf), if !stderr_done => {
                        match read {
                            Ok(0) => stderr_done = true,
                            Ok(_) => {
                                push_line(&stderr_buf);
                                stderr_buf.clear();
                            }
                            Err(e) => {
                                tracing::warn!("Error reading stderr: {}", e);
                                stderr_done = true;
                            }
                        }
                    }
                }
            }
            child.wait().await
        })
        .await;

        if truncated {
            output.push_str(&format!(
                "\n\n[Output truncated at {} bytes]",
                MAX_OUTPUT_SIZE
            ));
        }

        let status = match result {
            Ok(status) => {
                guard.disarm();
                status.context("Failed to wait for process")?
            }
            Err(_) => {
                // Dropping the guard kills the process group
                drop(guard);
                child.kill().await.ok();
                let err = OrchestratorError::new(
                    ErrorCode::TOOL_TIMEOUT,
                    format!("{}\n\n[Command timed out after {}ms]", output, timeout_ms),
                )
                .with_detail("timeout_ms", timeout_ms)
                .with_context("command", input.command.as_str());
                return Ok(ToolOutput::failure(err)
                    .with_metadata(serde_json::json!({ "exit_code": 124 })));
            }
        };

        let exit_code = status.code().unwrap_or(-1);
        let metadata = serde_json::json!({ "exit_code": exit_code });
        if exit_code == 0 {
            return Ok(ToolOutput::success(output).with_metadata(metadata));
        }

        let err = OrchestratorError::new(
            ErrorCode::TOOL_EXECUTION_FAILED,
            format!("{}\n[Exit code: {}]", output.trim_end(), exit_code),
        )
        .with_detail("exit_code", exit_code)
        .with_context("command", input.command.as_str());
        Ok(ToolOutput::failure(err).with_metadata(metadata))
    }
}

/// Hand the command to the task manager; the call returns immediately
fn spawn_background(command: &str, timeout_ms: Option<u64>, ctx: &ToolContext) -> ToolOutput {
    let mut spec = TaskSpec::shell(command, ctx.workspace.clone());
    if let Some(timeout_ms) = timeout_ms {
        spec = spec.with_max_runtime(Duration::from_millis(timeout_ms.max(1)));
    }

    match ctx.tasks.spawn(spec) {
        Ok(task_id) => {
            tracing::info!("Started background shell task {}: {}", task_id, command);
            ToolOutput::success(format!(
                "Command running in background with id {}. Use task_output to read its output.",
                task_id
            ))
            .with_metadata(serde_json::json!({
                "task_id": task_id,
                "status": "running",
            }))
        }
        Err(e) => ToolOutput::failure(e),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::tasks::{PollOptions, TaskStatus};
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_bash_echo() {
        let tool = BashTool;
        let ctx = ToolContext::new(PathBuf::from("/tmp"));

        let result = tool
            .execute(&serde_json::json!({"command": "echo hello"}), &ctx)
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.content.contains("hello"));
        assert_eq!(result.metadata.unwrap()["exit_code"], 0);
    }

    #[tokio::test]
    async fn test_bash_exit_code() {
        let tool = BashTool;
        let ctx = ToolContext::new(PathBuf::from("/tmp"));

        let result = tool
            .execute(&serde_json::json!({"command": "echo oops >&2; exit 3"}), &ctx)
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.content.contains("oops"));
        assert_eq!(result.metadata.unwrap()["exit_code"], 3);
        assert_eq!(
            result.error.unwrap().code(),
            ErrorCode::TOOL_EXECUTION_FAILED
        );
    }

    #[tokio::test]
    async fn test_bash_stderr_closing_first() {
        let ctx = ToolContext::new(PathBuf::from("/tmp"));
        let result = BashTool
            .execute(
                &serde_json::json!({"command": "exec 2>&-; sleep 0.2; echo late"}),
                &ctx,
            )
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.content.contains("late"));
    }

    #[tokio::test]
    async fn test_bash_timeout() {
        let ctx = ToolContext::new(PathBuf::from("/tmp"));
        let started = std::time::Instant::now();

        let result = BashTool
            .execute(
                &serde_json::json!({"command": "echo start; sleep 30", "timeout": 200}),
                &ctx,
            )
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!result.success);
        assert_eq!(result.metadata.unwrap()["exit_code"], 124);
        let err = result.error.unwrap();
        assert_eq!(err.code(), ErrorCode::TOOL_TIMEOUT);
        assert!(err.message().contains("start"));
    }

    #[tokio::test]
    async fn test_bash_background_returns_task_id() {
        let temp_dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(temp_dir.path().to_path_buf());

        let result = BashTool
            .execute(
                &serde_json::json!({"command": "echo from-bg", "run_in_background": true}),
                &ctx,
            )
            .await
            .unwrap();

        assert!(result.success);
        let metadata = result.metadata.unwrap();
        assert_eq!(metadata["status"], "running");
        let task_id = metadata["task_id"].as_str().unwrap().to_string();
        assert!(task_id.starts_with("shell"));

        let poll = ctx
            .tasks
            .poll(
                &task_id,
                PollOptions {
                    block: true,
                    timeout: Some(Duration::from_secs(5)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(poll.status, TaskStatus::Completed);
        assert!(poll.new_output.contains("from-bg"));
    }

    #[tokio::test]
    async fn test_bash_invalid_utf8_output() {
        let ctx = ToolContext::new(PathBuf::from("/tmp"));
        let result = BashTool
            .execute(
                &serde_json::json!({"command": "printf 'x\\377\\n'; echo tail-line"}),
                &ctx,
            )
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.content.contains("x\u{FFFD}"));
        assert!(result.content.contains("tail-line"));
    }

    #[tokio::test]
    async fn test_bash_background_ignores_call_timeout_default() {
        let temp_dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(temp_dir.path().to_path_buf());

        let default_cap = BashTool
            .execute(
                &serde_json::json!({"command": "sleep 5", "run_in_background": true}),
                &ctx,
            )
            .await
            .unwrap();
        let task_id = default_cap.metadata.unwrap()["task_id"].as_str().unwrap().to_string();
        assert_eq!(ctx.tasks.status(&task_id).unwrap().max_runtime_ms, 3_600_000);

        let explicit = BashTool
            .execute(
                &serde_json::json!({"command": "sleep 5", "run_in_background": true, "timeout": 900_000}),
                &ctx,
            )
            .await
            .unwrap();
        let task_id = explicit.metadata.unwrap()["task_id"].as_str().unwrap().to_string();
        assert_eq!(ctx.tasks.status(&task_id).unwrap().max_runtime_ms, 900_000);

        ctx.tasks.shutdown().await;
    }

    #[test]
    fn test_bash_parameters() {
        let tool = BashTool;
        let params = tool.parameters();

        assert!(params["properties"]["command"].is_object());
        assert!(params["required"]
            .as_array()
            .unwrap()
            .contains(&serde_json::json!("command")));
    }
}
