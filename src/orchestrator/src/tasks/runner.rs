//! Collaborators the task manager delegates to
//!
//! - [`AgentRunner`] does the actual sub-agent work for `agent` tasks.
//! - [`ProcessSandbox`] confines spawned commands; the manager only owns the
//!   lifecycle, never the isolation mechanics.

use super::process;
use super::types::TaskKind;
use super::OutputSink;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// A sub-agent invocation
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub task_id: String,
    pub description: String,
    pub prompt: String,
    pub cwd: PathBuf,
    pub session_id: String,
}

/// Runs sub-agent work
///
/// Implementations stream progress into `output` and should return soon
/// after `cancel` fires; the manager force-drops the future after the kill
/// grace period either way.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(
        &self,
        request: AgentRequest,
        output: OutputSink,
        cancel: CancellationToken,
    ) -> Result<()>;
}

/// Runs a sub-agent as an external command.
///
/// The command is run through `sh -c` in the task's working directory with
/// the prompt on stdin. `A3S_TASK_ID`, `A3S_TASK_DESCRIPTION` and
/// `A3S_SESSION_ID` are set in its environment. Its stdout and stderr become
/// the task output; a non-zero exit fails the task.
pub struct CommandAgentRunner {
    command: String,
    sandbox: std::sync::Arc<dyn ProcessSandbox>,
}

impl CommandAgentRunner {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            sandbox: std::sync::Arc::new(NoSandbox),
        }
    }

    pub fn with_sandbox(mut self, sandbox: std::sync::Arc<dyn ProcessSandbox>) -> Self {
        self.sandbox = sandbox;
        self
    }
}

#[async_trait]
impl AgentRunner for CommandAgentRunner {
    async fn run(
        &self,
        request: AgentRequest,
        output: OutputSink,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command)
            .current_dir(&request.cwd)
            .env("A3S_TASK_ID", &request.task_id)
            .env("A3S_TASK_DESCRIPTION", &request.description)
            .env("A3S_SESSION_ID", &request.session_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        self.sandbox.confine(&mut cmd, TaskKind::Agent)?;

        let mut child = cmd.spawn().context("Failed to spawn agent command")?;

        if let Some(mut stdin) = child.stdin.take() {
            let prompt = request.prompt.clone();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                    tracing::debug!("Agent command did not read its prompt: {}", e);
                }
            });
        }

        let stdout = child.stdout.take().context("Agent stdout not captured")?;
        let stderr = child.stderr.take().context("Agent stderr not captured")?;
        let readers = [
            tokio::spawn(pump_lines(BufReader::new(stdout), output.clone())),
            tokio::spawn(pump_lines(BufReader::new(stderr), output.clone())),
        ];

        // SIGKILLs the whole group if the manager drops this future
        let guard = process::GroupKillGuard::new(child.id());

        let status = tokio::select! {
            status = child.wait() => status.context("Failed to wait for agent command")?,
            _ = cancel.cancelled() => {
                #[cfg(unix)]
                if let Some(pid) = child.id() {
                    process::signal_group(pid, libc::SIGTERM);
                }
                let _ = child.wait().await;
                anyhow::bail!("Agent command cancelled");
            }
        };
        guard.disarm();

        for reader in readers {
            let _ = reader.await;
        }

        if !status.success() {
            anyhow::bail!(
                "Agent command exited with code {}",
                status.code().unwrap_or(-1)
            );
        }
        Ok(())
    }
}

/// Copy lines from `reader` into the task output until EOF.
///
/// Invalid UTF-8 is replaced rather than treated as an error, so the pipe
/// keeps draining whatever the command prints.
pub(crate) async fn pump_lines<R>(mut reader: BufReader<R>, output: OutputSink)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => output.write(&String::from_utf8_lossy(&buf)),
            Err(e) => {
                tracing::warn!("Error reading task output: {}", e);
                break;
            }
        }
    }
}

/// Process confinement applied to every spawned command
pub trait ProcessSandbox: Send + Sync {
    /// Sandbox name, for logs
    fn name(&self) -> &str;

    /// Adjust `command` before it is spawned
    fn confine(&self, command: &mut Command, kind: TaskKind) -> Result<()>;
}

/// Runs commands unconfined
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSandbox;

impl ProcessSandbox for NoSandbox {
    fn name(&self) -> &str {
        "none"
    }

    fn confine(&self, _command: &mut Command, _kind: TaskKind) -> Result<()> {
        Ok(())
    }
}
