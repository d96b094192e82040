//! Background Task Manager
//!
//! Supervises work that outlives the tool call that started it: shell
//! commands and sub-agent runs.
//!
//! ## Lifecycle
//!
//! ```text
//! spawn ──> running ──┬── exit 0 ───────────────> completed
//!                     ├── exit != 0 / error ─────> failed
//!                     ├── max runtime exceeded ──> failed ("timed out ...")
//!                     └── kill ──────────────────> failed ("killed")
//!
//! kill / reap ──> removed from the table (ids are never reused, later kills are no-ops)
//! ```
//!
//! Every task gets its own monitor on the tokio runtime. Status and output
//! live behind a per-task lock; status changes are also published on a
//! `watch` channel so blocking polls and kills can wait without spinning.
//! Running counts are reserved at spawn and released exactly once, on the
//! transition to a terminal state.

mod output;
mod process;
mod runner;
mod types;

pub use output::{OutputBuffer, NO_NEW_OUTPUT};
pub use runner::{AgentRequest, AgentRunner, CommandAgentRunner, NoSandbox, ProcessSandbox};
pub use types::{KillOutcome, PollOptions, PollResult, TaskInfo, TaskKind, TaskSpec, TaskStatus};

pub(crate) use process::GroupKillGuard;
pub(crate) use runner::pump_lines;

use a3s_orchestrator_core::{ErrorCode, OrchestratorError, Result, TaskConfig, TaskLimits};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::BufReader;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Wait bound for a blocking poll without an explicit timeout
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// Extra time a kill waits for the monitor after the grace period
const KILL_SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a finished shell's output readers may keep draining
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// Task entries
// ============================================================================

struct TaskState {
    status: TaskStatus,
    exit_code: Option<i32>,
    failure_reason: Option<String>,
    finished_at: Option<Instant>,
    output: OutputBuffer,
}

pub(crate) struct TaskEntry {
    id: String,
    kind: TaskKind,
    summary: String,
    started_at: DateTime<Utc>,
    started: Instant,
    max_runtime: Duration,
    state: Mutex<TaskState>,
    status_tx: watch::Sender<TaskStatus>,
    cancel: CancellationToken,
    running: Arc<AtomicUsize>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl TaskEntry {
    fn status(&self) -> TaskStatus {
        self.state.lock().status
    }

    /// Move to a terminal state. Only the first call has any effect.
    fn finish(&self, status: TaskStatus, exit_code: Option<i32>, reason: Option<String>) -> bool {
        {
            let mut state = self.state.lock();
            if state.status.is_terminal() {
                return false;
            }
            state.status = status;
            state.exit_code = exit_code;
            state.failure_reason = reason.clone();
            state.finished_at = Some(Instant::now());
        }

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.status_tx.send_replace(status);

        tracing::info!(
            task_id = %self.id,
            status = %status,
            exit_code = ?exit_code,
            reason = reason.as_deref().unwrap_or(""),
            "Background task finished"
        );
        true
    }

    fn finished_for(&self) -> Option<Duration> {
        self.state.lock().finished_at.map(|at| at.elapsed())
    }

    fn info(&self) -> TaskInfo {
        let state = self.state.lock();
        TaskInfo {
            task_id: self.id.clone(),
            kind: self.kind,
            status: state.status,
            summary: self.summary.clone(),
            started_at: self.started_at,
            runtime_ms: runtime(self.started, state.finished_at).as_millis() as u64,
            max_runtime_ms: self.max_runtime.as_millis() as u64,
            exit_code: state.exit_code,
            failure_reason: state.failure_reason.clone(),
        }
    }
}

fn runtime(started: Instant, finished_at: Option<Instant>) -> Duration {
    finished_at.unwrap_or_else(Instant::now).duration_since(started)
}

/// Write handle into a task's output buffer
#[derive(Clone)]
pub struct OutputSink {
    entry: Arc<TaskEntry>,
}

impl OutputSink {
    pub fn write(&self, text: &str) {
        self.entry.state.lock().output.push(text);
    }

    pub fn task_id(&self) -> &str {
        &self.entry.id
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Supervises background shell and agent tasks
pub struct BackgroundTaskManager {
    config: TaskConfig,
    tasks: DashMap<String, Arc<TaskEntry>>,
    shell_running: Arc<AtomicUsize>,
    agent_running: Arc<AtomicUsize>,
    shell_issued: AtomicU64,
    agent_issued: AtomicU64,
    agent_runner: RwLock<Option<Arc<dyn AgentRunner>>>,
    sandbox: RwLock<Arc<dyn ProcessSandbox>>,
}

impl Default for BackgroundTaskManager {
    fn default() -> Self {
        Self::new(TaskConfig::default())
    }
}

impl BackgroundTaskManager {
    pub fn new(config: TaskConfig) -> Self {
        Self {
            config,
            tasks: DashMap::new(),
            shell_running: Arc::new(AtomicUsize::new(0)),
            agent_running: Arc::new(AtomicUsize::new(0)),
            shell_issued: AtomicU64::new(0),
            agent_issued: AtomicU64::new(0),
            agent_runner: RwLock::new(None),
            sandbox: RwLock::new(Arc::new(NoSandbox)),
        }
    }

    pub fn with_agent_runner(self, runner: Arc<dyn AgentRunner>) -> Self {
        self.set_agent_runner(runner);
        self
    }

    pub fn with_sandbox(self, sandbox: Arc<dyn ProcessSandbox>) -> Self {
        *self.sandbox.write() = sandbox;
        self
    }

    pub fn set_agent_runner(&self, runner: Arc<dyn AgentRunner>) {
        *self.agent_runner.write() = Some(runner);
    }

    pub fn has_agent_runner(&self) -> bool {
        self.agent_runner.read().is_some()
    }

    pub fn sandbox(&self) -> Arc<dyn ProcessSandbox> {
        self.sandbox.read().clone()
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    fn limits(&self, kind: TaskKind) -> &TaskLimits {
        match kind {
            TaskKind::Shell => &self.config.shell,
            TaskKind::Agent => &self.config.agent,
        }
    }

    fn counter(&self, kind: TaskKind) -> &Arc<AtomicUsize> {
        match kind {
            TaskKind::Shell => &self.shell_running,
            TaskKind::Agent => &self.agent_running,
        }
    }

    fn issued(&self, kind: TaskKind) -> &AtomicU64 {
        match kind {
            TaskKind::Shell => &self.shell_issued,
            TaskKind::Agent => &self.agent_issued,
        }
    }

    /// Whether `id` was issued here and has since left the table.
    ///
    /// Ids are `<kind>_<n>` with `n` counting up per kind and never reused,
    /// so this needs no record of removed ids.
    fn was_removed(&self, id: &str) -> bool {
        let Some((prefix, seq)) = id.rsplit_once('_') else {
            return false;
        };
        let Some(kind) = [TaskKind::Shell, TaskKind::Agent]
            .into_iter()
            .find(|kind| kind.prefix() == prefix)
        else {
            return false;
        };
        let issued = match seq.parse::<u64>() {
            Ok(n) if n.to_string() == seq => n >= 1 && n <= self.issued(kind).load(Ordering::SeqCst),
            _ => false,
        };
        issued && !self.tasks.contains_key(id)
    }

    /// Number of running tasks of `kind`
    pub fn running_count(&self, kind: TaskKind) -> usize {
        self.counter(kind).load(Ordering::SeqCst)
    }

    /// Start a background task and return its id.
    ///
    /// Fails with `RESOURCE_LIMIT_EXCEEDED` when the kind is at its cap.
    /// Must be called from within a tokio runtime.
    pub fn spawn(&self, spec: TaskSpec) -> Result<String> {
        let kind = spec.kind();
        let limits = self.limits(kind).clone();
        let counter = self.counter(kind).clone();

        let reserved = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |running| {
            (running < limits.max_concurrent).then_some(running + 1)
        });
        if reserved.is_err() {
            return Err(OrchestratorError::new(
                ErrorCode::RESOURCE_LIMIT_EXCEEDED,
                format!(
                    "Too many running {} tasks (limit {})",
                    kind, limits.max_concurrent
                ),
            )
            .with_context("kind", kind.to_string())
            .with_detail("limit", limits.max_concurrent));
        }

        let id = format!(
            "{}_{}",
            kind.prefix(),
            self.issued(kind).fetch_add(1, Ordering::SeqCst) + 1
        );
        let max_runtime = spec
            .max_runtime()
            .map(|limit| limit.min(limits.max_runtime()))
            .unwrap_or_else(|| limits.max_runtime());
        let (status_tx, _) = watch::channel(TaskStatus::Running);

        let entry = Arc::new(TaskEntry {
            id: id.clone(),
            kind,
            summary: spec.summary(),
            started_at: Utc::now(),
            started: Instant::now(),
            max_runtime,
            state: Mutex::new(TaskState {
                status: TaskStatus::Running,
                exit_code: None,
                failure_reason: None,
                finished_at: None,
                output: OutputBuffer::new(limits.max_output_bytes),
            }),
            status_tx,
            cancel: CancellationToken::new(),
            running: counter.clone(),
            monitor: Mutex::new(None),
        });

        let started = match spec {
            TaskSpec::Shell {
                command, cwd, env, ..
            } => self.start_shell(&entry, command, cwd, env, max_runtime),
            TaskSpec::Agent {
                description,
                prompt,
                cwd,
                session_id,
                ..
            } => self.start_agent(
                &entry,
                AgentRequest {
                    task_id: id.clone(),
                    description,
                    prompt,
                    cwd,
                    session_id,
                },
                max_runtime,
            ),
        };

        match started {
            Ok(monitor) => {
                *entry.monitor.lock() = Some(monitor);
                self.tasks.insert(id.clone(), entry);
                tracing::info!(
                    task_id = %id,
                    kind = %kind,
                    max_runtime_ms = max_runtime.as_millis() as u64,
                    "Background task started"
                );
                Ok(id)
            }
            Err(e) => {
                counter.fetch_sub(1, Ordering::SeqCst);
                Err(e.with_context("task_id", id))
            }
        }
    }

    fn start_shell(
        &self,
        entry: &Arc<TaskEntry>,
        command: String,
        cwd: PathBuf,
        env: BTreeMap<String, String>,
        max_runtime: Duration,
    ) -> Result<JoinHandle<()>> {
        let mut cmd = Command::new("bash");
        cmd.arg("-c")
            .arg(&command)
            .current_dir(&cwd)
            .envs(&env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        self.sandbox
            .read()
            .confine(&mut cmd, TaskKind::Shell)
            .map_err(|e| OrchestratorError::from_anyhow(&e, ErrorCode::SANDBOX_UNAVAILABLE))?;

        let mut child = cmd.spawn().map_err(|e| {
            OrchestratorError::from_io(&e)
                .with_detail("reason", "Failed to spawn bash process")
                .with_context("command", command.as_str())
        })?;

        let sink = OutputSink {
            entry: entry.clone(),
        };
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump_lines(BufReader::new(stdout), sink.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump_lines(BufReader::new(stderr), sink)));
        }

        let entry = entry.clone();
        let grace = self.config.kill_grace();
        Ok(tokio::spawn(async move {
            enum Exit {
                Exited(std::io::Result<std::process::ExitStatus>),
                TimedOut,
                Cancelled,
            }

            let exit = tokio::select! {
                status = child.wait() => Exit::Exited(status),
                _ = tokio::time::sleep(max_runtime) => Exit::TimedOut,
                _ = entry.cancel.cancelled() => Exit::Cancelled,
            };

            if !matches!(exit, Exit::Exited(_)) {
                process::graceful_kill(&mut child, grace).await;
            }

            for mut reader in readers {
                if tokio::time::timeout(READER_DRAIN_TIMEOUT, &mut reader)
                    .await
                    .is_err()
                {
                    reader.abort();
                }
            }

            match exit {
                Exit::Exited(Ok(status)) if status.success() => {
                    entry.finish(TaskStatus::Completed, status.code(), None);
                }
                Exit::Exited(Ok(status)) => {
                    let reason = match status.code() {
                        Some(code) => format!("exited with code {}", code),
                        None => "terminated by signal".to_string(),
                    };
                    entry.finish(TaskStatus::Failed, status.code(), Some(reason));
                }
                Exit::Exited(Err(e)) => {
                    tracing::error!(task_id = %entry.id, error = %e, "Failed to wait on child");
                    entry.finish(
                        TaskStatus::Failed,
                        None,
                        Some(format!("failed to wait for process: {}", e)),
                    );
                }
                Exit::TimedOut => {
                    tracing::warn!(task_id = %entry.id, "Background task timed out");
                    entry.finish(
                        TaskStatus::Failed,
                        None,
                        Some(timeout_reason(max_runtime)),
                    );
                }
                Exit::Cancelled => {
                    entry.finish(TaskStatus::Failed, None, Some("killed".to_string()));
                }
            }
        }))
    }

    fn start_agent(
        &self,
        entry: &Arc<TaskEntry>,
        request: AgentRequest,
        max_runtime: Duration,
    ) -> Result<JoinHandle<()>> {
        let runner = self.agent_runner.read().clone().ok_or_else(|| {
            OrchestratorError::new(ErrorCode::CONFIG_INVALID, "No agent runner configured")
        })?;

        let sink = OutputSink {
            entry: entry.clone(),
        };
        let entry = entry.clone();
        let grace = self.config.kill_grace();
        Ok(tokio::spawn(async move {
            let cancel = entry.cancel.clone();
            let run = runner.run(request, sink, cancel.child_token());
            tokio::pin!(run);

            let stop_reason = tokio::select! {
                result = &mut run => {
                    match result {
                        Ok(()) => {
                            entry.finish(TaskStatus::Completed, None, None);
                        }
                        Err(e) => {
                            entry.finish(TaskStatus::Failed, None, Some(format!("{:#}", e)));
                        }
                    }
                    return;
                }
                _ = tokio::time::sleep(max_runtime) => {
                    tracing::warn!(task_id = %entry.id, "Agent task timed out");
                    timeout_reason(max_runtime)
                }
                _ = cancel.cancelled() => "killed".to_string(),
            };

            // Ask the runner to stop, give it the grace period, then drop it
            cancel.cancel();
            if tokio::time::timeout(grace, &mut run).await.is_err() {
                tracing::debug!(task_id = %entry.id, "Agent runner ignored cancellation; aborting");
            }
            entry.finish(TaskStatus::Failed, None, Some(stop_reason));
        }))
    }

    fn entry(&self, id: &str) -> Result<Arc<TaskEntry>> {
        let found = self.tasks.get(id).map(|e| e.value().clone());
        found.ok_or_else(|| {
            let message = if self.was_removed(id) {
                format!("Task {} has already been removed", id)
            } else {
                format!("Unknown task: {}", id)
            };
            OrchestratorError::new(ErrorCode::TASK_NOT_FOUND, message).with_context("task_id", id)
        })
    }

    /// Return output produced since the previous poll of this task.
    pub async fn poll(&self, id: &str, options: PollOptions) -> Result<PollResult> {
        let entry = self.entry(id)?;

        let filter = options
            .filter
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| {
                OrchestratorError::new(
                    ErrorCode::VALIDATION_FAILED,
                    format!("Invalid output filter: {}", e),
                )
                .with_context("task_id", id)
            })?;

        if options.block {
            let mut status_rx = entry.status_tx.subscribe();
            let wait = options.timeout.unwrap_or(DEFAULT_POLL_TIMEOUT);
            let _ = tokio::time::timeout(wait, status_rx.wait_for(|s| s.is_terminal())).await;
        }

        let mut state = entry.state.lock();
        let new_output = match (state.output.take_new(), &filter) {
            (None, _) => NO_NEW_OUTPUT.to_string(),
            (Some(text), None) => text,
            (Some(text), Some(filter)) => {
                let lines: Vec<&str> = text.lines().filter(|l| filter.is_match(l)).collect();
                if lines.is_empty() {
                    NO_NEW_OUTPUT.to_string()
                } else {
                    let mut joined = lines.join("\n");
                    joined.push('\n');
                    joined
                }
            }
        };

        Ok(PollResult {
            task_id: entry.id.clone(),
            kind: entry.kind,
            status: state.status,
            new_output,
            exit_code: state.exit_code,
            failure_reason: state.failure_reason.clone(),
            truncated: state.output.is_truncated(),
            runtime_ms: runtime(entry.started, state.finished_at).as_millis() as u64,
        })
    }

    /// Terminate a task and remove it from the table.
    ///
    /// Running tasks get SIGTERM (shells) or a cancellation (agents), then a
    /// forced kill after the grace period. Killing a finished task reaps it;
    /// killing a removed task is a no-op.
    pub async fn kill(&self, id: &str) -> Result<KillOutcome> {
        let entry = match self.tasks.get(id).map(|e| e.value().clone()) {
            Some(entry) => entry,
            None if self.was_removed(id) => return Ok(KillOutcome::AlreadyRemoved),
            None => {
                return Err(OrchestratorError::new(
                    ErrorCode::TASK_NOT_FOUND,
                    format!("Unknown task: {}", id),
                )
                .with_context("task_id", id))
            }
        };

        let outcome = if entry.status().is_terminal() {
            KillOutcome::AlreadyFinished
        } else {
            tracing::info!(task_id = %id, "Killing background task");
            entry.cancel.cancel();

            let mut status_rx = entry.status_tx.subscribe();
            let bound = self.config.kill_grace() + KILL_SETTLE_TIMEOUT;
            if tokio::time::timeout(bound, status_rx.wait_for(|s| s.is_terminal()))
                .await
                .is_err()
            {
                tracing::warn!(task_id = %id, "Task monitor did not stop in time; aborting it");
                if let Some(monitor) = entry.monitor.lock().take() {
                    monitor.abort();
                }
                entry.finish(TaskStatus::Failed, None, Some("killed".to_string()));
            }
            KillOutcome::Killed
        };

        self.remove(id);
        Ok(outcome)
    }

    fn remove(&self, id: &str) {
        self.tasks.remove(id);
    }

    /// Remove terminal tasks that finished at least `older_than` ago
    pub fn reap_terminal(&self, older_than: Duration) -> Vec<String> {
        let expired: Vec<String> = self
            .tasks
            .iter()
            .filter(|e| {
                e.value()
                    .finished_for()
                    .map_or(false, |elapsed| elapsed >= older_than)
            })
            .map(|e| e.key().clone())
            .collect();

        for id in &expired {
            self.remove(id);
        }
        if !expired.is_empty() {
            tracing::debug!("Reaped {} finished background tasks", expired.len());
        }
        expired
    }

    /// Periodically reap finished tasks; stops when the manager is dropped.
    ///
    /// Returns `None` when the configured interval is 0.
    pub fn start_reaper(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.config.reap_interval_secs == 0 {
            return None;
        }

        let manager = Arc::downgrade(self);
        let every = Duration::from_secs(self.config.reap_interval_secs);
        let older_than = Duration::from_secs(self.config.reap_after_secs);

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.reap_terminal(older_than);
            }
        }))
    }

    /// Snapshot of one task
    pub fn status(&self, id: &str) -> Option<TaskInfo> {
        self.tasks.get(id).map(|e| e.value().info())
    }

    /// Snapshot of all tasks, oldest first
    pub fn list(&self) -> Vec<TaskInfo> {
        let mut tasks: Vec<TaskInfo> = self.tasks.iter().map(|e| e.value().info()).collect();
        tasks.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        tasks
    }

    /// Kill every running task; returns how many were killed
    pub async fn shutdown(&self) -> usize {
        let running: Vec<String> = self
            .tasks
            .iter()
            .filter(|e| !e.value().status().is_terminal())
            .map(|e| e.key().clone())
            .collect();

        if running.is_empty() {
            return 0;
        }
        tracing::info!("Shutting down {} background tasks", running.len());

        let results = futures::future::join_all(running.iter().map(|id| self.kill(id))).await;
        results
            .into_iter()
            .filter(|r| matches!(r, Ok(KillOutcome::Killed)))
            .count()
    }
}

fn timeout_reason(max_runtime: Duration) -> String {
    format!("timed out after {}ms", max_runtime.as_millis())
}
