//! Hooks Engine
//!
//! Runs the configured hooks for a lifecycle event and aggregates their
//! answers.
//!
//! ## Dispatch
//!
//! For an event, the hooks whose matcher admits the tool name are split by
//! their `blocking` flag:
//!
//! - Non-blocking hooks are spawned onto the runtime and forgotten. Their
//!   outcome is only logged.
//! - Blocking hooks run one at a time in configuration order. The first
//!   explicit block stops the dispatch and its message is surfaced.
//!
//! A hook that fails to run, answers garbage, or does not answer within its
//! timeout is treated as allow. Only an explicit block denies.

mod events;
mod executor;

pub use events::{
    HookDispatchResult, HookOutcome, HookPayload, HookResponse, HookRun, PreToolUseDecision,
};

use a3s_orchestrator_core::{HookDefinition, HookEventType, HooksConfig};
use std::time::Instant;

/// Dispatches lifecycle events to configured hooks
pub struct HookEngine {
    config: HooksConfig,
    client: reqwest::Client,
}

impl Default for HookEngine {
    fn default() -> Self {
        Self::new(HooksConfig::default())
    }
}

impl HookEngine {
    pub fn new(config: HooksConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Number of configured hooks across all events
    pub fn len(&self) -> usize {
        self.config.len()
    }

    pub fn is_empty(&self) -> bool {
        self.config.is_empty()
    }

    /// Hooks configured for `event`, in configuration order
    pub fn hooks_for(&self, event: HookEventType) -> &[HookDefinition] {
        self.config.for_event(event)
    }

    /// Dispatch `payload` to the hooks of its event.
    pub async fn fire(&self, payload: &HookPayload) -> HookDispatchResult {
        let tool_name = payload.tool_name.as_deref();
        let (blocking, background): (Vec<&HookDefinition>, Vec<&HookDefinition>) = self
            .hooks_for(payload.event)
            .iter()
            .filter(|hook| hook.matcher.matches(tool_name))
            .partition(|hook| hook.blocking);

        let mut result = HookDispatchResult::default();
        if blocking.is_empty() && background.is_empty() {
            return result;
        }

        tracing::debug!(
            event = %payload.event,
            tool = tool_name.unwrap_or(""),
            blocking = blocking.len(),
            background = background.len(),
            "Dispatching hooks"
        );

        for hook in background {
            let hook = hook.clone();
            let client = self.client.clone();
            let payload = payload.clone();
            tokio::spawn(async move {
                let outcome = executor::run_hook(&client, &hook, &payload).await;
                log_outcome(&hook, &payload, &outcome);
            });
        }

        for hook in blocking {
            let started = Instant::now();
            let outcome = executor::run_hook(&self.client, hook, payload).await;
            log_outcome(hook, payload, &outcome);

            if matches!(outcome, HookOutcome::Failed { .. } | HookOutcome::TimedOut) {
                result.success = false;
            }
            let block_message = match &outcome {
                HookOutcome::Blocked { message } => Some(message.clone()),
                _ => None,
            };

            result.output.push(HookRun {
                hook: hook.label(),
                outcome,
                duration_ms: started.elapsed().as_millis() as u64,
            });

            if let Some(message) = block_message {
                result.blocked = true;
                result.block_message = Some(message);
                break;
            }
        }

        result
    }

    /// Ask the PreToolUse hooks whether `tool_name` may run with `input`
    pub async fn run_pre_tool_use_hooks(
        &self,
        session_id: &str,
        tool_name: &str,
        input: &serde_json::Value,
    ) -> PreToolUseDecision {
        let payload = HookPayload::new(HookEventType::PreToolUse, session_id)
            .with_tool(tool_name, input.clone());
        PreToolUseDecision::from(&self.fire(&payload).await)
    }

    /// Run PostToolUse hooks; returns the block message if one objected
    pub async fn run_post_tool_use_hooks(
        &self,
        session_id: &str,
        tool_name: &str,
        input: &serde_json::Value,
        output: &serde_json::Value,
    ) -> Option<String> {
        let payload = HookPayload::new(HookEventType::PostToolUse, session_id)
            .with_tool(tool_name, input.clone())
            .with_tool_output(output.clone());
        self.fire(&payload).await.block_message
    }

    /// Run PostToolUseFailure hooks; returns the block message if one objected
    pub async fn run_post_tool_use_failure_hooks(
        &self,
        session_id: &str,
        tool_name: &str,
        input: &serde_json::Value,
        error: &serde_json::Value,
        message: &str,
    ) -> Option<String> {
        let payload = HookPayload::new(HookEventType::PostToolUseFailure, session_id)
            .with_tool(tool_name, input.clone())
            .with_tool_output(error.clone())
            .with_message(message);
        self.fire(&payload).await.block_message
    }
}

fn log_outcome(hook: &HookDefinition, payload: &HookPayload, outcome: &HookOutcome) {
    let label = hook.label();
    match outcome {
        HookOutcome::Allowed { .. } => {
            tracing::debug!(hook = %label, event = %payload.event, "Hook allowed");
        }
        HookOutcome::Blocked { message } => {
            tracing::info!(
                hook = %label,
                event = %payload.event,
                tool = payload.tool_name.as_deref().unwrap_or(""),
                "Hook blocked: {}",
                message
            );
        }
        HookOutcome::Failed { reason } => {
            tracing::warn!(hook = %label, event = %payload.event, "Hook failed (allowing): {}", reason);
        }
        HookOutcome::TimedOut => {
            tracing::warn!(
                hook = %label,
                event = %payload.event,
                timeout_ms = hook.timeout.as_millis() as u64,
                "Hook timed out (allowing)"
            );
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn engine(yaml: &str) -> HookEngine {
        HookEngine::new(HooksConfig::from_yaml_str(yaml).unwrap())
    }

    /// Helper to create a test script and make it executable.
    fn create_test_script(dir: &Path, name: &str, content: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script_path = dir.join(name);
        std::fs::write(&script_path, content).unwrap();
        let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script_path, perms).unwrap();
        script_path
    }

    fn pre_tool(tool: &str) -> HookPayload {
        HookPayload::new(HookEventType::PreToolUse, "s-1")
            .with_tool(tool, serde_json::json!({"command": "ls"}))
    }

    #[tokio::test]
    async fn test_no_hooks_allows() {
        let engine = HookEngine::default();
        assert!(engine.is_empty());

        let result = engine.fire(&pre_tool("bash")).await;
        assert!(result.success);
        assert!(!result.blocked);
        assert!(result.output.is_empty());
    }

    #[tokio::test]
    async fn test_exit_code_blocks() {
        let engine = engine(
            r#"
PreToolUse:
  - hooks:
      - command: "echo 'bash is disabled' >&2; exit 2"
"#,
        );

        let decision = engine
            .run_pre_tool_use_hooks("s-1", "bash", &serde_json::json!({}))
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.message.as_deref(), Some("bash is disabled"));
    }

    #[tokio::test]
    async fn test_first_block_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("second-ran");
        let engine = engine(&format!(
            r#"
PreToolUse:
  - hooks:
      - command: "echo '{{\"blocked\": true, \"message\": \"first says no\"}}'"
      - command: "touch {}"
"#,
            marker.display()
        ));

        let result = engine.fire(&pre_tool("bash")).await;
        assert!(result.blocked);
        assert_eq!(result.block_message.as_deref(), Some("first says no"));
        assert_eq!(result.output.len(), 1);
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_matcher_filters_hooks() {
        let engine = engine(
            r#"
PreToolUse:
  - matcher: edit
    hooks:
      - command: "exit 1"
  - matcher: "/^task/"
    hooks:
      - command: "exit 1"
"#,
        );

        assert!(!engine.fire(&pre_tool("bash")).await.blocked);
        assert!(engine.fire(&pre_tool("edit")).await.blocked);
        assert!(engine.fire(&pre_tool("task_kill")).await.blocked);
    }

    #[tokio::test]
    async fn test_timeout_fails_open() {
        let engine = engine(
            r#"
PreToolUse:
  - hooks:
      - command: "sleep 5; exit 1"
        timeout_ms: 200
"#,
        );

        let started = Instant::now();
        let result = engine.fire(&pre_tool("bash")).await;
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(!result.blocked);
        assert!(!result.success);
        assert_eq!(result.output[0].outcome, HookOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_hook_receives_payload_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("seen.json");
        let script = create_test_script(
            dir.path(),
            "hook.sh",
            &format!(
                "#!/bin/sh\ncat > {}\necho \"$A3S_HOOK_EVENT $A3S_TOOL_NAME $A3S_SESSION_ID $EXTRA\" > {}.env\n",
                out.display(),
                out.display()
            ),
        );
        let engine = engine(&format!(
            r#"
PreToolUse:
  - hooks:
      - command: sh {}
        env:
          EXTRA: "yes"
"#,
            script.display()
        ));

        assert!(!engine.fire(&pre_tool("bash")).await.blocked);

        let seen: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(seen["event"], "PreToolUse");
        assert_eq!(seen["tool_name"], "bash");
        assert_eq!(seen["tool_input"]["command"], "ls");

        let env = std::fs::read_to_string(format!("{}.env", out.display())).unwrap();
        assert_eq!(env.trim(), "PreToolUse bash s-1 yes");
    }

    #[tokio::test]
    async fn test_non_blocking_hooks_are_detached() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let engine = engine(&format!(
            r#"
PostToolUse:
  - hooks:
      - command: "sleep 0.2; touch {}; exit 1"
"#,
            marker.display()
        ));
        assert!(!engine.hooks_for(HookEventType::PostToolUse)[0].blocking);

        let feedback = engine
            .run_post_tool_use_hooks("s-1", "bash", &serde_json::json!({}), &serde_json::json!("ok"))
            .await;
        assert!(feedback.is_none());

        for _ in 0..50 {
            if marker.exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("non-blocking hook never ran");
    }

    #[tokio::test]
    async fn test_blocking_post_hook_feedback() {
        let engine = engine(
            r#"
PostToolUseFailure:
  - hooks:
      - command: "echo \"saw: $A3S_TOOL_NAME\" >&2; exit 1"
        blocking: true
"#,
        );

        let feedback = engine
            .run_post_tool_use_failure_hooks(
                "s-1",
                "edit",
                &serde_json::json!({}),
                &serde_json::json!({"code": 1101}),
                "String not found",
            )
            .await;
        assert_eq!(feedback.as_deref(), Some("saw: edit"));
    }

    // ------------------------------------------------------------------------
    // URL hooks
    // ------------------------------------------------------------------------

    /// Serve one HTTP request with `status` and `body`; yields the request body.
    async fn serve_once(status: u16, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 4096];
            let request_body = loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break String::new();
                }
                received.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&received).to_string();
                if let Some(split) = text.find("\r\n\r\n") {
                    let length = text[..split]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    if received.len() >= split + 4 + length {
                        break text[split + 4..].to_string();
                    }
                }
            };

            let response = format!(
                "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            request_body
        });

        (url, handle)
    }

    #[tokio::test]
    async fn test_url_hook_blocks() {
        let (url, server) = serve_once(200, r#"{"blocked": true, "message": "denied remotely"}"#).await;
        let engine = engine(&format!(
            r#"
PreToolUse:
  - hooks:
      - type: url
        url: {}
        headers:
          Authorization: Bearer test
"#,
            url
        ));

        let decision = engine
            .run_pre_tool_use_hooks("s-1", "bash", &serde_json::json!({"command": "ls"}))
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.message.as_deref(), Some("denied remotely"));

        let request: serde_json::Value = serde_json::from_str(&server.await.unwrap()).unwrap();
        assert_eq!(request["tool_name"], "bash");
        assert_eq!(request["session_id"], "s-1");
    }

    #[tokio::test]
    async fn test_url_hook_non_2xx_fails_open() {
        let (url, _server) = serve_once(500, r#"{"blocked": true}"#).await;
        let engine = engine(&format!(
            "PreToolUse:\n  - hooks:\n      - type: url\n        url: {}\n",
            url
        ));

        let result = engine.fire(&pre_tool("bash")).await;
        assert!(!result.blocked);
        assert!(!result.success);
        assert!(matches!(result.output[0].outcome, HookOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_url_hook_unreachable_fails_open() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let engine = engine(&format!(
            "PreToolUse:\n  - hooks:\n      - url: http://127.0.0.1:{}/hook\n        timeout_ms: 1000\n",
            port
        ));

        let decision = engine
            .run_pre_tool_use_hooks("s-1", "bash", &serde_json::json!({}))
            .await;
        assert!(decision.allowed);
    }
}
