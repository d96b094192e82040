//! Integration test: tool dispatch through hooks, edits and background tasks.
//!
//! Drives the public API the way an agent loop does: one `Orchestrator` per
//! scratch workspace, invocations by name, results inspected as JSON-shaped
//! `ToolResult`s.
//!
//! ## Running
//!
//! ```bash
//! cargo test -p a3s-orchestrator --test orchestration
//! ```
//!
//! Unix only: hooks and shell tasks are run through `sh`/`bash`.

#![cfg(unix)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use a3s_orchestrator::hooks::HookEngine;
use a3s_orchestrator::tasks::{
    BackgroundTaskManager, PollOptions, TaskKind, TaskSpec, TaskStatus, NO_NEW_OUTPUT,
};
use a3s_orchestrator::tools::{ToolContext, ToolOutput};
use a3s_orchestrator::{Orchestrator, ToolDefinition, ToolRegistry};
use a3s_orchestrator_core::{
    classify, ErrorCode, HooksConfig, OrchestratorConfig, Severity, TaskConfig, TaskLimits,
};

fn orchestrator(workspace: &Path, hooks_yaml: Option<&str>) -> Orchestrator {
    let mut config = OrchestratorConfig {
        workspace: workspace.to_path_buf(),
        session_id: Some("it-session".to_string()),
        ..Default::default()
    };
    if let Some(yaml) = hooks_yaml {
        config.hooks = HooksConfig::from_yaml_str(yaml).unwrap();
    }
    Orchestrator::new(config).unwrap()
}

#[tokio::test]
async fn test_unregistered_tool_is_a_result_not_a_panic() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path(), None);

    let result = orchestrator
        .execute("does_not_exist", &serde_json::json!({}))
        .await;

    assert!(!result.success);
    assert!(result.output.is_none());
    let error = result.error.unwrap();
    assert_eq!(error.error_code(), ErrorCode::TOOL_NOT_FOUND);
    assert_eq!(error.kind, "TOOL_NOT_FOUND");
}

#[tokio::test]
async fn test_atomic_edit_failure_leaves_file_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let original = "fn main() {\n    println!(\"hi\");\n}\n";
    std::fs::write(dir.path().join("main.rs"), original).unwrap();
    let orchestrator = orchestrator(dir.path(), None);

    let result = orchestrator
        .execute(
            "edit",
            &serde_json::json!({
                "file_path": "main.rs",
                "edits": [
                    {"old_string": "hi", "new_string": "hello"},
                    {"old_string": "not in the file", "new_string": "x"}
                ]
            }),
        )
        .await;

    assert!(!result.success);
    assert_eq!(result.error_code(), Some(ErrorCode::STRING_NOT_FOUND));
    assert_eq!(
        std::fs::read(dir.path().join("main.rs")).unwrap(),
        original.as_bytes()
    );
}

#[tokio::test]
async fn test_replace_all_decides_non_unique_match() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("f.txt"), "foo and foo").unwrap();
    let orchestrator = orchestrator(dir.path(), None);

    let refused = orchestrator
        .execute(
            "edit",
            &serde_json::json!({"file_path": "f.txt", "old_string": "foo", "new_string": "bar"}),
        )
        .await;
    assert_eq!(refused.error_code(), Some(ErrorCode::NON_UNIQUE_MATCH));

    let replaced = orchestrator
        .execute(
            "edit",
            &serde_json::json!({
                "file_path": "f.txt", "old_string": "foo", "new_string": "bar", "replace_all": true
            }),
        )
        .await;
    assert!(replaced.success);
    assert_eq!(replaced.extra["replacements"], 2);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("f.txt")).unwrap(),
        "bar and bar"
    );
}

#[tokio::test]
async fn test_multi_edit_keeps_prior_operations() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "one").unwrap();
    std::fs::write(dir.path().join("c.txt"), "three").unwrap();
    let orchestrator = orchestrator(dir.path(), None);

    let result = orchestrator
        .execute(
            "multi_edit",
            &serde_json::json!({"edits": [
                {"file_path": "a.txt", "old_string": "one", "new_string": "1"},
                {"file_path": "b.txt", "old_string": "two", "new_string": "2"},
                {"file_path": "c.txt", "old_string": "three", "new_string": "3"}
            ]}),
        )
        .await;

    assert!(!result.success);
    assert_eq!(result.extra["files_modified"], 2);
    assert_eq!(result.extra["total_edits"], 2);
    assert_eq!(result.extra["edit_results"][1]["success"], false);
    assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "1");
    assert_eq!(std::fs::read_to_string(dir.path().join("c.txt")).unwrap(), "3");
}

#[tokio::test]
async fn test_edit_outside_workspace_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path(), None);

    let result = orchestrator
        .execute(
            "edit",
            &serde_json::json!({"file_path": "../escape.txt", "old_string": "a", "new_string": "b"}),
        )
        .await;

    assert_eq!(result.error_code(), Some(ErrorCode::PATH_OUTSIDE_WORKSPACE));
}

#[tokio::test]
async fn test_first_blocking_hook_short_circuits_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("second-hook-ran");
    let hooks = format!(
        r#"
PreToolUse:
  - matcher: bash
    hooks:
      - command: "echo 'bash is disabled' >&2; exit 2"
      - command: "touch {}"
"#,
        marker.display()
    );
    let orchestrator = orchestrator(dir.path(), Some(&hooks));

    let result = orchestrator
        .execute("bash", &serde_json::json!({"command": "echo should-not-run"}))
        .await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert_eq!(error.error_code(), ErrorCode::HOOK_BLOCKED);
    assert!(error.message.contains("bash is disabled"));
    assert!(!marker.exists());

    // Matcher does not cover edit
    std::fs::write(dir.path().join("x.txt"), "a").unwrap();
    let edit = orchestrator
        .execute(
            "edit",
            &serde_json::json!({"file_path": "x.txt", "old_string": "a", "new_string": "b"}),
        )
        .await;
    assert!(edit.success);
}

#[tokio::test]
async fn test_post_tool_use_failure_hook_sees_the_error() {
    let dir = tempfile::tempdir().unwrap();
    let seen = dir.path().join("failure-payload.json");
    let hooks = format!(
        r#"
PostToolUseFailure:
  - hooks:
      - command: "cat > {}"
"#,
        seen.display()
    );
    let orchestrator = orchestrator(dir.path(), Some(&hooks));

    let result = orchestrator
        .execute("bash", &serde_json::json!({"command": "exit 7"}))
        .await;
    assert!(!result.success);

    // Non-blocking hooks run detached
    let mut payload = None;
    for _ in 0..50 {
        if let Ok(text) = std::fs::read_to_string(&seen) {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
                payload = Some(value);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let payload = payload.expect("failure hook did not run");
    assert_eq!(payload["event"], "PostToolUseFailure");
    assert_eq!(payload["tool_name"], "bash");
    assert_eq!(payload["session_id"], "it-session");
}

#[tokio::test]
async fn test_spawn_cap_and_release() {
    let tasks = BackgroundTaskManager::new(TaskConfig {
        shell: TaskLimits {
            max_concurrent: 1,
            ..TaskLimits::default()
        },
        ..TaskConfig::default()
    });
    let dir = tempfile::tempdir().unwrap();

    let first = tasks
        .spawn(TaskSpec::shell("sleep 0.3", dir.path()))
        .unwrap();
    let err = tasks
        .spawn(TaskSpec::shell("true", dir.path()))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::RESOURCE_LIMIT_EXCEEDED);

    let done = tasks
        .poll(
            &first,
            PollOptions {
                block: true,
                timeout: Some(Duration::from_secs(5)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(done.status, TaskStatus::Completed);

    assert!(tasks.spawn(TaskSpec::shell("true", dir.path())).is_ok());
}

#[tokio::test]
async fn test_second_poll_reports_no_new_output() {
    let tasks = BackgroundTaskManager::default();
    let dir = tempfile::tempdir().unwrap();
    let id = tasks
        .spawn(TaskSpec::shell("echo once", dir.path()))
        .unwrap();

    let blocking = PollOptions {
        block: true,
        timeout: Some(Duration::from_secs(5)),
        ..Default::default()
    };
    let first = tasks.poll(&id, blocking.clone()).await.unwrap();
    assert_eq!(first.new_output, "once\n");

    let second = tasks.poll(&id, PollOptions::default()).await.unwrap();
    assert_eq!(second.new_output, NO_NEW_OUTPUT);
}

#[tokio::test]
async fn test_max_runtime_kills_the_task() {
    let tasks = BackgroundTaskManager::default();
    let dir = tempfile::tempdir().unwrap();
    let id = tasks
        .spawn(TaskSpec::shell("sleep 30", dir.path()).with_max_runtime(Duration::from_millis(200)))
        .unwrap();

    let result = tasks
        .poll(
            &id,
            PollOptions {
                block: true,
                timeout: Some(Duration::from_secs(10)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(result.status, TaskStatus::Failed);
    assert!(result.failure_reason.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_tool_timeout_kills_owned_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let tasks = Arc::new(BackgroundTaskManager::default());
    let registry = ToolRegistry::new(
        ToolContext::new(dir.path().to_path_buf()).with_tasks(tasks.clone()),
        Arc::new(HookEngine::default()),
    )
    .with_default_timeout(Duration::from_millis(300));

    registry
        .register_handler(
            ToolDefinition {
                name: "spawn_and_wait".to_string(),
                description: "Spawns an owned task and never returns".to_string(),
                parameters: serde_json::json!({"type": "object"}),
            },
            |_args, ctx| async move {
                ctx.spawn_owned(TaskSpec::shell("sleep 30", ctx.workspace.clone()))?;
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, anyhow::Error>(ToolOutput::success("unreachable"))
            },
        )
        .unwrap();

    let result = registry
        .execute("spawn_and_wait", &serde_json::json!({}))
        .await;

    assert_eq!(result.error_code(), Some(ErrorCode::TOOL_TIMEOUT));
    assert_eq!(tasks.running_count(TaskKind::Shell), 0);
    assert!(tasks.list().is_empty());
}

#[test]
fn test_classification_is_pure() {
    for code in [
        ErrorCode::TOOL_TIMEOUT,
        ErrorCode::SANDBOX_ESCAPE,
        ErrorCode::NETWORK_RATE_LIMITED,
        ErrorCode(42),
    ] {
        assert_eq!(classify(code), classify(code));
    }
    assert_eq!(classify(ErrorCode::SANDBOX_ESCAPE).severity, Severity::Critical);
    assert!(classify(ErrorCode::NETWORK_RATE_LIMITED).retryable);
}
