//! Running a single hook
//!
//! Command hooks get the payload on stdin; URL hooks get it as the request
//! body. Either way the answer is reduced to a [`HookOutcome`]. Nothing here
//! returns an error: failures become `Failed` or `TimedOut` and the caller
//! decides what they mean.

use super::events::{HookOutcome, HookPayload, HookResponse};
use crate::tasks::GroupKillGuard;
use a3s_orchestrator_core::{ErrorCode, HookDefinition, HookKind, OrchestratorError};
use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Run `hook` against `payload`, bounded by the hook's timeout
pub(crate) async fn run_hook(
    client: &reqwest::Client,
    hook: &HookDefinition,
    payload: &HookPayload,
) -> HookOutcome {
    match &hook.kind {
        HookKind::Command { command } => run_command_hook(hook, command, payload).await,
        HookKind::Url {
            url,
            method,
            headers,
        } => run_url_hook(client, hook, url, method, headers, payload).await,
    }
}

// ============================================================================
// Command hooks
// ============================================================================

async fn run_command_hook(
    hook: &HookDefinition,
    command: &str,
    payload: &HookPayload,
) -> HookOutcome {
    let body = match serde_json::to_string(payload) {
        Ok(body) => body,
        Err(e) => {
            return HookOutcome::Failed {
                reason: format!("failed to encode hook payload: {}", e),
            }
        }
    };

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .envs(&hook.env)
        .env("A3S_HOOK_EVENT", payload.event.as_str())
        .env("A3S_SESSION_ID", &payload.session_id)
        .env("A3S_TOOL_NAME", payload.tool_name.as_deref().unwrap_or(""))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return HookOutcome::Failed {
                reason: format!("failed to spawn hook command: {}", e),
            }
        }
    };
    // Anything the hook started goes down with it on timeout
    let guard = GroupKillGuard::new(child.id());

    let run = async move {
        if let Some(mut stdin) = child.stdin.take() {
            // The hook may exit without reading its input
            if let Err(e) = stdin.write_all(body.as_bytes()).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    tracing::debug!("Failed to write hook payload: {}", e);
                }
            }
        }
        child.wait_with_output().await
    };

    let finished = tokio::time::timeout(hook.timeout, run).await;
    if finished.is_ok() {
        guard.disarm();
    } else {
        tracing::debug!(hook = %hook.label(), "Hook timed out; killing its process group");
        drop(guard);
    }

    match finished {
        Ok(Ok(output)) => interpret_command_output(
            output.status.code(),
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        ),
        Ok(Err(e)) => HookOutcome::Failed {
            reason: format!("hook command failed: {}", e),
        },
        Err(_) => HookOutcome::TimedOut,
    }
}

/// Exit 0 allows and anything else blocks. A JSON answer on stdout with
/// `blocked: true` blocks regardless of the exit code and supplies the
/// message; `blocked: false` cannot override a non-zero exit.
pub(crate) fn interpret_command_output(
    exit_code: Option<i32>,
    stdout: &str,
    stderr: &str,
) -> HookOutcome {
    let stdout = stdout.trim();
    let stderr = stderr.trim();
    let response = parse_response(stdout);

    if let Some(HookResponse {
        blocked: Some(true),
        message,
    }) = &response
    {
        return HookOutcome::Blocked {
            message: message
                .clone()
                .or_else(|| non_empty(stderr))
                .unwrap_or_else(|| "Blocked by hook".to_string()),
        };
    }

    if exit_code == Some(0) {
        return HookOutcome::Allowed {
            output: match response {
                Some(response) if response.blocked.is_some() => response.message,
                _ => non_empty(stdout),
            },
        };
    }

    let message = response
        .and_then(|r| r.message)
        .or_else(|| non_empty(stderr))
        .or_else(|| non_empty(stdout))
        .unwrap_or_else(|| match exit_code {
            Some(code) => format!("Blocked by hook (exit code {})", code),
            None => "Blocked by hook (terminated by signal)".to_string(),
        });
    HookOutcome::Blocked { message }
}

/// Whole stdout as a JSON object, or failing that its last line
fn parse_response(stdout: &str) -> Option<HookResponse> {
    if stdout.is_empty() {
        return None;
    }
    let parse = |text: &str| -> Option<HookResponse> {
        let value: serde_json::Value = serde_json::from_str(text).ok()?;
        if !value.is_object() {
            return None;
        }
        serde_json::from_value(value).ok()
    };

    parse(stdout).or_else(|| stdout.lines().last().and_then(|line| parse(line.trim())))
}

fn non_empty(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

// ============================================================================
// URL hooks
// ============================================================================

async fn run_url_hook(
    client: &reqwest::Client,
    hook: &HookDefinition,
    url: &str,
    method: &str,
    headers: &BTreeMap<String, String>,
    payload: &HookPayload,
) -> HookOutcome {
    let method = match reqwest::Method::from_bytes(method.as_bytes()) {
        Ok(method) => method,
        Err(_) => {
            return HookOutcome::Failed {
                reason: format!("invalid HTTP method: {}", method),
            }
        }
    };

    let mut request = client
        .request(method, url)
        .timeout(hook.timeout)
        .header("X-A3S-Hook-Event", payload.event.as_str())
        .json(payload);
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) if e.is_timeout() => return HookOutcome::TimedOut,
        Err(e) => return request_failed(&e),
    };

    if let Err(e) = response.error_for_status_ref() {
        return request_failed(&e);
    }

    match response.text().await {
        Ok(body) => interpret_response_body(&body),
        Err(e) if e.is_timeout() => HookOutcome::TimedOut,
        Err(e) => request_failed(&e),
    }
}

fn request_failed(err: &reqwest::Error) -> HookOutcome {
    let classified = classify_request_error(err);
    HookOutcome::Failed {
        reason: format!("{} ({})", classified, classified.kind()),
    }
}

/// Classify an HTTP client failure into the network error range
pub(crate) fn classify_request_error(err: &reqwest::Error) -> OrchestratorError {
    let code = match err.status() {
        Some(status) if status.as_u16() == 429 => ErrorCode::NETWORK_RATE_LIMITED,
        Some(_) => ErrorCode::NETWORK_BAD_RESPONSE,
        None if err.is_timeout() => ErrorCode::NETWORK_TIMEOUT,
        None if err.is_connect() || err.is_request() => ErrorCode::NETWORK_CONNECTION_FAILED,
        None if err.is_decode() || err.is_body() => ErrorCode::NETWORK_BAD_RESPONSE,
        None => ErrorCode::NETWORK_CONNECTION_FAILED,
    };

    let mut classified = OrchestratorError::new(code, err.to_string());
    if let Some(status) = err.status() {
        classified = classified.with_detail("status", status.as_u16());
    }
    if let Some(url) = err.url() {
        classified = classified.with_context("url", url.as_str());
    }
    classified
}

/// An empty 2xx body allows; otherwise it must be a JSON [`HookResponse`].
pub(crate) fn interpret_response_body(body: &str) -> HookOutcome {
    let body = body.trim();
    if body.is_empty() {
        return HookOutcome::Allowed { output: None };
    }

    match serde_json::from_str::<HookResponse>(body) {
        Ok(HookResponse {
            blocked: Some(true),
            message,
        }) => HookOutcome::Blocked {
            message: message.unwrap_or_else(|| "Blocked by hook".to_string()),
        },
        Ok(response) => HookOutcome::Allowed {
            output: response.message,
        },
        Err(e) => HookOutcome::Failed {
            reason: format!("malformed hook response: {}", e),
        },
    }
}
