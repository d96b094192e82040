//! `a3s-orchestrator run` command: Serve invocations as JSON lines.
//!
//! Each stdin line is either a tool invocation (`{"tool": ..., "input": ...}`)
//! answered with a `ToolResult`, or a prompt (`{"prompt": ...}`) answered
//! with the `UserPromptSubmit` dispatch result. Background tasks are shut
//! down at EOF.

use a3s_orchestrator_core::{ErrorCode, OrchestratorConfig, OrchestratorError};
use anyhow::{Context, Result};
use clap::Args;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::tools::{ToolInvocation, ToolResult};
use crate::Orchestrator;

#[derive(Args)]
pub struct RunArgs {
    /// Do not fire SessionStart / SessionEnd hooks
    #[arg(long)]
    pub no_session_hooks: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Request {
    Prompt { prompt: String },
    Invocation(ToolInvocation),
}

pub async fn execute(args: RunArgs, config: OrchestratorConfig) -> Result<()> {
    let orchestrator = Orchestrator::new(config)?;
    if !args.no_session_hooks {
        orchestrator.start_session().await;
    }

    let stdin = BufReader::new(tokio::io::stdin());
    let served = serve(&orchestrator, stdin, tokio::io::stdout()).await;

    let killed = if args.no_session_hooks {
        orchestrator.tasks().shutdown().await
    } else {
        orchestrator.shutdown().await
    };
    tracing::info!("Input closed; killed {} background task(s)", killed);

    served.map(|count| tracing::info!("Served {} request(s)", count))
}

/// Answer one JSON line per input line until EOF; returns the number served.
pub(crate) async fn serve<R, W>(orchestrator: &Orchestrator, reader: R, mut writer: W) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut served = 0usize;

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(line) {
            Ok(Request::Invocation(invocation)) => {
                serde_json::to_value(orchestrator.execute_invocation(&invocation).await)?
            }
            Ok(Request::Prompt { prompt }) => {
                serde_json::to_value(orchestrator.submit_prompt(&prompt).await)?
            }
            Err(e) => {
                tracing::warn!("Rejected malformed request: {}", e);
                let err = OrchestratorError::new(
                    ErrorCode::VALIDATION_FAILED,
                    format!("Malformed request: {}", e),
                );
                serde_json::to_value(ToolResult::failure(&err))?
            }
        };

        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        writer.write_all(&out).await.context("Failed to write stdout")?;
        writer.flush().await.context("Failed to flush stdout")?;
        served += 1;
    }

    Ok(served)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_serve_json_lines() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("notes.txt"), "draft").unwrap();
        let orchestrator = Orchestrator::new(OrchestratorConfig {
            workspace: temp_dir.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap();

        let input = concat!(
            r#"{"tool": "edit", "input": {"file_path": "notes.txt", "old_string": "draft", "new_string": "final"}}"#,
            "\n\n",
            r#"{"tool": "nope"}"#,
            "\n",
            "not json\n",
            r#"{"prompt": "hello"}"#,
            "\n",
        );
        let mut output = Vec::new();
        let served = serve(&orchestrator, input.as_bytes(), &mut output).await.unwrap();
        assert_eq!(served, 4);

        let responses: Vec<serde_json::Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(responses[0]["success"], true);
        assert_eq!(responses[1]["error"]["code"], ErrorCode::TOOL_NOT_FOUND.as_u32());
        assert_eq!(responses[2]["error"]["code"], ErrorCode::VALIDATION_FAILED.as_u32());
        assert_eq!(responses[3]["blocked"], false);
        assert_eq!(
            std::fs::read_to_string(temp_dir.path().join("notes.txt")).unwrap(),
            "final"
        );
    }
}
