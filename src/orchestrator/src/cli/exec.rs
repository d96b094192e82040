//! `a3s-orchestrator exec` command: Run a single tool invocation.

use std::io::Read;

use a3s_orchestrator_core::OrchestratorConfig;
use anyhow::{Context, Result};
use clap::Args;

use crate::Orchestrator;

#[derive(Args)]
pub struct ExecArgs {
    /// Tool name
    pub tool: String,

    /// Tool input as JSON; `-` reads it from stdin
    #[arg(long, short)]
    pub input: Option<String>,

    /// Pretty-print the result
    #[arg(long)]
    pub pretty: bool,
}

pub async fn execute(args: ExecArgs, config: OrchestratorConfig) -> Result<()> {
    let input = parse_input(args.input.as_deref())?;

    let orchestrator = Orchestrator::new(config)?;
    let result = orchestrator.execute(&args.tool, &input).await;

    let rendered = if args.pretty {
        serde_json::to_string_pretty(&result)?
    } else {
        serde_json::to_string(&result)?
    };
    println!("{rendered}");

    // Background tasks do not outlive the process
    orchestrator.shutdown().await;

    if !result.success {
        std::process::exit(2);
    }
    Ok(())
}

fn parse_input(raw: Option<&str>) -> Result<serde_json::Value> {
    let text = match raw {
        None => return Ok(serde_json::json!({})),
        Some("-") => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read tool input from stdin")?;
            buf
        }
        Some(text) => text.to_string(),
    };
    serde_json::from_str(&text).context("Tool input is not valid JSON")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input() {
        assert_eq!(parse_input(None).unwrap(), serde_json::json!({}));
        assert_eq!(
            parse_input(Some(r#"{"task_id": "shell_1"}"#)).unwrap()["task_id"],
            "shell_1"
        );
        assert!(parse_input(Some("{not json")).is_err());
    }
}
