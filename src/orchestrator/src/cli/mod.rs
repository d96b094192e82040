//! CLI command definitions and dispatch.

mod exec;
mod run;
mod tools;

use std::path::PathBuf;

use a3s_orchestrator_core::{LogLevel, OrchestratorConfig};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

/// A3S Orchestrator: tool execution under hooks, with background tasks.
#[derive(Parser)]
#[command(name = "a3s-orchestrator", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Configuration file (YAML or JSON)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Workspace directory (overrides the config file)
    #[arg(long, global = true)]
    pub workspace: Option<PathBuf>,

    /// Session id handed to hooks (overrides the config file)
    #[arg(long, global = true)]
    pub session: Option<String>,

    /// Log output format (logs go to stderr)
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// List the available tools
    Tools(tools::ToolsArgs),
    /// Run a single tool invocation and print its result
    Exec(exec::ExecArgs),
    /// Serve invocations as JSON lines on stdin/stdout
    Run(run::RunArgs),
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<()> {
    let config = load_config(&cli.global)?;
    init_tracing(config.log_level, cli.global.log_format);

    match cli.command {
        Command::Tools(args) => tools::execute(args, config).await,
        Command::Exec(args) => exec::execute(args, config).await,
        Command::Run(args) => run::execute(args, config).await,
    }
}

/// Config file (or defaults) with command-line overrides applied.
pub(crate) fn load_config(global: &GlobalArgs) -> Result<OrchestratorConfig> {
    let mut config = match &global.config {
        Some(path) => OrchestratorConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => OrchestratorConfig::default(),
    };

    if let Some(workspace) = &global.workspace {
        config.workspace = workspace.clone();
    }
    if let Some(session) = &global.session {
        config.session_id = Some(session.clone());
    }
    if !config.workspace.is_dir() {
        anyhow::bail!(
            "Workspace {} is not a directory",
            config.workspace.display()
        );
    }
    Ok(config)
}

/// Install the stderr subscriber; `RUST_LOG` wins over the configured level.
fn init_tracing(level: LogLevel, format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exec_with_globals() {
        let cli = Cli::try_parse_from([
            "a3s-orchestrator",
            "exec",
            "bash",
            "--input",
            r#"{"command": "ls"}"#,
            "--workspace",
            "/tmp",
            "--log-format",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.global.workspace, Some(PathBuf::from("/tmp")));
        assert_eq!(cli.global.log_format, LogFormat::Json);
        match cli.command {
            Command::Exec(args) => {
                assert_eq!(args.tool, "bash");
                assert_eq!(args.input.as_deref(), Some(r#"{"command": "ls"}"#));
            }
            _ => panic!("expected exec"),
        }
    }

    #[test]
    fn test_load_config_overrides() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("orchestrator.yaml");
        std::fs::write(&config_path, "session_id: from-file\ntool_timeout_ms: 5000\n").unwrap();

        let global = GlobalArgs {
            config: Some(config_path),
            workspace: Some(temp_dir.path().to_path_buf()),
            session: Some("from-flag".to_string()),
            log_format: LogFormat::Text,
        };
        let config = load_config(&global).unwrap();

        assert_eq!(config.session_id.as_deref(), Some("from-flag"));
        assert_eq!(config.tool_timeout_ms, 5000);
        assert_eq!(config.workspace, temp_dir.path());
    }

    #[test]
    fn test_load_config_rejects_missing_workspace() {
        let global = GlobalArgs {
            config: None,
            workspace: Some(PathBuf::from("/definitely/not/here")),
            session: None,
            log_format: LogFormat::Text,
        };
        assert!(load_config(&global).is_err());
    }
}
