//! `a3s-orchestrator tools` command: List the available tools.

use a3s_orchestrator_core::OrchestratorConfig;
use anyhow::Result;
use clap::{Args, ValueEnum};
use comfy_table::{ContentArrangement, Table};

use crate::tools::ToolDefinition;
use crate::Orchestrator;

#[derive(Args)]
pub struct ToolsArgs {
    /// Output format
    #[arg(long, value_enum, default_value_t = ToolsFormat::Json)]
    pub format: ToolsFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolsFormat {
    /// Full definitions, schemas included
    Json,
    /// Names and descriptions
    Table,
}

pub async fn execute(args: ToolsArgs, config: OrchestratorConfig) -> Result<()> {
    let orchestrator = Orchestrator::new(config)?;
    let definitions = orchestrator.definitions();

    match args.format {
        ToolsFormat::Json => println!("{}", serde_json::to_string_pretty(&definitions)?),
        ToolsFormat::Table => println!("{}", render_table(&definitions)),
    }

    orchestrator.shutdown().await;
    Ok(())
}

fn render_table(definitions: &[ToolDefinition]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(["NAME", "REQUIRED", "DESCRIPTION"]);

    for definition in definitions {
        let required = definition.parameters["required"]
            .as_array()
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(|f| f.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        table.add_row([
            definition.name.as_str(),
            required.as_str(),
            first_sentence(&definition.description),
        ]);
    }
    table
}

fn first_sentence(text: &str) -> &str {
    match text.find(". ") {
        Some(end) => &text[..=end],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_table_lists_required_fields() {
        let definitions = vec![ToolDefinition {
            name: "bash".to_string(),
            description: "Run things. More words here.".to_string(),
            parameters: serde_json::json!({"required": ["command"]}),
        }];
        let rendered = render_table(&definitions).to_string();

        assert!(rendered.contains("bash"));
        assert!(rendered.contains("command"));
        assert!(rendered.contains("Run things."));
        assert!(!rendered.contains("More words"));
    }
}
