//! Edit tools - exact string replacement in files

use crate::edit::{EditBatch, EditEngine};
use crate::tools::input::ToolInput;
use crate::tools::types::{Tool, ToolContext, ToolOutput};
use anyhow::{Context, Result};
use async_trait::async_trait;

/// Single-file, all-or-nothing editing tool
pub struct EditTool;

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Edit a file by replacing a specific string with another. The old_string must be unique in the file unless replace_all is true. Pass an `edits` list to apply several replacements to the same file; either all of them are applied or none."
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
        let Some(ToolInput::Edit(input)) = parsed else {
            anyhow::bail!("{} received input for another tool", self.name());
        };
        let batch = EditBatch {
            edits: input.pairs()?,
            file_path: input.file_path,
        };

        tracing::info!(
            "Editing file: {} ({} edit(s), workspace: {})",
            batch.file_path,
            batch.edits.len(),
            ctx.workspace.display()
        );

        let engine = EditEngine::new(ctx.workspace.clone());
        let outcome = tokio::task::spawn_blocking(move || engine.apply_atomic(&batch))
            .await
            .context("Edit task failed")?;

        Ok(match outcome {
            Ok(report) => ToolOutput::success(format!(
                "Successfully edited {} ({} replacement(s), +{} -{} lines)",
                report.file_path, report.replacements, report.diff.added, report.diff.removed
            ))
            .with_metadata(serde_json::json!({
                "file_path": report.file_path,
                "replacements": report.replacements,
                "diff": report.diff,
            })),
            Err(e) => ToolOutput::failure(e),
        })
    }
}

/// Multi-file, best-effort editing tool
pub struct MultiEditTool;

#[async_trait]
impl Tool for MultiEditTool {
    fn name(&self) -> &str {
        "multi_edit"
    }

    fn description(&self) -> &str {
        "Apply several independent string replacements, possibly across files. Each operation succeeds or fails on its own; a failure does not undo earlier operations and later operations still run."
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
        let Some(ToolInput::MultiEdit(input)) = parsed else {
            anyhow::bail!("{} received input for another tool", self.name());
        };
        let total = input.edits.len();

        let engine = EditEngine::new(ctx.workspace.clone());
        let report = tokio::task::spawn_blocking(move || engine.apply_batch(&input.edits))
            .await
            .context("Multi-edit task failed")?;

        let failures = report.failures();
        let mut summary = format!(
            "Applied {} of {} edit operation(s) ({} replacement(s))",
            report.files_modified, total, report.total_edits
        );
        for (index, result) in report.edit_results.iter().enumerate() {
            if let Some(error) = &result.error {
                summary.push_str(&format!("\n  [{}] {}: {}", index, result.file_path, error.message));
            }
        }

        let metadata = serde_json::to_value(&report)?;
        let output = if failures == 0 {
            ToolOutput::success(summary)
        } else {
            ToolOutput::error(summary)
        };
        Ok(output.with_metadata(metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use a3s_orchestrator_core::ErrorCode;

    fn workspace() -> (tempfile::TempDir, ToolContext) {
        let temp_dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(temp_dir.path().to_path_buf());
        (temp_dir, ctx)
    }

    #[tokio::test]
    async fn test_edit_single_pair() {
        let (_dir, ctx) = workspace();
        std::fs::write(ctx.workspace.join("a.txt"), "hello world\n").unwrap();

        let output = EditTool
            .execute(
                &serde_json::json!({"file_path": "a.txt", "old_string": "world", "new_string": "rust"}),
                &ctx,
            )
            .await
            .unwrap();

        assert!(output.success, "{}", output.content);
        assert_eq!(
            std::fs::read_to_string(ctx.workspace.join("a.txt")).unwrap(),
            "hello rust\n"
        );
        let metadata = output.metadata.unwrap();
        assert_eq!(metadata["replacements"], 1);
        assert_eq!(metadata["diff"]["added"], 1);
    }

    #[tokio::test]
    async fn test_edit_non_unique_keeps_error_code() {
        let (_dir, ctx) = workspace();
        std::fs::write(ctx.workspace.join("a.txt"), "foo foo").unwrap();

        let output = EditTool
            .execute(
                &serde_json::json!({"file_path": "a.txt", "old_string": "foo", "new_string": "bar"}),
                &ctx,
            )
            .await
            .unwrap();

        assert!(!output.success);
        assert_eq!(output.error.unwrap().code(), ErrorCode::NON_UNIQUE_MATCH);
        assert_eq!(
            std::fs::read_to_string(ctx.workspace.join("a.txt")).unwrap(),
            "foo foo"
        );
    }

    #[tokio::test]
    async fn test_multi_edit_partial_failure() {
        let (_dir, ctx) = workspace();
        std::fs::write(ctx.workspace.join("a.txt"), "alpha").unwrap();

        let output = MultiEditTool
            .execute(
                &serde_json::json!({"edits": [
                    {"file_path": "a.txt", "old_string": "alpha", "new_string": "beta"},
                    {"file_path": "missing.txt", "old_string": "x", "new_string": "y"}
                ]}),
                &ctx,
            )
            .await
            .unwrap();

        assert!(!output.success);
        assert!(output.content.contains("Applied 1 of 2"));
        let metadata = output.metadata.unwrap();
        assert_eq!(metadata["files_modified"], 1);
        assert_eq!(metadata["edit_results"][1]["success"], false);
        assert_eq!(
            std::fs::read_to_string(ctx.workspace.join("a.txt")).unwrap(),
            "beta"
        );
    }

    #[test]
    fn test_edit_parameters_come_from_schema_table() {
        let params = EditTool.parameters();
        assert!(params["properties"]["edits"].is_object());
        assert_eq!(params["additionalProperties"], false);
    }
}
