//! Edit Engine
//!
//! Exact-string file mutations under two failure contracts:
//!
//! - [`EditEngine::apply_atomic`]: several pairs against one file, all or
//!   nothing. Every pair is checked against an in-memory copy first; the
//!   file is only replaced (temp file + rename) once all of them succeeded.
//! - [`EditEngine::apply_batch`]: independent operations, possibly across
//!   files. A failed operation is recorded and skipped; earlier successes
//!   stay applied and later operations still run.

mod diff;

pub use diff::DiffSummary;

use crate::tools::resolve_in_workspace;
use a3s_orchestrator_core::{ErrorCode, OrchestratorError, Result, SerializedError};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// One old/new replacement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditPair {
    pub old_string: String,
    pub new_string: String,
    #[serde(default)]
    pub replace_all: bool,
}

/// Replacements applied to one file all-or-nothing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditBatch {
    pub file_path: String,
    pub edits: Vec<EditPair>,
}

/// One independent operation of a multi-file batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditOperation {
    pub file_path: String,
    pub old_string: String,
    pub new_string: String,
    #[serde(default)]
    pub replace_all: bool,
}

impl EditOperation {
    fn as_batch(&self) -> EditBatch {
        EditBatch {
            file_path: self.file_path.clone(),
            edits: vec![EditPair {
                old_string: self.old_string.clone(),
                new_string: self.new_string.clone(),
                replace_all: self.replace_all,
            }],
        }
    }
}

/// Result of a successful atomic edit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditReport {
    pub file_path: String,
    /// Total occurrences replaced across all pairs
    pub replacements: usize,
    pub diff: DiffSummary,
}

/// Per-operation outcome of a multi-file batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditResult {
    pub file_path: String,
    pub success: bool,
    pub replacements: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<DiffSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SerializedError>,
}

/// Summary of a multi-file batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEditReport {
    /// Number of successful operations
    pub files_modified: usize,
    /// Replacements summed over successful operations
    pub total_edits: usize,
    pub edit_results: Vec<EditResult>,
}

impl BatchEditReport {
    pub fn failures(&self) -> usize {
        self.edit_results.iter().filter(|r| !r.success).count()
    }
}

/// Applies edits to files inside a workspace
#[derive(Debug, Clone)]
pub struct EditEngine {
    workspace: PathBuf,
}

impl EditEngine {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Apply every pair of `batch` to its file, or none of them.
    pub fn apply_atomic(&self, batch: &EditBatch) -> Result<EditReport> {
        let path = resolve_in_workspace(&self.workspace, &batch.file_path)?;
        let with_path = |e: OrchestratorError| e.with_context("path", batch.file_path.as_str());

        if batch.edits.is_empty() {
            return Err(with_path(OrchestratorError::new(
                ErrorCode::VALIDATION_FAILED,
                "No edits given",
            )));
        }

        let original = std::fs::read_to_string(&path).map_err(|e| {
            with_path(
                OrchestratorError::from_io(&e)
                    .with_detail("reason", format!("Failed to read file: {}", batch.file_path)),
            )
        })?;

        let mut content = original.clone();
        let mut replacements = 0;
        for (index, pair) in batch.edits.iter().enumerate() {
            let (next, count) = apply_pair(&content, pair, &batch.file_path)
                .map_err(|e| with_path(e.with_detail("edit_index", index)))?;
            content = next;
            replacements += count;
        }

        write_atomic(&path, &content).map_err(|e| {
            with_path(
                OrchestratorError::from_io(&e)
                    .with_detail("reason", format!("Failed to write file: {}", batch.file_path)),
            )
        })?;

        tracing::debug!(
            "Applied {} edit(s) to {} ({} replacements)",
            batch.edits.len(),
            path.display(),
            replacements
        );

        Ok(EditReport {
            file_path: batch.file_path.clone(),
            replacements,
            diff: DiffSummary::compute(&original, &content, &batch.file_path),
        })
    }

    /// Attempt each operation independently, in order.
    pub fn apply_batch(&self, operations: &[EditOperation]) -> BatchEditReport {
        let mut edit_results = Vec::with_capacity(operations.len());

        for (index, operation) in operations.iter().enumerate() {
            match self.apply_atomic(&operation.as_batch()) {
                Ok(report) => edit_results.push(EditResult {
                    file_path: report.file_path,
                    success: true,
                    replacements: report.replacements,
                    diff: Some(report.diff),
                    error: None,
                }),
                Err(e) => {
                    tracing::warn!(
                        "Edit operation {} on {} failed: {}",
                        index,
                        operation.file_path,
                        e
                    );
                    edit_results.push(EditResult {
                        file_path: operation.file_path.clone(),
                        success: false,
                        replacements: 0,
                        diff: None,
                        error: Some(e.with_detail("operation_index", index).to_serialized(false)),
                    });
                }
            }
        }

        let succeeded = edit_results.iter().filter(|r| r.success);
        BatchEditReport {
            files_modified: succeeded.clone().count(),
            total_edits: succeeded.map(|r| r.replacements).sum(),
            edit_results,
        }
    }
}

/// Apply one pair to in-memory content, returning the new content and the
/// number of replacements.
fn apply_pair(content: &str, pair: &EditPair, file_path: &str) -> Result<(String, usize)> {
    if pair.old_string.is_empty() {
        return Err(OrchestratorError::new(
            ErrorCode::VALIDATION_FAILED,
            "old_string must not be empty",
        ));
    }
    if pair.old_string == pair.new_string {
        return Err(OrchestratorError::new(
            ErrorCode::VALIDATION_FAILED,
            "old_string and new_string are identical",
        ));
    }

    let count = content.matches(pair.old_string.as_str()).count();
    if count == 0 {
        return Err(OrchestratorError::new(
            ErrorCode::STRING_NOT_FOUND,
            format!("String not found in {}: {:?}", file_path, pair.old_string),
        ));
    }

    if count > 1 && !pair.replace_all {
        return Err(OrchestratorError::new(
            ErrorCode::NON_UNIQUE_MATCH,
            format!(
                "Found {} occurrences of the string in {}. Use replace_all=true to replace all, or provide more context to make it unique.",
                count, file_path
            ),
        )
        .with_detail("occurrences", count));
    }

    let next = if pair.replace_all {
        content.replace(pair.old_string.as_str(), &pair.new_string)
    } else {
        content.replacen(pair.old_string.as_str(), &pair.new_string, 1)
    };
    Ok((next, count))
}

/// Replace `path` with `content` via a temp file in the same directory.
///
/// The rename is atomic, so readers see either the old or the new content.
fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let permissions = std::fs::metadata(path)?.permissions();

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.as_file().set_permissions(permissions)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, EditEngine) {
        let dir = tempfile::tempdir().unwrap();
        let engine = EditEngine::new(dir.path().canonicalize().unwrap());
        (dir, engine)
    }

    fn pair(old: &str, new: &str, replace_all: bool) -> EditPair {
        EditPair {
            old_string: old.to_string(),
            new_string: new.to_string(),
            replace_all,
        }
    }

    #[test]
    fn test_single_replacement() {
        let (dir, engine) = setup();
        std::fs::write(dir.path().join("a.txt"), "Hello, World!").unwrap();

        let report = engine
            .apply_atomic(&EditBatch {
                file_path: "a.txt".to_string(),
                edits: vec![pair("World", "Rust", false)],
            })
            .unwrap();

        assert_eq!(report.replacements, 1);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "Hello, Rust!"
        );
    }

    #[test]
    fn test_non_unique_then_replace_all() {
        let (dir, engine) = setup();
        let file = dir.path().join("foo.txt");
        std::fs::write(&file, "foo bar foo").unwrap();

        let err = engine
            .apply_atomic(&EditBatch {
                file_path: "foo.txt".to_string(),
                edits: vec![pair("foo", "baz", false)],
            })
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NON_UNIQUE_MATCH);
        assert_eq!(err.details()["occurrences"], 2);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "foo bar foo");

        let report = engine
            .apply_atomic(&EditBatch {
                file_path: "foo.txt".to_string(),
                edits: vec![pair("foo", "baz", true)],
            })
            .unwrap();
        assert_eq!(report.replacements, 2);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "baz bar baz");
    }

    #[test]
    fn test_atomic_batch_leaves_file_untouched_on_failure() {
        let (dir, engine) = setup();
        let file = dir.path().join("code.rs");
        let original = "fn main() {\n    println!(\"hi\");\n}\n";
        std::fs::write(&file, original).unwrap();

        let err = engine
            .apply_atomic(&EditBatch {
                file_path: "code.rs".to_string(),
                edits: vec![pair("main", "start", false), pair("missing", "x", false)],
            })
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::STRING_NOT_FOUND);
        assert_eq!(err.details()["edit_index"], 1);
        assert_eq!(err.context()["path"], "code.rs");
        assert_eq!(std::fs::read(&file).unwrap(), original.as_bytes());
    }

    #[test]
    fn test_pairs_apply_to_simulated_content() {
        let (dir, engine) = setup();
        std::fs::write(dir.path().join("s.txt"), "alpha").unwrap();

        // The second pair only matches after the first has been applied
        let report = engine
            .apply_atomic(&EditBatch {
                file_path: "s.txt".to_string(),
                edits: vec![pair("alpha", "beta", false), pair("beta", "gamma", false)],
            })
            .unwrap();
        assert_eq!(report.replacements, 2);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("s.txt")).unwrap(),
            "gamma"
        );
    }

    #[test]
    fn test_invalid_pairs() {
        let (dir, engine) = setup();
        std::fs::write(dir.path().join("v.txt"), "text").unwrap();

        for bad in [pair("", "x", false), pair("text", "text", false)] {
            let err = engine
                .apply_atomic(&EditBatch {
                    file_path: "v.txt".to_string(),
                    edits: vec![bad],
                })
                .unwrap_err();
            assert_eq!(err.code(), ErrorCode::VALIDATION_FAILED);
        }
    }

    #[test]
    fn test_missing_file() {
        let (_dir, engine) = setup();
        let err = engine
            .apply_atomic(&EditBatch {
                file_path: "nope.txt".to_string(),
                edits: vec![pair("a", "b", false)],
            })
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::SYSTEM_FILE_NOT_FOUND);
    }

    #[test]
    fn test_outside_workspace() {
        let (_dir, engine) = setup();
        let err = engine
            .apply_atomic(&EditBatch {
                file_path: "../escape.txt".to_string(),
                edits: vec![pair("a", "b", false)],
            })
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::PATH_OUTSIDE_WORKSPACE);
    }

    #[cfg(unix)]
    #[test]
    fn test_permissions_preserved() {
        use std::os::unix::fs::PermissionsExt;

        let (dir, engine) = setup();
        let file = dir.path().join("run.sh");
        std::fs::write(&file, "echo one\n").unwrap();
        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o755)).unwrap();

        engine
            .apply_atomic(&EditBatch {
                file_path: "run.sh".to_string(),
                edits: vec![pair("one", "two", false)],
            })
            .unwrap();

        let mode = std::fs::metadata(&file).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_batch_continues_past_failure() {
        let (dir, engine) = setup();
        std::fs::write(dir.path().join("one.txt"), "first").unwrap();
        std::fs::write(dir.path().join("three.txt"), "third").unwrap();

        let ops = vec![
            EditOperation {
                file_path: "one.txt".to_string(),
                old_string: "first".to_string(),
                new_string: "1st".to_string(),
                replace_all: false,
            },
            EditOperation {
                file_path: "two.txt".to_string(),
                old_string: "second".to_string(),
                new_string: "2nd".to_string(),
                replace_all: false,
            },
            EditOperation {
                file_path: "three.txt".to_string(),
                old_string: "third".to_string(),
                new_string: "3rd".to_string(),
                replace_all: false,
            },
        ];

        let report = engine.apply_batch(&ops);
        assert_eq!(report.files_modified, 2);
        assert_eq!(report.total_edits, 2);
        assert_eq!(report.failures(), 1);
        assert!(report.edit_results[0].success);
        assert!(!report.edit_results[1].success);
        assert_eq!(
            report.edit_results[1].error.as_ref().map(|e| e.error_code()),
            Some(ErrorCode::SYSTEM_FILE_NOT_FOUND)
        );
        assert!(report.edit_results[2].success);

        assert_eq!(std::fs::read_to_string(dir.path().join("one.txt")).unwrap(), "1st");
        assert_eq!(std::fs::read_to_string(dir.path().join("three.txt")).unwrap(), "3rd");
    }
}
