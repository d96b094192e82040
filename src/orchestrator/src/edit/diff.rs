//! Diff summaries for successful edits

use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};

/// Line-level summary of an edit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub added: usize,
    pub removed: usize,
    /// Unified diff text
    pub unified: String,
}

impl DiffSummary {
    pub fn compute(old: &str, new: &str, file_path: &str) -> Self {
        let diff = TextDiff::from_lines(old, new);

        let (mut added, mut removed) = (0, 0);
        for change in diff.iter_all_changes() {
            match change.tag() {
                ChangeTag::Insert => added += 1,
                ChangeTag::Delete => removed += 1,
                ChangeTag::Equal => {}
            }
        }

        let unified = diff
            .unified_diff()
            .context_radius(3)
            .header(&format!("a/{}", file_path), &format!("b/{}", file_path))
            .to_string();

        Self {
            added,
            removed,
            unified,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_header() {
        let old = "line1\nline2\nline3\n";
        let new = "line1\nmodified\nline3\nline4\n";
        let summary = DiffSummary::compute(old, new, "test.txt");

        assert_eq!(summary.added, 2);
        assert_eq!(summary.removed, 1);
        assert!(summary.unified.contains("--- a/test.txt"));
        assert!(summary.unified.contains("+++ b/test.txt"));
        assert!(summary.unified.contains("-line2"));
        assert!(summary.unified.contains("+modified"));
    }

    #[test]
    fn test_identical_content() {
        let summary = DiffSummary::compute("same\n", "same\n", "x");
        assert_eq!(summary.added, 0);
        assert_eq!(summary.removed, 0);
    }
}
