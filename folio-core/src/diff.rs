//! Line-oriented diff between two contents.
//!
//! Both cursors advance together while lines match. On a mismatch the pair is
//! recorded as a `Replace`; once one side is exhausted the remaining lines of
//! the other side become pure `Insert`/`Delete` entries.
//!
//! ```text
//! old: a  b  c  d        new: a  B  c
//!      =  ~  =  -
//!         │     └── Delete (old line 4)
//!         └──────── Replace (old 2 → new 2)
//! ```
//!
//! A `Replace` marks a line both sides changed; the merge engine treats every
//! `Replace` as a conflict candidate.

use serde::{Deserialize, Serialize};

/// Lines of preceding context attached to each change.
pub const CONTEXT_LINES: usize = 2;

/// Kind of line-level change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiffKind {
    Insert,
    Delete,
    Replace,
}

/// A single line-level change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffChange {
    pub kind: DiffKind,
    /// 1-based line in the old content (`None` for inserts)
    pub old_line: Option<usize>,
    /// 1-based line in the new content (`None` for deletes)
    pub new_line: Option<usize>,
    pub old_text: Option<String>,
    pub new_text: Option<String>,
    /// Up to [`CONTEXT_LINES`] lines preceding the change in the old content
    pub context: Vec<String>,
}

/// Result of diffing two contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffReport {
    pub additions: usize,
    pub deletions: usize,
    pub modifications: usize,
    pub changes: Vec<DiffChange>,
}

impl DiffReport {
    /// True when both contents have identical lines.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Changes both sides made to the same line.
    pub fn conflicts(&self) -> impl Iterator<Item = &DiffChange> {
        self.changes.iter().filter(|c| c.kind == DiffKind::Replace)
    }

    pub fn total(&self) -> usize {
        self.additions + self.deletions + self.modifications
    }
}

/// Diff `old` against `new`, line by line.
pub fn diff_lines(old: &str, new: &str) -> DiffReport {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();

    let mut report = DiffReport::default();
    let (mut i, mut j) = (0usize, 0usize);

    while i < old_lines.len() || j < new_lines.len() {
        let old_line = old_lines.get(i).copied();
        let new_line = new_lines.get(j).copied();

        match (old_line, new_line) {
            (Some(o), Some(n)) if o == n => {}
            (Some(o), Some(n)) => {
                report.modifications += 1;
                report.changes.push(DiffChange {
                    kind: DiffKind::Replace,
                    old_line: Some(i + 1),
                    new_line: Some(j + 1),
                    old_text: Some(o.to_string()),
                    new_text: Some(n.to_string()),
                    context: context_before(&old_lines, i),
                });
            }
            (None, Some(n)) => {
                report.additions += 1;
                report.changes.push(DiffChange {
                    kind: DiffKind::Insert,
                    old_line: None,
                    new_line: Some(j + 1),
                    old_text: None,
                    new_text: Some(n.to_string()),
                    context: context_before(&old_lines, i),
                });
            }
            (Some(o), None) => {
                report.deletions += 1;
                report.changes.push(DiffChange {
                    kind: DiffKind::Delete,
                    old_line: Some(i + 1),
                    new_line: None,
                    old_text: Some(o.to_string()),
                    new_text: None,
                    context: context_before(&old_lines, i),
                });
            }
            (None, None) => break,
        }

        if old_line.is_some() {
            i += 1;
        }
        if new_line.is_some() {
            j += 1;
        }
    }

    log::trace!(
        "diff: +{} -{} ~{} over {}/{} lines",
        report.additions,
        report.deletions,
        report.modifications,
        old_lines.len(),
        new_lines.len()
    );
    report
}

fn context_before(lines: &[&str], index: usize) -> Vec<String> {
    let end = index.min(lines.len());
    let start = end.saturating_sub(CONTEXT_LINES);
    lines[start..end].iter().map(|l| l.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_contents() {
        let report = diff_lines("a\nb\nc", "a\nb\nc");
        assert!(report.is_empty());
        assert_eq!(report.total(), 0);
    }

    #[test]
    fn test_replace_in_middle() {
        let report = diff_lines("a\nb\nc", "a\nB\nc");
        assert_eq!(report.modifications, 1);
        assert_eq!(report.changes.len(), 1);

        let change = &report.changes[0];
        assert_eq!(change.kind, DiffKind::Replace);
        assert_eq!(change.old_line, Some(2));
        assert_eq!(change.new_line, Some(2));
        assert_eq!(change.old_text.as_deref(), Some("b"));
        assert_eq!(change.new_text.as_deref(), Some("B"));
        assert_eq!(change.context, vec!["a".to_string()]);
    }

    #[test]
    fn test_trailing_insert() {
        let report = diff_lines("a\nb", "a\nb\nc\nd");
        assert_eq!(report.additions, 2);
        assert_eq!(report.deletions, 0);
        assert!(report.changes.iter().all(|c| c.kind == DiffKind::Insert));
        assert_eq!(report.changes[1].new_line, Some(4));
        assert_eq!(report.changes[0].context, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_trailing_delete() {
        let report = diff_lines("a\nb\nc", "a");
        assert_eq!(report.deletions, 2);
        assert_eq!(report.changes[0].old_line, Some(2));
        assert_eq!(report.changes[1].old_text.as_deref(), Some("c"));
    }

    #[test]
    fn test_mixed_replace_then_insert() {
        let report = diff_lines("x\ny", "x\nY\nz");
        assert_eq!(report.modifications, 1);
        assert_eq!(report.additions, 1);
        assert_eq!(report.conflicts().count(), 1);
    }

    #[test]
    fn test_empty_sides() {
        assert_eq!(diff_lines("", "a\nb").additions, 2);
        assert_eq!(diff_lines("a\nb", "").deletions, 2);
        assert!(diff_lines("", "").is_empty());
    }

    #[test]
    fn test_context_is_capped() {
        let report = diff_lines("1\n2\n3\n4\n5", "1\n2\n3\n4\nX");
        assert_eq!(report.changes[0].context, vec!["3".to_string(), "4".to_string()]);
    }
}
