//! Branch merging.
//!
//! ```text
//! target head (ours) ──┐
//!                      ├── diff_lines(ours, theirs) ── Replace entries = conflicts
//! source head (theirs) ┘
//!
//!   no conflicts / policy Auto ──► resolve by strategy ──► merge version on target
//!   conflicts + policy Ask     ──► MergeOutcome::Conflicts (nothing written)
//! ```
//!
//! When one head already contains the other there is nothing to reconcile:
//! an ancestor source keeps the target content, an ancestor target takes the
//! source content.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use folio_core::{diff_lines, now_millis, Version};

use super::{NewVersion, Pending, VersionStore, TAG_MERGE};
use crate::error::{CollabError, Result};

/// Which side wins a conflicting line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeStrategy {
    /// Keep the target branch
    Ours,
    /// Take the source branch
    Theirs,
    /// Source lines replace conflicting spans; lines unique to either side survive
    #[default]
    Auto,
}

/// What to do when the merge finds conflicts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictPolicy {
    /// Report conflicts and write nothing
    #[default]
    Ask,
    /// Resolve with the configured strategy
    Auto,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOptions {
    pub strategy: MergeStrategy,
    pub conflict_resolution: ConflictPolicy,
    /// Keep the source branch active after merging
    pub preserve_both_branches: bool,
    pub author_id: Uuid,
    pub title: Option<String>,
}

impl MergeOptions {
    pub fn new(author_id: Uuid) -> Self {
        Self {
            strategy: MergeStrategy::Auto,
            conflict_resolution: ConflictPolicy::Ask,
            preserve_both_branches: false,
            author_id,
            title: None,
        }
    }

    pub fn with_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Resolve conflicts instead of reporting them.
    pub fn resolve_automatically(mut self) -> Self {
        self.conflict_resolution = ConflictPolicy::Auto;
        self
    }

    pub fn preserving_source(mut self) -> Self {
        self.preserve_both_branches = true;
        self
    }
}

/// A line both branches changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConflict {
    /// 1-based line number in the target content
    pub line: usize,
    pub ours: String,
    pub theirs: String,
    /// Preceding target lines
    pub context: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// A merge version was written on the target branch
    Merged {
        version: Version,
        /// Conflicts settled by the strategy
        resolved: Vec<MergeConflict>,
    },
    /// Conflicts need a decision; history is unchanged
    Conflicts(Vec<MergeConflict>),
}

impl MergeOutcome {
    pub fn version(&self) -> Option<&Version> {
        match self {
            MergeOutcome::Merged { version, .. } => Some(version),
            MergeOutcome::Conflicts(_) => None,
        }
    }

    pub fn conflicts(&self) -> &[MergeConflict] {
        match self {
            MergeOutcome::Merged { resolved, .. } => resolved,
            MergeOutcome::Conflicts(conflicts) => conflicts,
        }
    }
}

/// Conflicting lines between `ours` (old) and `theirs` (new).
pub fn find_conflicts(ours: &str, theirs: &str) -> Vec<MergeConflict> {
    diff_lines(ours, theirs)
        .conflicts()
        .map(|change| MergeConflict {
            line: change.old_line.unwrap_or_default(),
            ours: change.old_text.clone().unwrap_or_default(),
            theirs: change.new_text.clone().unwrap_or_default(),
            context: change.context.clone(),
        })
        .collect()
}

/// Combine two contents under `strategy`.
pub fn merge_contents(ours: &str, theirs: &str, strategy: MergeStrategy) -> String {
    match strategy {
        MergeStrategy::Ours => ours.to_string(),
        MergeStrategy::Theirs => theirs.to_string(),
        MergeStrategy::Auto => {
            let our_lines: Vec<&str> = ours.lines().collect();
            let their_lines: Vec<&str> = theirs.lines().collect();
            let longest = our_lines.len().max(their_lines.len());

            let merged: Vec<&str> = (0..longest)
                .filter_map(|i| their_lines.get(i).or_else(|| our_lines.get(i)).copied())
                .collect();
            let mut out = merged.join("\n");

            let tail_source = if their_lines.len() >= our_lines.len() { theirs } else { ours };
            if tail_source.ends_with('\n') {
                out.push('\n');
            }
            out
        }
    }
}

impl VersionStore {
    /// Merge the head of `source` into `target`.
    pub async fn merge_branches(
        &self,
        report_id: Uuid,
        source: &str,
        target: &str,
        options: MergeOptions,
    ) -> Result<MergeOutcome> {
        if source == target {
            return Err(CollabError::InvalidOperation("cannot merge a branch into itself".into()));
        }

        let history = self.report(report_id).await?;
        let mut history = history.lock().await;

        let source_branch = history.require_branch(source)?.clone();
        let target_branch = history.require_branch(target)?.clone();
        for branch in [&source_branch, &target_branch] {
            if !branch.is_active {
                return Err(CollabError::InvalidOperation(format!(
                    "branch '{}' is inactive",
                    branch.name
                )));
            }
        }
        let (Some(source_head), Some(target_head)) = (source_branch.head(), target_branch.head()) else {
            return Err(CollabError::InvalidOperation("cannot merge an empty branch".into()));
        };

        let theirs = history.require_version(source_head)?.content.clone();
        let ours = history.require_version(target_head)?.content.clone();

        let (content, resolved) = if history.is_ancestor(source_head, target_head) {
            (ours, Vec::new())
        } else if history.is_ancestor(target_head, source_head) {
            (theirs, Vec::new())
        } else {
            let conflicts = find_conflicts(&ours, &theirs);
            if !conflicts.is_empty() && options.conflict_resolution == ConflictPolicy::Ask {
                log::info!(
                    "report {report_id}: merge '{source}' into '{target}' stopped on {} conflicts",
                    conflicts.len()
                );
                return Ok(MergeOutcome::Conflicts(conflicts));
            }
            (merge_contents(&ours, &theirs, options.strategy), conflicts)
        };

        let target_template = history.require_version(target_head)?.template_id;
        let title = options
            .title
            .clone()
            .unwrap_or_else(|| format!("Merge '{source}' into '{target}'"));
        let new = NewVersion::new(options.author_id, content)
            .with_title(title)
            .with_template(target_template)
            .on_branch(target)
            .with_tag(TAG_MERGE);

        let mut pending = Pending::new(&history);
        let version = pending.push_version(new, Some(source_head))?;
        if !options.preserve_both_branches {
            let mut merged = source_branch;
            merged.is_active = false;
            merged.merged_into_branch_id = Some(target_branch.id);
            merged.merged_at = Some(now_millis());
            pending.stage_branch(merged);
        }
        let batch = pending.batch;
        self.commit(&mut history, batch).await?;

        log::info!(
            "report {report_id}: merged '{source}' into '{target}' as version {} ({} conflicts resolved)",
            version.version_number,
            resolved.len()
        );
        Ok(MergeOutcome::Merged { version, resolved })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::VersionFilter;

    async fn forked_store() -> (VersionStore, Uuid, Uuid) {
        let store = VersionStore::in_memory();
        let report = Uuid::new_v4();
        let author = Uuid::new_v4();
        store
            .create_version(report, NewVersion::new(author, "title\nintro\nbody"))
            .await
            .unwrap();
        store.create_branch(report, "draft", None).await.unwrap();
        (store, report, author)
    }

    #[test]
    fn test_merge_contents_auto() {
        assert_eq!(merge_contents("a\nb", "a\nB\nc", MergeStrategy::Auto), "a\nB\nc");
        assert_eq!(merge_contents("a\nb\nc\nd", "a\nB", MergeStrategy::Auto), "a\nB\nc\nd");
        assert_eq!(merge_contents("a\n", "b\n", MergeStrategy::Auto), "b\n");
        assert_eq!(merge_contents("x", "y", MergeStrategy::Ours), "x");
        assert_eq!(merge_contents("x", "y", MergeStrategy::Theirs), "y");
    }

    #[test]
    fn test_find_conflicts() {
        let conflicts = find_conflicts("a\nb\nc", "a\nB\nc\nd");
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].line, 2);
        assert_eq!(conflicts[0].ours, "b");
        assert_eq!(conflicts[0].theirs, "B");
        assert_eq!(conflicts[0].context, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_merge_without_divergence_keeps_target() {
        let (store, report, author) = forked_store().await;
        let main_v2 = store
            .create_version(report, NewVersion::new(author, "title\nintro\nbody v2"))
            .await
            .unwrap();

        let outcome = store
            .merge_branches(report, "draft", "main", MergeOptions::new(author))
            .await
            .unwrap();

        let version = outcome.version().unwrap();
        assert_eq!(version.content, main_v2.content);
        assert!(version.has_tag(TAG_MERGE));
        assert!(outcome.conflicts().is_empty());
    }

    #[tokio::test]
    async fn test_fast_forward_takes_source() {
        let (store, report, author) = forked_store().await;
        let draft_v2 = store
            .create_version(report, NewVersion::new(author, "title\nintro\nbody edited").on_branch("draft"))
            .await
            .unwrap();

        let outcome = store
            .merge_branches(report, "draft", "main", MergeOptions::new(author))
            .await
            .unwrap();

        let version = outcome.version().unwrap();
        assert_eq!(version.content, draft_v2.content);
        assert_eq!(version.metadata.merge_source_version_id, Some(draft_v2.id));
        assert_eq!(version.metadata.branch_name, "main");
    }

    #[tokio::test]
    async fn test_conflicts_reported_when_asking() {
        let (store, report, author) = forked_store().await;
        store
            .create_version(report, NewVersion::new(author, "title\nintro MAIN\nbody"))
            .await
            .unwrap();
        store
            .create_version(report, NewVersion::new(author, "title\nintro DRAFT\nbody").on_branch("draft"))
            .await
            .unwrap();
        let before = store.get_versions(report, &VersionFilter::default()).await.unwrap().len();

        let outcome = store
            .merge_branches(report, "draft", "main", MergeOptions::new(author))
            .await
            .unwrap();

        match outcome {
            MergeOutcome::Conflicts(conflicts) => {
                assert_eq!(conflicts.len(), 1);
                assert_eq!(conflicts[0].ours, "intro MAIN");
                assert_eq!(conflicts[0].theirs, "intro DRAFT");
            }
            other => panic!("expected conflicts, got {other:?}"),
        }
        let after = store.get_versions(report, &VersionFilter::default()).await.unwrap().len();
        assert_eq!(before, after);
        assert!(store.branch(report, "draft").await.unwrap().is_active);
    }

    #[tokio::test]
    async fn test_auto_resolution_deactivates_source() {
        let (store, report, author) = forked_store().await;
        store
            .create_version(report, NewVersion::new(author, "title\nintro MAIN\nbody"))
            .await
            .unwrap();
        store
            .create_version(report, NewVersion::new(author, "title\nintro DRAFT\nbody").on_branch("draft"))
            .await
            .unwrap();

        let options = MergeOptions::new(author)
            .with_strategy(MergeStrategy::Ours)
            .resolve_automatically();
        let outcome = store.merge_branches(report, "draft", "main", options).await.unwrap();

        assert_eq!(outcome.conflicts().len(), 1);
        let version = outcome.version().unwrap();
        assert_eq!(version.content, "title\nintro MAIN\nbody");

        let draft = store.branch(report, "draft").await.unwrap();
        let main = store.branch(report, "main").await.unwrap();
        assert!(!draft.is_active);
        assert_eq!(draft.merged_into_branch_id, Some(main.id));
        assert!(draft.merged_at.is_some());
        assert_eq!(main.head(), Some(version.id));
    }

    #[tokio::test]
    async fn test_preserve_both_branches() {
        let (store, report, author) = forked_store().await;
        store
            .create_version(report, NewVersion::new(author, "title\nintro\nbody\nmore").on_branch("draft"))
            .await
            .unwrap();

        let options = MergeOptions::new(author).preserving_source();
        store.merge_branches(report, "draft", "main", options).await.unwrap();
        assert!(store.branch(report, "draft").await.unwrap().is_active);
    }

    #[tokio::test]
    async fn test_merge_rejects_bad_branches() {
        let (store, report, author) = forked_store().await;
        let same = store
            .merge_branches(report, "main", "main", MergeOptions::new(author))
            .await
            .unwrap_err();
        assert!(matches!(same, CollabError::InvalidOperation(_)));

        let missing = store
            .merge_branches(report, "nope", "main", MergeOptions::new(author))
            .await
            .unwrap_err();
        assert!(matches!(missing, CollabError::NotFound(_)));

        store.delete_branch(report, "draft").await.unwrap();
        let inactive = store
            .merge_branches(report, "draft", "main", MergeOptions::new(author))
            .await
            .unwrap_err();
        assert!(matches!(inactive, CollabError::InvalidOperation(_)));
    }
}
