//! Version and branch records, plus content statistics.
//!
//! ```text
//! main:     v1 ── v2 ── v3 ─────────── v6 (merge)
//!                  │                  ╱
//! draft:           └── v4 ── v5 ─────┘
//! ```
//!
//! Versions are immutable. Only `tags` may grow after creation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::now_millis;

/// Name of the implicit default branch.
pub const MAIN_BRANCH: &str = "main";

/// Page break marker inside content.
pub const PAGE_BREAK: char = '\u{c}';

/// Classification of a change between a version and its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Added,
    Deleted,
    Modified,
}

/// Summary entry describing how a version differs from its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionChange {
    pub kind: ChangeKind,
    pub description: String,
    /// Word-count delta against the parent
    pub word_delta: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMetadata {
    pub page_count: usize,
    pub word_count: usize,
    pub changes: Vec<VersionChange>,
    pub parent_version_id: Option<Uuid>,
    /// Second parent for merge versions
    pub merge_source_version_id: Option<Uuid>,
    pub branch_name: String,
    pub is_major: bool,
    pub is_auto_save: bool,
}

/// An immutable, numbered content snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub id: Uuid,
    pub report_id: Uuid,
    pub template_id: Uuid,
    pub version_number: u64,
    pub content: String,
    pub title: String,
    pub author_id: Uuid,
    pub created_at: u64,
    /// UTF-8 byte length of `content`
    pub size: usize,
    /// Lowercase hex SHA-256 of `content`
    pub checksum: String,
    pub tags: Vec<String>,
    pub metadata: VersionMetadata,
}

impl Version {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Recompute the checksum and compare.
    pub fn verify(&self) -> bool {
        checksum(&self.content) == self.checksum
    }
}

/// A named, independently progressing sequence of versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub id: Uuid,
    pub name: String,
    pub report_id: Uuid,
    /// Version ids in creation order; a forked branch starts with its fork point
    pub versions: Vec<Uuid>,
    pub is_active: bool,
    pub created_at: u64,
    pub parent_branch_id: Option<Uuid>,
    pub fork_version_id: Option<Uuid>,
    pub merged_into_branch_id: Option<Uuid>,
    pub merged_at: Option<u64>,
}

impl Branch {
    pub fn new(report_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            report_id,
            versions: Vec::new(),
            is_active: true,
            created_at: now_millis(),
            parent_branch_id: None,
            fork_version_id: None,
            merged_into_branch_id: None,
            merged_at: None,
        }
    }

    /// Branch off `parent` at `fork_version`.
    pub fn forked(report_id: Uuid, name: impl Into<String>, parent: &Branch, fork_version: Uuid) -> Self {
        let mut branch = Self::new(report_id, name);
        branch.parent_branch_id = Some(parent.id);
        branch.fork_version_id = Some(fork_version);
        branch.versions.push(fork_version);
        branch
    }

    pub fn head(&self) -> Option<Uuid> {
        self.versions.last().copied()
    }
}

/// Lowercase hex SHA-256 of `content`.
pub fn checksum(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn word_count(content: &str) -> usize {
    content.split_whitespace().count()
}

/// Pages separated by form feeds; empty content has no pages.
pub fn page_count(content: &str) -> usize {
    if content.is_empty() {
        0
    } else {
        1 + content.chars().filter(|c| *c == PAGE_BREAK).count()
    }
}

/// Summarize how `new` differs from `old` by word-count delta.
///
/// Returns an empty list for the first version or identical content.
pub fn summarize_changes(old: Option<&str>, new: &str) -> Vec<VersionChange> {
    let Some(old) = old else {
        return Vec::new();
    };
    if old == new {
        return Vec::new();
    }

    let before = word_count(old) as i64;
    let after = word_count(new) as i64;
    let delta = after - before;

    let (kind, description) = if delta > 0 {
        (ChangeKind::Added, format!("Added {delta} words"))
    } else if delta < 0 {
        (ChangeKind::Deleted, format!("Deleted {} words", -delta))
    } else {
        (ChangeKind::Modified, "Modified content".to_string())
    };

    vec![VersionChange {
        kind,
        description,
        word_delta: delta,
    }]
}
