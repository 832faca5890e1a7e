//! Durable, branchable history of report contents.
//!
//! ```text
//!                ┌──────────────────────────────────────────────┐
//!  create ──────►│ VersionStore                                 │
//!  restore ─────►│   reports: RwLock<HashMap<report, Arc<Mutex>>│
//!  merge ───────►│        │                                     │
//!  tag ─────────►│        ▼  per-report async mutex             │
//!                │   ReportHistory { versions, branches, head } │
//!                └────────┬─────────────────────────────────────┘
//!                         │ HistoryBatch (one atomic commit per call)
//!                         ▼
//!                  dyn VersionRepository
//! ```
//!
//! Version numbers are per report, start at 1 and never skip. A mutation is
//! staged into a [`HistoryBatch`], committed, and only then folded into the
//! cached history, so a repository failure leaves no trace. Calls for one
//! report are serialised by its mutex; different reports run in parallel.

pub mod merge;

pub use merge::{merge_contents, ConflictPolicy, MergeConflict, MergeOptions, MergeOutcome, MergeStrategy};

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use folio_core::version::{checksum, page_count, summarize_changes, word_count};
use folio_core::{diff_lines, now_millis, Branch, DiffReport, Version, VersionMetadata, MAIN_BRANCH};

use crate::error::{CollabError, Missing, Result};
use crate::storage::{HistoryBatch, StoredHistory, VersionRepository};

/// Tag stamped on versions produced by the session autosave.
pub const TAG_AUTO_SAVE: &str = "auto-save";
/// Tag stamped on versions produced by a restore.
pub const TAG_RESTORE: &str = "restore";
/// Tag stamped on the safety snapshot taken before a restore.
pub const TAG_BACKUP: &str = "backup";
/// Tag stamped on merge results.
pub const TAG_MERGE: &str = "merge";

// ─── Requests ─────────────────────────────────────────────────────────

/// Content and metadata for a new version.
#[derive(Debug, Clone, PartialEq)]
pub struct NewVersion {
    pub content: String,
    pub title: String,
    pub author_id: Uuid,
    pub template_id: Uuid,
    /// Target branch; `main` when absent
    pub branch: Option<String>,
    pub tags: Vec<String>,
    pub is_major: bool,
    pub is_auto_save: bool,
}

impl NewVersion {
    pub fn new(author_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            title: String::new(),
            author_id,
            template_id: Uuid::nil(),
            branch: None,
            tags: Vec::new(),
            is_major: false,
            is_auto_save: false,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_template(mut self, template_id: Uuid) -> Self {
        self.template_id = template_id;
        self
    }

    pub fn on_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self
    }

    pub fn major(mut self) -> Self {
        self.is_major = true;
        self
    }

    /// Mark as an autosave snapshot (adds the `auto-save` tag).
    pub fn auto_save(mut self) -> Self {
        self.is_auto_save = true;
        self.with_tag(TAG_AUTO_SAVE)
    }

    fn branch_name(&self) -> &str {
        self.branch.as_deref().unwrap_or(MAIN_BRANCH)
    }
}

/// Query over a report's versions. Results are ordered by version number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionFilter {
    pub branch: Option<String>,
    pub author_id: Option<Uuid>,
    pub tag: Option<String>,
    pub major_only: bool,
    pub include_auto_saves: bool,
    /// Inclusive lower bound on `created_at` (epoch millis)
    pub created_after: Option<u64>,
    /// Inclusive upper bound on `created_at` (epoch millis)
    pub created_before: Option<u64>,
    /// Keep only the newest `limit` matches
    pub limit: Option<usize>,
}

impl Default for VersionFilter {
    fn default() -> Self {
        Self {
            branch: None,
            author_id: None,
            tag: None,
            major_only: false,
            include_auto_saves: true,
            created_after: None,
            created_before: None,
            limit: None,
        }
    }
}

impl VersionFilter {
    fn matches(&self, version: &Version) -> bool {
        if self.author_id.is_some_and(|a| a != version.author_id) {
            return false;
        }
        if let Some(tag) = &self.tag {
            if !version.has_tag(tag) {
                return false;
            }
        }
        if self.major_only && !version.metadata.is_major {
            return false;
        }
        if !self.include_auto_saves && version.metadata.is_auto_save {
            return false;
        }
        if self.created_after.is_some_and(|t| version.created_at < t) {
            return false;
        }
        if self.created_before.is_some_and(|t| version.created_at > t) {
            return false;
        }
        true
    }
}

/// How a restore lands in history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestoreMode {
    /// Append a new version carrying the restored content
    #[default]
    CreateNew,
    /// Only move the current pointer
    RepointCurrent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOptions {
    pub mode: RestoreMode,
    /// Snapshot the current content first, as a `backup` autosave
    pub preserve_current_as_backup: bool,
    pub author_id: Uuid,
}

impl RestoreOptions {
    pub fn new(author_id: Uuid) -> Self {
        Self {
            mode: RestoreMode::CreateNew,
            preserve_current_as_backup: false,
            author_id,
        }
    }

    pub fn with_backup(mut self) -> Self {
        self.preserve_current_as_backup = true;
        self
    }

    pub fn repoint(mut self) -> Self {
        self.mode = RestoreMode::RepointCurrent;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestoreOutcome {
    /// The new restore version, or the target itself when repointing
    pub restored: Version,
    pub backup: Option<Version>,
}

/// Diff between two versions of the same report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionComparison {
    pub from_id: Uuid,
    pub from_number: u64,
    pub to_id: Uuid,
    pub to_number: u64,
    pub diff: DiffReport,
}

// ─── Cached history ───────────────────────────────────────────────────

/// In-memory mirror of one report's stored history.
#[derive(Debug, Default)]
pub(crate) struct ReportHistory {
    report_id: Uuid,
    /// Ordered by version number
    versions: Vec<Version>,
    index: HashMap<Uuid, usize>,
    /// Creation order
    branches: Vec<Branch>,
    current: Option<Uuid>,
}

impl ReportHistory {
    fn from_stored(report_id: Uuid, stored: StoredHistory) -> Self {
        let mut history = Self {
            report_id,
            ..Self::default()
        };
        let mut branches = stored.branches;
        branches.sort_by_key(|b| b.created_at);
        history.absorb(HistoryBatch {
            versions: stored.versions,
            branches,
            current: stored.current,
        });
        history
    }

    /// Fold a committed batch into the cache.
    fn absorb(&mut self, batch: HistoryBatch) {
        for version in batch.versions {
            match self.index.get(&version.id) {
                Some(&slot) => self.versions[slot] = version,
                None => {
                    self.index.insert(version.id, self.versions.len());
                    self.versions.push(version);
                }
            }
        }
        for branch in batch.branches {
            match self.branches.iter_mut().find(|b| b.name == branch.name) {
                Some(existing) => *existing = branch,
                None => self.branches.push(branch),
            }
        }
        if batch.current.is_some() {
            self.current = batch.current;
        }
    }

    fn version(&self, id: Uuid) -> Option<&Version> {
        self.index.get(&id).map(|&slot| &self.versions[slot])
    }

    fn require_version(&self, id: Uuid) -> Result<&Version> {
        self.version(id)
            .ok_or(CollabError::NotFound(Missing::Version(id)))
    }

    fn branch(&self, name: &str) -> Option<&Branch> {
        self.branches.iter().find(|b| b.name == name)
    }

    fn require_branch(&self, name: &str) -> Result<&Branch> {
        self.branch(name)
            .ok_or_else(|| CollabError::NotFound(Missing::Branch(name.to_string())))
    }

    fn current(&self) -> Option<&Version> {
        self.current.and_then(|id| self.version(id))
    }

    fn next_number(&self) -> u64 {
        self.versions.last().map_or(1, |v| v.version_number + 1)
    }

    /// Versions reachable from `id` through parent and merge-source links.
    fn ancestors(&self, id: Uuid) -> HashSet<Uuid> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([id]);
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next) {
                continue;
            }
            if let Some(version) = self.version(next) {
                queue.extend(version.metadata.parent_version_id);
                queue.extend(version.metadata.merge_source_version_id);
            }
        }
        seen
    }

    /// True when `ancestor` is `descendant` or one of its ancestors.
    fn is_ancestor(&self, ancestor: Uuid, descendant: Uuid) -> bool {
        self.ancestors(descendant).contains(&ancestor)
    }
}

/// A set of writes against one history that has not been committed yet.
///
/// Reads see staged records first so several versions can be chained inside
/// one batch (restore with backup, merge plus branch deactivation).
struct Pending<'h> {
    history: &'h ReportHistory,
    batch: HistoryBatch,
    next_number: u64,
}

impl<'h> Pending<'h> {
    fn new(history: &'h ReportHistory) -> Self {
        Self {
            history,
            batch: HistoryBatch::new(),
            next_number: history.next_number(),
        }
    }

    fn branch(&self, name: &str) -> Option<Branch> {
        self.batch
            .branches
            .iter()
            .find(|b| b.name == name)
            .or_else(|| self.history.branch(name))
            .cloned()
    }

    fn version(&self, id: Uuid) -> Option<&Version> {
        self.batch
            .versions
            .iter()
            .find(|v| v.id == id)
            .or_else(|| self.history.version(id))
    }

    fn stage_branch(&mut self, branch: Branch) {
        self.batch.put_branch(branch);
    }

    /// Stage a new version at the head of its branch and make it current.
    fn push_version(&mut self, new: NewVersion, merge_source: Option<Uuid>) -> Result<Version> {
        let report_id = self.history.report_id;
        let branch_name = new.branch_name().to_string();
        let mut branch = match self.branch(&branch_name) {
            Some(branch) if !branch.is_active => {
                return Err(CollabError::InvalidOperation(format!(
                    "branch '{branch_name}' is inactive"
                )))
            }
            Some(branch) => branch,
            None => Branch::new(report_id, branch_name.clone()),
        };

        let parent = branch.head().and_then(|id| self.version(id));
        let changes = summarize_changes(parent.map(|p| p.content.as_str()), &new.content);
        let parent_version_id = parent.map(|p| p.id);

        let number = self.next_number;
        self.next_number += 1;

        let title = if new.title.is_empty() {
            format!("Version {number}")
        } else {
            new.title
        };

        let version = Version {
            id: Uuid::new_v4(),
            report_id,
            template_id: new.template_id,
            version_number: number,
            size: new.content.len(),
            checksum: checksum(&new.content),
            title,
            author_id: new.author_id,
            created_at: now_millis(),
            tags: new.tags,
            metadata: VersionMetadata {
                page_count: page_count(&new.content),
                word_count: word_count(&new.content),
                changes,
                parent_version_id,
                merge_source_version_id: merge_source,
                branch_name,
                is_major: new.is_major,
                is_auto_save: new.is_auto_save,
            },
            content: new.content,
        };

        branch.versions.push(version.id);
        self.stage_branch(branch);
        self.batch.put_version(version.clone());
        self.batch.set_current(version.id);
        Ok(version)
    }
}

// ─── Store ────────────────────────────────────────────────────────────

/// Versioned history for every report, backed by a [`VersionRepository`].
pub struct VersionStore {
    repository: Arc<dyn VersionRepository>,
    reports: RwLock<HashMap<Uuid, Arc<Mutex<ReportHistory>>>>,
}

impl VersionStore {
    pub fn new(repository: Arc<dyn VersionRepository>) -> Self {
        Self {
            repository,
            reports: RwLock::new(HashMap::new()),
        }
    }

    /// Store over a fresh in-memory repository.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(crate::storage::MemoryRepository::new()))
    }

    /// The cached history for a report, loading it on first use.
    async fn report(&self, report_id: Uuid) -> Result<Arc<Mutex<ReportHistory>>> {
        if let Some(history) = self.reports.read().await.get(&report_id) {
            return Ok(Arc::clone(history));
        }

        let mut reports = self.reports.write().await;
        if let Some(history) = reports.get(&report_id) {
            return Ok(Arc::clone(history));
        }
        let repository = Arc::clone(&self.repository);
        let stored = tokio::task::spawn_blocking(move || repository.load(report_id))
            .await
            .map_err(|e| CollabError::PersistenceUnavailable(format!("load task failed: {e}")))??;
        log::debug!(
            "report {report_id}: loaded {} versions from repository",
            stored.versions.len()
        );
        let history = Arc::new(Mutex::new(ReportHistory::from_stored(report_id, stored)));
        reports.insert(report_id, Arc::clone(&history));
        Ok(history)
    }

    /// Commit a batch, then fold it into the cache.
    ///
    /// The repository runs on the blocking pool; backends such as RocksDB do
    /// synchronous disk I/O.
    async fn commit(&self, history: &mut ReportHistory, batch: HistoryBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let report_id = history.report_id;
        let repository = Arc::clone(&self.repository);
        let committed = tokio::task::spawn_blocking(move || {
            repository.commit(report_id, &batch).map(|()| batch)
        })
        .await
        .map_err(|e| CollabError::PersistenceUnavailable(format!("commit task failed: {e}")))?;

        match committed {
            Ok(batch) => {
                history.absorb(batch);
                Ok(())
            }
            Err(e) => {
                log::warn!("report {report_id}: commit rejected: {e}");
                Err(e.into())
            }
        }
    }

    // ─── Versions ─────────────────────────────────────────────────────

    /// Append a version to its branch (created on first use) and make it current.
    pub async fn create_version(&self, report_id: Uuid, new: NewVersion) -> Result<Version> {
        let history = self.report(report_id).await?;
        let mut history = history.lock().await;

        let mut pending = Pending::new(&history);
        let version = pending.push_version(new, None)?;
        let batch = pending.batch;
        self.commit(&mut history, batch).await?;

        log::debug!(
            "report {report_id}: created version {} on '{}'",
            version.version_number,
            version.metadata.branch_name
        );
        Ok(version)
    }

    pub async fn get_version(&self, report_id: Uuid, version_id: Uuid) -> Result<Version> {
        let history = self.report(report_id).await?;
        let history = history.lock().await;
        history.require_version(version_id).cloned()
    }

    pub async fn get_versions(&self, report_id: Uuid, filter: &VersionFilter) -> Result<Vec<Version>> {
        let history = self.report(report_id).await?;
        let history = history.lock().await;

        let on_branch: Option<HashSet<Uuid>> = match &filter.branch {
            Some(name) => Some(history.require_branch(name)?.versions.iter().copied().collect()),
            None => None,
        };

        let mut found: Vec<Version> = history
            .versions
            .iter()
            .filter(|v| on_branch.as_ref().map_or(true, |ids| ids.contains(&v.id)))
            .filter(|v| filter.matches(v))
            .cloned()
            .collect();

        if let Some(limit) = filter.limit {
            let skip = found.len().saturating_sub(limit);
            found.drain(..skip);
        }
        Ok(found)
    }

    pub async fn current_version(&self, report_id: Uuid) -> Result<Option<Version>> {
        let history = self.report(report_id).await?;
        let history = history.lock().await;
        Ok(history.current().cloned())
    }

    /// Line diff from `from` (old) to `to` (new).
    pub async fn compare_versions(&self, report_id: Uuid, from: Uuid, to: Uuid) -> Result<VersionComparison> {
        let history = self.report(report_id).await?;
        let history = history.lock().await;
        let old = history.require_version(from)?;
        let new = history.require_version(to)?;

        Ok(VersionComparison {
            from_id: old.id,
            from_number: old.version_number,
            to_id: new.id,
            to_number: new.version_number,
            diff: diff_lines(&old.content, &new.content),
        })
    }

    /// Bring an earlier version's content back.
    ///
    /// With a backup, the backup and the restore version are committed in one
    /// batch, so history grows by exactly two versions or not at all.
    pub async fn restore_version(
        &self,
        report_id: Uuid,
        version_id: Uuid,
        options: RestoreOptions,
    ) -> Result<RestoreOutcome> {
        let history = self.report(report_id).await?;
        let mut history = history.lock().await;

        let target = history.require_version(version_id)?.clone();
        let current = history.current().cloned();

        let mut pending = Pending::new(&history);
        let backup = match (&current, options.preserve_current_as_backup) {
            (Some(current), true) => {
                let new = NewVersion::new(options.author_id, current.content.clone())
                    .with_title(format!("Backup before restoring version {}", target.version_number))
                    .with_template(current.template_id)
                    .on_branch(writable_branch(&pending, &current.metadata.branch_name))
                    .auto_save()
                    .with_tag(TAG_BACKUP);
                Some(pending.push_version(new, None)?)
            }
            _ => None,
        };

        let restored = match options.mode {
            RestoreMode::CreateNew => {
                let branch = current
                    .as_ref()
                    .map_or(target.metadata.branch_name.as_str(), |c| c.metadata.branch_name.as_str());
                let new = NewVersion::new(options.author_id, target.content.clone())
                    .with_title(format!("Restored from version {}", target.version_number))
                    .with_template(target.template_id)
                    .on_branch(writable_branch(&pending, branch))
                    .with_tag(TAG_RESTORE);
                pending.push_version(new, None)?
            }
            RestoreMode::RepointCurrent => {
                pending.batch.set_current(target.id);
                target.clone()
            }
        };

        let batch = pending.batch;
        self.commit(&mut history, batch).await?;

        log::info!(
            "report {report_id}: restored version {} ({:?}{})",
            target.version_number,
            options.mode,
            if backup.is_some() { ", with backup" } else { "" }
        );
        Ok(RestoreOutcome { restored, backup })
    }

    /// Add a tag; tags are the only mutable part of a version.
    pub async fn tag_version(&self, report_id: Uuid, version_id: Uuid, tag: &str) -> Result<Version> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(CollabError::InvalidOperation("tag must not be empty".into()));
        }

        let history = self.report(report_id).await?;
        let mut history = history.lock().await;
        let mut version = history.require_version(version_id)?.clone();
        if version.has_tag(tag) {
            return Ok(version);
        }

        version.tags.push(tag.to_string());
        let mut batch = HistoryBatch::new();
        batch.put_version(version.clone());
        self.commit(&mut history, batch).await?;
        Ok(version)
    }

    /// Case-insensitive match on title, tags and content.
    pub async fn search_versions(&self, report_id: Uuid, query: &str) -> Result<Vec<Version>> {
        let history = self.report(report_id).await?;
        let history = history.lock().await;
        let needle = query.trim().to_lowercase();

        Ok(history
            .versions
            .iter()
            .filter(|v| {
                needle.is_empty()
                    || v.title.to_lowercase().contains(&needle)
                    || v.tags.iter().any(|t| t.to_lowercase().contains(&needle))
                    || v.content.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect())
    }

    /// First-parent chain from `version_id` back to the root, newest first.
    pub async fn history(&self, report_id: Uuid, version_id: Uuid) -> Result<Vec<Version>> {
        let history = self.report(report_id).await?;
        let history = history.lock().await;

        let mut chain = Vec::new();
        let mut next = Some(version_id);
        while let Some(id) = next {
            let version = history.require_version(id)?;
            next = version.metadata.parent_version_id;
            chain.push(version.clone());
        }
        Ok(chain)
    }

    // ─── Branches ─────────────────────────────────────────────────────

    /// Create a branch forked at `from_version`, or at the current version.
    pub async fn create_branch(&self, report_id: Uuid, name: &str, from_version: Option<Uuid>) -> Result<Branch> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CollabError::InvalidOperation("branch name must not be empty".into()));
        }

        let history = self.report(report_id).await?;
        let mut history = history.lock().await;
        if history.branch(name).is_some() {
            return Err(CollabError::InvalidOperation(format!("branch '{name}' already exists")));
        }

        let fork = match from_version {
            Some(id) => Some(history.require_version(id)?),
            None => history.current(),
        };
        let branch = match fork {
            Some(fork) => match history.branch(&fork.metadata.branch_name) {
                Some(parent) => Branch::forked(report_id, name, parent, fork.id),
                None => {
                    let mut branch = Branch::new(report_id, name);
                    branch.fork_version_id = Some(fork.id);
                    branch.versions.push(fork.id);
                    branch
                }
            },
            None => Branch::new(report_id, name),
        };

        let mut batch = HistoryBatch::new();
        batch.put_branch(branch.clone());
        self.commit(&mut history, batch).await?;

        log::info!("report {report_id}: created branch '{name}'");
        Ok(branch)
    }

    pub async fn branches(&self, report_id: Uuid) -> Result<Vec<Branch>> {
        let history = self.report(report_id).await?;
        let history = history.lock().await;
        Ok(history.branches.clone())
    }

    pub async fn branch(&self, report_id: Uuid, name: &str) -> Result<Branch> {
        let history = self.report(report_id).await?;
        let history = history.lock().await;
        history.require_branch(name).cloned()
    }

    /// Deactivate a branch. Its versions stay in history.
    pub async fn delete_branch(&self, report_id: Uuid, name: &str) -> Result<Branch> {
        if name == MAIN_BRANCH {
            return Err(CollabError::InvalidOperation("the main branch cannot be deleted".into()));
        }

        let history = self.report(report_id).await?;
        let mut history = history.lock().await;
        let mut branch = history.require_branch(name)?.clone();
        if !branch.is_active {
            return Ok(branch);
        }

        branch.is_active = false;
        let mut batch = HistoryBatch::new();
        batch.put_branch(branch.clone());
        self.commit(&mut history, batch).await?;

        log::info!("report {report_id}: deactivated branch '{name}'");
        Ok(branch)
    }
}

/// `name` if it can take new versions, otherwise `main`.
fn writable_branch(pending: &Pending<'_>, name: &str) -> String {
    match pending.branch(name) {
        Some(branch) if !branch.is_active => MAIN_BRANCH.to_string(),
        _ => name.to_string(),
    }
}
