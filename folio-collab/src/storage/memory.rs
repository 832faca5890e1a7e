//! In-process repository, the default backend for tests and ephemeral servers.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use uuid::Uuid;

use folio_core::{Branch, Version};

use super::{HistoryBatch, StoreError, StoredHistory, VersionRepository};

#[derive(Default)]
struct ReportRecord {
    versions: BTreeMap<u64, Version>,
    branches: BTreeMap<String, Branch>,
    current: Option<Uuid>,
}

/// `HashMap`-backed repository. Commits are atomic under a single write lock.
#[derive(Default)]
pub struct MemoryRepository {
    reports: RwLock<HashMap<Uuid, ReportRecord>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VersionRepository for MemoryRepository {
    fn load(&self, report_id: Uuid) -> Result<StoredHistory, StoreError> {
        let reports = self
            .reports
            .read()
            .map_err(|_| StoreError::DatabaseError("repository lock poisoned".into()))?;
        Ok(match reports.get(&report_id) {
            Some(record) => StoredHistory {
                versions: record.versions.values().cloned().collect(),
                branches: record.branches.values().cloned().collect(),
                current: record.current,
            },
            None => StoredHistory::default(),
        })
    }

    fn commit(&self, report_id: Uuid, batch: &HistoryBatch) -> Result<(), StoreError> {
        let mut reports = self
            .reports
            .write()
            .map_err(|_| StoreError::DatabaseError("repository lock poisoned".into()))?;
        let record = reports.entry(report_id).or_default();
        for version in &batch.versions {
            record.versions.insert(version.version_number, version.clone());
        }
        for branch in &batch.branches {
            record.branches.insert(branch.name.clone(), branch.clone());
        }
        if let Some(current) = batch.current {
            record.current = Some(current);
        }
        Ok(())
    }

    fn reports(&self) -> Result<Vec<Uuid>, StoreError> {
        let reports = self
            .reports
            .read()
            .map_err(|_| StoreError::DatabaseError("repository lock poisoned".into()))?;
        Ok(reports
            .iter()
            .filter(|(_, r)| !r.versions.is_empty())
            .map(|(id, _)| *id)
            .collect())
    }
}
