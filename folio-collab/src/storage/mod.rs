//! Durable storage for report histories.
//!
//! Architecture:
//! ```text
//! ┌──────────────┐   HistoryBatch    ┌────────────────────┐
//! │ VersionStore │ ────commit()────► │ VersionRepository  │
//! │ (in-memory)  │ ◄────load()────── │  Memory │ RocksDB  │
//! └──────────────┘   StoredHistory   └─────────┬──────────┘
//!                                              │ column families
//!                                              ▼
//!                        ┌──────────────────────────────────────────┐
//!                        │ CF "versions" : report ‖ number → Version │
//!                        │ CF "branches" : report ‖ name   → Branch  │
//!                        │ CF "heads"    : report          → current │
//!                        └──────────────────────────────────────────┘
//! ```
//!
//! A commit is all-or-nothing. The version store writes the batch first and
//! only then updates its in-memory view, so a failed commit leaves both sides
//! as they were.

pub mod memory;
pub mod rocks;

pub use memory::MemoryRepository;
pub use rocks::{RocksRepository, StoreConfig};

use folio_core::{Branch, Version};
use uuid::Uuid;

/// Everything persisted for one report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredHistory {
    /// Ordered by version number
    pub versions: Vec<Version>,
    pub branches: Vec<Branch>,
    pub current: Option<Uuid>,
}

impl StoredHistory {
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty() && self.branches.is_empty()
    }
}

/// One atomic write: versions and branches are upserted, the current pointer
/// replaced when present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryBatch {
    pub versions: Vec<Version>,
    pub branches: Vec<Branch>,
    pub current: Option<Uuid>,
}

impl HistoryBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_version(&mut self, version: Version) -> &mut Self {
        self.versions.push(version);
        self
    }

    pub fn put_branch(&mut self, branch: Branch) -> &mut Self {
        // Last write wins if the same branch is staged twice.
        self.branches.retain(|b| b.name != branch.name);
        self.branches.push(branch);
        self
    }

    pub fn set_current(&mut self, version_id: Uuid) -> &mut Self {
        self.current = Some(version_id);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty() && self.branches.is_empty() && self.current.is_none()
    }
}

/// Persistence contract for version histories.
pub trait VersionRepository: Send + Sync {
    /// Load a report's history; an unknown report yields an empty history.
    fn load(&self, report_id: Uuid) -> Result<StoredHistory, StoreError>;

    /// Atomically apply a batch for one report.
    fn commit(&self, report_id: Uuid, batch: &HistoryBatch) -> Result<(), StoreError>;

    /// Every report with at least one stored version.
    fn reports(&self) -> Result<Vec<Uuid>, StoreError>;
}

/// Storage errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backend internal error
    DatabaseError(String),
    /// Serialization failed
    SerializationError(String),
    /// Deserialization failed
    DeserializationError(String),
    /// Compression error
    CompressionError(String),
    /// Backend refused the write (e.g. offline)
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DatabaseError(e) => write!(f, "Database error: {e}"),
            StoreError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            StoreError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            StoreError::CompressionError(e) => write!(f, "Compression error: {e}"),
            StoreError::Unavailable(e) => write!(f, "Storage unavailable: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}
