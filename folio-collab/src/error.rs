//! Error taxonomy for the collaboration layer.
//!
//! Every failure is local to the call that triggered it: validation happens
//! before any state changes, so a rejected call leaves sessions and history
//! exactly as they were. Merge conflicts are not errors; they come back as
//! data in [`crate::version::MergeOutcome`].

use folio_core::OperationError;
use uuid::Uuid;

use crate::storage::StoreError;

/// What a `NotFound` error refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Missing {
    Session(Uuid),
    Participant(Uuid),
    Comment(Uuid),
    Version(Uuid),
    Branch(String),
}

impl std::fmt::Display for Missing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Missing::Session(id) => write!(f, "session {id}"),
            Missing::Participant(id) => write!(f, "participant {id}"),
            Missing::Comment(id) => write!(f, "comment {id}"),
            Missing::Version(id) => write!(f, "version {id}"),
            Missing::Branch(name) => write!(f, "branch '{name}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollabError {
    /// Viewer edit attempt, or resolving someone else's comment as a viewer
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("session {session_id} is full ({max} participants)")]
    CapacityExceeded { session_id: Uuid, max: usize },
    #[error("{0} not found")]
    NotFound(Missing),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    /// The repository rejected a write; in-memory state is unchanged
    #[error("persistence unavailable: {0}")]
    PersistenceUnavailable(String),
}

impl From<OperationError> for CollabError {
    fn from(e: OperationError) -> Self {
        CollabError::InvalidOperation(e.to_string())
    }
}

impl From<StoreError> for CollabError {
    fn from(e: StoreError) -> Self {
        CollabError::PersistenceUnavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CollabError>;
