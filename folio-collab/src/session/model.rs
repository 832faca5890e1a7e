//! Session records and settings.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use folio_core::{Comment, Operation, User};

/// Session lifecycle: `Created → Active → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Created,
    Active,
    Closed,
}

/// How concurrent edits are reconciled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictResolution {
    /// Transform against every log entry past the author's base revision
    #[default]
    OperationalTransform,
    /// Apply as submitted, clamped to the current content
    LastWriteWins,
    /// Reject edits made against a stale revision
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    pub allow_anonymous: bool,
    pub max_participants: usize,
    pub auto_save: bool,
    pub conflict_resolution: ConflictResolution,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            allow_anonymous: false,
            max_participants: 10,
            auto_save: true,
            conflict_resolution: ConflictResolution::OperationalTransform,
        }
    }
}

/// A live editing session over one report.
///
/// `operations` is append-only and `revision == operations.len()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub report_id: Uuid,
    pub template_id: Uuid,
    pub participants: Vec<User>,
    pub operations: Vec<Operation>,
    pub comments: Vec<Comment>,
    /// Live document the operations apply to
    pub content: String,
    pub revision: u64,
    pub created_at: u64,
    pub last_activity: u64,
    pub state: SessionState,
    pub settings: SessionSettings,
}

impl Session {
    pub fn participant(&self, user_id: Uuid) -> Option<&User> {
        self.participants.iter().find(|u| u.id == user_id)
    }

    pub(crate) fn participant_mut(&mut self, user_id: Uuid) -> Option<&mut User> {
        self.participants.iter_mut().find(|u| u.id == user_id)
    }

    pub fn online_participants(&self) -> impl Iterator<Item = &User> {
        self.participants.iter().filter(|u| u.is_online)
    }

    pub fn online_count(&self) -> usize {
        self.online_participants().count()
    }

    pub fn comment(&self, comment_id: Uuid) -> Option<&Comment> {
        self.comments.iter().find(|c| c.id == comment_id)
    }

    pub(crate) fn comment_mut(&mut self, comment_id: Uuid) -> Option<&mut Comment> {
        self.comments.iter_mut().find(|c| c.id == comment_id)
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }
}

/// Request to open a session.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSession {
    pub report_id: Uuid,
    pub template_id: Uuid,
    pub creator: User,
    /// Starting content; the report's current version when absent
    pub content: Option<String>,
    /// Manager defaults when absent
    pub settings: Option<SessionSettings>,
}

impl NewSession {
    pub fn new(report_id: Uuid, creator: User) -> Self {
        Self {
            report_id,
            template_id: Uuid::nil(),
            creator,
            content: None,
            settings: None,
        }
    }

    pub fn with_template(mut self, template_id: Uuid) -> Self {
        self.template_id = template_id;
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_settings(mut self, settings: SessionSettings) -> Self {
        self.settings = Some(settings);
        self
    }
}

/// Result of a successful `apply_operation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Applied {
    /// The operation as applied, after reconciliation
    pub operation: Operation,
    /// Session revision after applying
    pub revision: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// The last online participant left and the session closed
    pub closed: bool,
}
