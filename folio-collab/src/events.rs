//! Outbound session events for presentation and persistence collaborators.

use folio_core::{Comment, Cursor, Operation, Reply, User};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One event per mutating session call (mentions are notified separately).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    SessionCreated {
        session_id: Uuid,
        report_id: Uuid,
        creator: User,
    },
    UserJoined {
        session_id: Uuid,
        user: User,
    },
    UserLeft {
        session_id: Uuid,
        user_id: Uuid,
    },
    OperationApplied {
        session_id: Uuid,
        /// The operation as applied, after transformation
        operation: Operation,
        /// Session revision after applying
        revision: u64,
    },
    CommentAdded {
        session_id: Uuid,
        comment: Comment,
    },
    CommentReply {
        session_id: Uuid,
        comment_id: Uuid,
        reply: Reply,
    },
    CommentResolved {
        session_id: Uuid,
        comment_id: Uuid,
        resolved_by: Uuid,
    },
    /// Fire-and-forget; receivers may drop these freely
    CursorUpdate {
        session_id: Uuid,
        user_id: Uuid,
        cursor: Cursor,
    },
    SessionClosed {
        session_id: Uuid,
        report_id: Uuid,
    },
    AutoSave {
        session_id: Uuid,
        version_id: Uuid,
        version_number: u64,
        revision: u64,
    },
    UserMentioned {
        session_id: Uuid,
        comment_id: Uuid,
        user_id: Uuid,
        mentioned_by: Uuid,
    },
}

impl SessionEvent {
    /// Stable event name used by subscribers.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::SessionCreated { .. } => "sessionCreated",
            SessionEvent::UserJoined { .. } => "userJoined",
            SessionEvent::UserLeft { .. } => "userLeft",
            SessionEvent::OperationApplied { .. } => "operationApplied",
            SessionEvent::CommentAdded { .. } => "commentAdded",
            SessionEvent::CommentReply { .. } => "commentReply",
            SessionEvent::CommentResolved { .. } => "commentResolved",
            SessionEvent::CursorUpdate { .. } => "cursorUpdate",
            SessionEvent::SessionClosed { .. } => "sessionClosed",
            SessionEvent::AutoSave { .. } => "autoSave",
            SessionEvent::UserMentioned { .. } => "userMentioned",
        }
    }

    pub fn session_id(&self) -> Uuid {
        match self {
            SessionEvent::SessionCreated { session_id, .. }
            | SessionEvent::UserJoined { session_id, .. }
            | SessionEvent::UserLeft { session_id, .. }
            | SessionEvent::OperationApplied { session_id, .. }
            | SessionEvent::CommentAdded { session_id, .. }
            | SessionEvent::CommentReply { session_id, .. }
            | SessionEvent::CommentResolved { session_id, .. }
            | SessionEvent::CursorUpdate { session_id, .. }
            | SessionEvent::SessionClosed { session_id, .. }
            | SessionEvent::AutoSave { session_id, .. }
            | SessionEvent::UserMentioned { session_id, .. } => *session_id,
        }
    }

    /// Events that may be dropped without affecting correctness.
    pub fn is_droppable(&self) -> bool {
        matches!(self, SessionEvent::CursorUpdate { .. })
    }
}
