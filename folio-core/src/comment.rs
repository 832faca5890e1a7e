//! Comment threads anchored to positions in the content.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::now_millis;
use crate::operation::Operation;

/// Reply inside a comment thread. Replies are append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub timestamp: u64,
}

impl Reply {
    pub fn new(author_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            author_id,
            content: content.into(),
            timestamp: now_millis(),
        }
    }
}

/// A comment thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    /// Anchor offset in chars
    pub position: usize,
    pub page_number: Option<u32>,
    pub element_id: Option<String>,
    pub timestamp: u64,
    pub resolved: bool,
    pub resolved_by: Option<Uuid>,
    pub resolved_at: Option<u64>,
    pub replies: Vec<Reply>,
    pub mentions: Vec<Uuid>,
}

impl Comment {
    pub fn new(author_id: Uuid, content: impl Into<String>, position: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            author_id,
            content: content.into(),
            position,
            page_number: None,
            element_id: None,
            timestamp: now_millis(),
            resolved: false,
            resolved_by: None,
            resolved_at: None,
            replies: Vec::new(),
            mentions: Vec::new(),
        }
    }

    pub fn with_anchor(mut self, page_number: Option<u32>, element_id: Option<String>) -> Self {
        self.page_number = page_number;
        self.element_id = element_id;
        self
    }

    pub fn with_mentions(mut self, mentions: Vec<Uuid>) -> Self {
        self.mentions = mentions;
        self
    }

    pub fn resolve(&mut self, by: Uuid) {
        self.resolved = true;
        self.resolved_by = Some(by);
        self.resolved_at = Some(now_millis());
    }

    /// Shift the anchor through an applied operation.
    ///
    /// Resolved threads keep their original anchor.
    pub fn rebase(&mut self, op: &Operation) {
        if !self.resolved {
            self.position = op.map_position(self.position);
        }
    }
}
