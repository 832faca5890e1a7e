//! Atomic edit operations and their pure application to content.
//!
//! Content is an opaque string. Every offset (`position`, `length`) counts
//! Unicode scalar values, so an operation can never split a code point.
//!
//! ```text
//! "hello world"          insert(5, ",")        "hello, world"
//!       ▲                delete(5, 6)          "hello"
//!   position 5           replace(0, 5, "HELLO") "HELLO world"
//!                        format(0, 5, bold)    unchanged text
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::now_millis;

/// Upper bound on any range length. Longer ranges act as this many chars,
/// which reaches past the end of every real document, so offset sums stay
/// far from overflow.
pub const MAX_SPAN: usize = usize::MAX >> 4;

/// Operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OperationKind {
    /// Splice `content` in at `position`
    Insert = 1,
    /// Remove `length` chars starting at `position`
    Delete = 2,
    /// Delete followed by insert at the same position
    Replace = 3,
    /// Attach `attributes` to a range; text is untouched
    Format = 4,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OperationKind::Insert => "insert",
            OperationKind::Delete => "delete",
            OperationKind::Replace => "replace",
            OperationKind::Format => "format",
        };
        f.write_str(name)
    }
}

/// Page/element scope of an operation inside the structured document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationMetadata {
    pub page_number: Option<u32>,
    pub element_id: Option<String>,
}

/// Formatting attributes (`"bold" -> "true"`, `"color" -> "#ff0000"`).
pub type Attributes = BTreeMap<String, String>;

/// A single atomic edit.
///
/// Immutable once created: transformation produces new instances with
/// fresh ids (see [`crate::transform`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: Uuid,
    pub kind: OperationKind,
    pub author_id: Uuid,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    pub position: usize,
    pub content: Option<String>,
    pub length: Option<usize>,
    pub attributes: Option<Attributes>,
    pub metadata: OperationMetadata,
    /// Number of session-log operations the author had observed when the
    /// edit was made. `None` means "based on the latest revision".
    pub base_revision: Option<u64>,
}

impl Operation {
    fn new(kind: OperationKind, author_id: Uuid, position: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            author_id,
            timestamp: now_millis(),
            position,
            content: None,
            length: None,
            attributes: None,
            metadata: OperationMetadata::default(),
            base_revision: None,
        }
    }

    /// Create an insert operation.
    pub fn insert(author_id: Uuid, position: usize, content: impl Into<String>) -> Self {
        let mut op = Self::new(OperationKind::Insert, author_id, position);
        op.content = Some(content.into());
        op
    }

    /// Create a delete operation.
    pub fn delete(author_id: Uuid, position: usize, length: usize) -> Self {
        let mut op = Self::new(OperationKind::Delete, author_id, position);
        op.length = Some(length);
        op
    }

    /// Create a replace operation.
    pub fn replace(
        author_id: Uuid,
        position: usize,
        length: usize,
        content: impl Into<String>,
    ) -> Self {
        let mut op = Self::new(OperationKind::Replace, author_id, position);
        op.length = Some(length);
        op.content = Some(content.into());
        op
    }

    /// Create a format operation.
    pub fn format(author_id: Uuid, position: usize, length: usize, attributes: Attributes) -> Self {
        let mut op = Self::new(OperationKind::Format, author_id, position);
        op.length = Some(length);
        op.attributes = Some(attributes);
        op
    }

    /// Scope the operation to a page/element.
    pub fn with_metadata(mut self, page_number: Option<u32>, element_id: Option<String>) -> Self {
        self.metadata = OperationMetadata {
            page_number,
            element_id,
        };
        self
    }

    /// Record the session revision the author was looking at.
    pub fn with_base_revision(mut self, revision: u64) -> Self {
        self.base_revision = Some(revision);
        self
    }

    /// Check the field invariants for this kind.
    pub fn validate(&self) -> Result<(), OperationError> {
        let needs_content = matches!(self.kind, OperationKind::Insert | OperationKind::Replace);
        let needs_length = !matches!(self.kind, OperationKind::Insert);

        if needs_content && self.content.is_none() {
            return Err(OperationError::MissingContent(self.kind));
        }
        if needs_length && self.length.is_none() {
            return Err(OperationError::MissingLength(self.kind));
        }
        if self.kind == OperationKind::Format && self.attributes.is_none() {
            return Err(OperationError::MissingAttributes);
        }
        Ok(())
    }

    /// Inserted text (empty for delete/format).
    pub fn text(&self) -> &str {
        match self.kind {
            OperationKind::Insert | OperationKind::Replace => self.content.as_deref().unwrap_or(""),
            OperationKind::Delete | OperationKind::Format => "",
        }
    }

    /// Number of chars this operation inserts.
    pub fn inserted_len(&self) -> usize {
        self.text().chars().count()
    }

    /// Number of chars this operation removes.
    pub fn deleted_len(&self) -> usize {
        match self.kind {
            OperationKind::Delete | OperationKind::Replace => self.length.unwrap_or(0).min(MAX_SPAN),
            OperationKind::Insert | OperationKind::Format => 0,
        }
    }

    /// Range length covered by the operation (format ranges included).
    pub fn range_len(&self) -> usize {
        match self.kind {
            OperationKind::Insert => 0,
            _ => self.length.unwrap_or(0).min(MAX_SPAN),
        }
    }

    /// Whether the operation changes the text at all.
    pub fn changes_text(&self) -> bool {
        self.kind != OperationKind::Format
    }

    /// An operation that leaves content and formatting untouched.
    pub fn is_noop(&self) -> bool {
        match self.kind {
            OperationKind::Format => self.range_len() == 0,
            _ => self.deleted_len() == 0 && self.inserted_len() == 0,
        }
    }

    /// Map an anchor position in the pre-operation content to the
    /// post-operation content.
    ///
    /// Anchors inside a deleted range collapse to the edit position; anchors
    /// at the edit position stay put (text inserted there lands after them
    /// only when they sit strictly past it).
    pub fn map_position(&self, anchor: usize) -> usize {
        if !self.changes_text() {
            return anchor;
        }
        let start = self.position;
        let end = start.saturating_add(self.deleted_len());
        if anchor <= start {
            anchor
        } else if anchor >= end {
            anchor - (end - start) + self.inserted_len()
        } else {
            start
        }
    }
}

/// Operation validation and application errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperationError {
    #[error("{0} operation requires content")]
    MissingContent(OperationKind),
    #[error("{0} operation requires a length")]
    MissingLength(OperationKind),
    #[error("format operation requires attributes")]
    MissingAttributes,
    #[error("position {position} exceeds content length {len}")]
    PositionOutOfBounds { position: usize, len: usize },
}

/// Count chars in `content`.
pub fn char_len(content: &str) -> usize {
    content.chars().count()
}

/// Byte offset of the `char_pos`-th char (or the end of the string).
fn byte_offset(content: &str, char_pos: usize) -> usize {
    content
        .char_indices()
        .nth(char_pos)
        .map_or(content.len(), |(idx, _)| idx)
}

/// Apply `op` to `content`, returning the new content.
///
/// Pure: the input is never modified. Deletes are bounded by the end of the
/// content; a position past the end is rejected.
pub fn apply(content: &str, op: &Operation) -> Result<String, OperationError> {
    op.validate()?;

    let len = char_len(content);
    if op.position > len {
        return Err(OperationError::PositionOutOfBounds {
            position: op.position,
            len,
        });
    }
    if !op.changes_text() {
        return Ok(content.to_string());
    }

    let start = byte_offset(content, op.position);
    let delete_end = op.position.saturating_add(op.deleted_len()).min(len);
    let end = byte_offset(content, delete_end);
    let text = op.text();

    let mut out = String::with_capacity(content.len() - (end - start) + text.len());
    out.push_str(&content[..start]);
    out.push_str(text);
    out.push_str(&content[end..]);
    Ok(out)
}
