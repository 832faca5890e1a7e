//! # folio-core: Document model and edit algebra for Folio
//!
//! Pure, I/O-free building blocks shared by the collaboration layer:
//!
//! ```text
//! ┌────────────┐   transform()   ┌────────────┐
//! │ Operation  │ ◄─────────────► │ Operation  │   concurrent edits
//! └─────┬──────┘                 └─────┬──────┘
//!       │ apply()                      │
//!       ▼                              ▼
//!   content ──────── diff_lines() ──── content     version comparison
//! ```
//!
//! ## Modules
//!
//! - [`operation`]: Insert/delete/replace/format edits and `apply`
//! - [`transform`]: Operational Transform with submission-order tie-breaks
//! - [`diff`]: Line-oriented diff used for comparison and merging
//! - [`user`]: Participants, roles, cursors
//! - [`comment`]: Comment threads and anchor rebasing
//! - [`version`]: Version/branch records, checksums, change summaries

pub mod comment;
pub mod diff;
pub mod operation;
pub mod transform;
pub mod user;
pub mod version;

use std::time::SystemTime;

pub use comment::{Comment, Reply};
pub use diff::{diff_lines, DiffChange, DiffKind, DiffReport};
pub use operation::{apply, char_len, Attributes, Operation, OperationError, OperationKind, OperationMetadata};
pub use transform::{transform, transform_against};
pub use user::{Cursor, Role, User};
pub use version::{Branch, ChangeKind, Version, VersionChange, VersionMetadata, MAIN_BRANCH};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
