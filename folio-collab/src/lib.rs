//! # folio-collab: Collaborative editing and version history for Folio
//!
//! Live sessions reconcile concurrent edits with Operational Transform and
//! periodically materialize their content into a branching version history.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   WebSocket    ┌──────────────┐
//! │ editor       │ ◄────────────► │ CollabServer │
//! │ (per user)   │  Binary Proto  │              │
//! └──────────────┘                └──────┬───────┘
//!                                        │
//!                                        ▼
//!                               ┌────────────────┐      ┌─────────────────┐
//!                               │ SessionManager │ ───► │ PresenceTracker │
//!                               └───┬────────┬───┘      └─────────────────┘
//!                        events     │        │ autosave
//!                                   ▼        ▼
//!                        ┌──────────────┐  ┌──────────────┐
//!                        │ EventChannel │  │ VersionStore │
//!                        │ (fan-out)    │  └──────┬───────┘
//!                        └──────────────┘         │ HistoryBatch
//!                                                 ▼
//!                                       ┌───────────────────┐
//!                                       │ VersionRepository │
//!                                       │ memory │ RocksDB  │
//!                                       └───────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`session`]: Session lifecycle, OT reconciliation, comments, autosave
//! - [`presence`]: Per-user activity status with lazy expiry
//! - [`version`]: Versions, branches, restore, merge
//! - [`storage`]: Repository trait with in-memory and RocksDB backends
//! - [`broadcast`]: Per-session event fan-out
//! - [`protocol`]: Binary wire protocol (bincode-encoded frames)
//! - [`server`]: WebSocket server over the session manager

pub mod broadcast;
pub mod error;
pub mod events;
pub mod presence;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;
pub mod version;

// Re-exports for convenience
pub use broadcast::{ChannelStats, EventChannel};
pub use error::{CollabError, Missing, Result};
pub use events::SessionEvent;
pub use presence::{PresenceConfig, PresenceSnapshot, PresenceStatus, PresenceTracker};
pub use protocol::{ClientFrame, ClientMessage, ErrorKind, ProtocolError, ServerMessage};
pub use server::{CollabServer, ServerConfig, ServerStats};
pub use session::{
    Applied, ConflictResolution, LeaveOutcome, NewSession, Session, SessionConfig, SessionManager,
    SessionSettings, SessionState,
};
pub use storage::{
    HistoryBatch, MemoryRepository, RocksRepository, StoreConfig, StoreError, StoredHistory,
    VersionRepository,
};
pub use version::{
    ConflictPolicy, MergeConflict, MergeOptions, MergeOutcome, MergeStrategy, NewVersion,
    RestoreMode, RestoreOptions, RestoreOutcome, VersionComparison, VersionFilter, VersionStore,
};
