//! Debounced materialization of session content into versions.
//!
//! ```text
//! edit ─► generation += 1 ─► spawn(sleep debounce) ─┐
//! edit ─► generation += 1 ─► spawn(sleep debounce) ─┤  only the task whose
//! edit ─► generation += 1 ─► spawn(sleep debounce) ─┘  generation is still
//!                                                      current saves
//! ```
//!
//! The snapshot is taken under the session lock, the lock is released for the
//! write, and re-taken only to record the result. The revision being written
//! is marked in flight so closing the session does not write it a second time.
//! A failed write is retried one window later while no newer edit has
//! superseded it.

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use folio_core::Version;

use super::SessionHandle;
use crate::error::Result;
use crate::events::SessionEvent;
use crate::version::{NewVersion, VersionStore};

/// Per-session autosave bookkeeping.
#[derive(Debug, Clone, Default)]
pub(crate) struct AutosaveState {
    /// Bumped on every edit; a timer only fires for the latest value
    pub generation: u64,
    /// Revision covered by the last successful save
    pub saved_revision: u64,
    pub last_version_id: Option<Uuid>,
    /// Revision a debounce task is writing right now
    pub in_flight: Option<u64>,
}

impl AutosaveState {
    pub fn is_dirty(&self, revision: u64) -> bool {
        revision > self.saved_revision
    }

    /// Dirty and not already covered by a write in progress.
    pub fn needs_flush(&self, revision: u64) -> bool {
        self.is_dirty(revision) && self.in_flight.map_or(true, |saving| revision > saving)
    }

    /// Forget an in-flight write at or below `revision`.
    pub fn settle(&mut self, revision: u64) {
        if self.in_flight.is_some_and(|saving| saving <= revision) {
            self.in_flight = None;
        }
    }
}

/// What gets written, captured under the session lock.
pub(crate) struct Snapshot {
    pub session_id: Uuid,
    pub report_id: Uuid,
    pub template_id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub revision: u64,
}

impl Snapshot {
    pub async fn write(&self, versions: &VersionStore) -> Result<Version> {
        let new = NewVersion::new(self.author_id, self.content.clone())
            .with_title(format!("Auto-save at revision {}", self.revision))
            .with_template(self.template_id)
            .auto_save();
        versions.create_version(self.report_id, new).await
    }
}

/// Arm the debounce timer for `generation`.
pub(crate) fn schedule(handle: Arc<SessionHandle>, versions: Arc<VersionStore>, delay: Duration, generation: u64) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;

        let snapshot = {
            let mut live = handle.live.lock().await;
            if live.session.is_closed() || live.autosave.generation != generation {
                return;
            }
            if !live.autosave.needs_flush(live.session.revision) {
                return;
            }
            live.autosave.in_flight = Some(live.session.revision);
            live.snapshot()
        };

        match snapshot.write(&versions).await {
            Ok(version) => {
                let mut live = handle.live.lock().await;
                live.record_save(&snapshot, &version);
                handle.events.publish(SessionEvent::AutoSave {
                    session_id: snapshot.session_id,
                    version_id: version.id,
                    version_number: version.version_number,
                    revision: snapshot.revision,
                });
            }
            Err(e) => {
                log::warn!(
                    "session {}: autosave at revision {} failed: {e}; retrying",
                    snapshot.session_id,
                    snapshot.revision
                );
                let still_current = {
                    let mut live = handle.live.lock().await;
                    live.autosave.settle(snapshot.revision);
                    if live.session.is_closed() {
                        log::warn!(
                            "session {}: closed while revision {} was unsaved",
                            snapshot.session_id,
                            snapshot.revision
                        );
                    }
                    !live.session.is_closed() && live.autosave.generation == generation
                };
                if still_current {
                    schedule(handle, versions, delay, generation);
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_revision_is_not_flushed_twice() {
        let mut state = AutosaveState::default();
        assert!(state.needs_flush(3));

        state.in_flight = Some(3);
        assert!(state.is_dirty(3));
        assert!(!state.needs_flush(3));
        assert!(state.needs_flush(4));

        // A newer save settles an older write.
        state.settle(4);
        assert_eq!(state.in_flight, None);
    }

    #[test]
    fn test_settle_keeps_newer_write() {
        let mut state = AutosaveState {
            in_flight: Some(5),
            ..AutosaveState::default()
        };
        state.settle(4);
        assert_eq!(state.in_flight, Some(5));
        state.settle(5);
        assert_eq!(state.in_flight, None);
    }
}
