//! Best-effort presence tracking, decoupled from session membership.
//!
//! ```text
//! user_id ──► { session_id, last_activity, status }
//!
//!   touch() ─── active ──(idle_after)──► idle ──(stale_after)──► purged
//! ```
//!
//! Presence is never authoritative: `Session::participants` decides who is in
//! a session. OT and versioning never read this table. Stale entries are
//! purged lazily on read and by [`PresenceTracker::purge_stale`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Presence status as reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresenceStatus {
    Active,
    Idle,
    Away,
}

#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// Entries older than this are purged (default: 5 minutes)
    pub stale_after: Duration,
    /// Active entries older than this read as idle (default: 60s)
    pub idle_after: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(5 * 60),
            idle_after: Duration::from_secs(60),
        }
    }
}

impl PresenceConfig {
    /// Short windows for tests.
    pub fn for_testing() -> Self {
        Self {
            stale_after: Duration::from_millis(80),
            idle_after: Duration::from_millis(30),
        }
    }
}

#[derive(Debug, Clone)]
struct PresenceEntry {
    session_id: Uuid,
    last_activity: Instant,
    status: PresenceStatus,
}

/// Read-side view of a presence entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceSnapshot {
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub status: PresenceStatus,
    pub inactive_for: Duration,
}

/// Side-store of user activity.
pub struct PresenceTracker {
    config: PresenceConfig,
    entries: Mutex<HashMap<Uuid, PresenceEntry>>,
}

impl PresenceTracker {
    pub fn new(config: PresenceConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Presence data is best-effort, so a poisoned lock is simply reused.
    fn entries(&self) -> MutexGuard<'_, HashMap<Uuid, PresenceEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record activity for `user_id` in `session_id`; status becomes active.
    pub fn touch(&self, user_id: Uuid, session_id: Uuid) {
        self.entries().insert(
            user_id,
            PresenceEntry {
                session_id,
                last_activity: Instant::now(),
                status: PresenceStatus::Active,
            },
        );
    }

    /// Set an explicit status without refreshing activity.
    ///
    /// Returns `false` if the user has no entry.
    pub fn set_status(&self, user_id: Uuid, status: PresenceStatus) -> bool {
        match self.entries().get_mut(&user_id) {
            Some(entry) => {
                entry.status = status;
                true
            }
            None => false,
        }
    }

    /// Current presence of a user; stale entries are purged and read as absent.
    pub fn get(&self, user_id: Uuid) -> Option<PresenceSnapshot> {
        let mut entries = self.entries();
        let entry = entries.get(&user_id)?;
        if entry.last_activity.elapsed() > self.config.stale_after {
            entries.remove(&user_id);
            return None;
        }
        Some(self.snapshot(user_id, entry))
    }

    pub fn remove(&self, user_id: Uuid) -> bool {
        self.entries().remove(&user_id).is_some()
    }

    /// Fresh entries for one session.
    pub fn in_session(&self, session_id: Uuid) -> Vec<PresenceSnapshot> {
        self.purge_stale();
        let entries = self.entries();
        let mut found: Vec<PresenceSnapshot> = entries
            .iter()
            .filter(|(_, e)| e.session_id == session_id)
            .map(|(id, e)| self.snapshot(*id, e))
            .collect();
        found.sort_by_key(|s| s.inactive_for);
        found
    }

    /// Drop every entry older than the staleness window. Returns how many.
    pub fn purge_stale(&self) -> usize {
        let stale_after = self.config.stale_after;
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, e| e.last_activity.elapsed() <= stale_after);
        let purged = before - entries.len();
        if purged > 0 {
            log::debug!("presence: purged {purged} stale entries");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self, user_id: Uuid, entry: &PresenceEntry) -> PresenceSnapshot {
        let inactive_for = entry.last_activity.elapsed();
        let status = match entry.status {
            PresenceStatus::Active if inactive_for > self.config.idle_after => PresenceStatus::Idle,
            other => other,
        };
        PresenceSnapshot {
            user_id,
            session_id: entry.session_id,
            status,
            inactive_for,
        }
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new(PresenceConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_touch_and_get() {
        let tracker = PresenceTracker::default();
        let user = Uuid::new_v4();
        let session = Uuid::new_v4();

        assert!(tracker.get(user).is_none());
        tracker.touch(user, session);

        let snap = tracker.get(user).unwrap();
        assert_eq!(snap.session_id, session);
        assert_eq!(snap.status, PresenceStatus::Active);
    }

    #[test]
    fn test_set_status() {
        let tracker = PresenceTracker::default();
        let user = Uuid::new_v4();
        assert!(!tracker.set_status(user, PresenceStatus::Away));

        tracker.touch(user, Uuid::new_v4());
        assert!(tracker.set_status(user, PresenceStatus::Away));
        assert_eq!(tracker.get(user).unwrap().status, PresenceStatus::Away);
    }

    #[test]
    fn test_active_decays_to_idle() {
        let tracker = PresenceTracker::new(PresenceConfig::for_testing());
        let user = Uuid::new_v4();
        tracker.touch(user, Uuid::new_v4());

        sleep(Duration::from_millis(45));
        assert_eq!(tracker.get(user).unwrap().status, PresenceStatus::Idle);
    }

    #[test]
    fn test_stale_entries_purged_lazily() {
        let tracker = PresenceTracker::new(PresenceConfig::for_testing());
        let user = Uuid::new_v4();
        tracker.touch(user, Uuid::new_v4());
        assert_eq!(tracker.len(), 1);

        sleep(Duration::from_millis(120));
        assert!(tracker.get(user).is_none());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_purge_stale_counts() {
        let tracker = PresenceTracker::new(PresenceConfig::for_testing());
        tracker.touch(Uuid::new_v4(), Uuid::new_v4());
        tracker.touch(Uuid::new_v4(), Uuid::new_v4());
        sleep(Duration::from_millis(120));
        tracker.touch(Uuid::new_v4(), Uuid::new_v4());

        assert_eq!(tracker.purge_stale(), 2);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_in_session_filters() {
        let tracker = PresenceTracker::default();
        let session = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        tracker.touch(a, session);
        tracker.touch(b, session);
        tracker.touch(Uuid::new_v4(), Uuid::new_v4());

        let here = tracker.in_session(session);
        assert_eq!(here.len(), 2);
        assert!(here.iter().any(|s| s.user_id == a));
        assert!(here.iter().any(|s| s.user_id == b));

        assert!(tracker.remove(a));
        assert_eq!(tracker.in_session(session).len(), 1);
    }
}
