//! Live editing sessions.
//!
//! ```text
//!            ┌──────────────────────── SessionManager ─────────────────────────┐
//!  client ──►│ sessions: RwLock<HashMap<id, Arc<SessionHandle>>>               │
//!            │                 │                                               │
//!            │                 ▼                                               │
//!            │   SessionHandle { live: Mutex<LiveSession>, events }            │
//!            │        │ lock ─► validate ─► reconcile (OT) ─► apply ─► append  │
//!            │        │                                        │               │
//!            │        └────────────► EventChannel ◄────────────┘ publish       │
//!            │                           │                                     │
//!            │         autosave timer ───┴──► VersionStore (debounced)         │
//!            └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every mutation of one session runs under that session's mutex, so edits
//! are applied one at a time in arrival order and events leave in the same
//! order. The session map lock is never held while waiting for a session.
//! Each mutating call publishes exactly one named event; mentions add one
//! `UserMentioned` per mentioned participant.

pub mod autosave;
pub mod model;

pub use model::{
    Applied, ConflictResolution, LeaveOutcome, NewSession, Session, SessionSettings, SessionState,
};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use uuid::Uuid;

use folio_core::{
    apply, char_len, now_millis, transform_against, Comment, Cursor, Operation, Reply, User,
};

use crate::broadcast::EventChannel;
use crate::error::{CollabError, Missing, Result};
use crate::events::SessionEvent;
use crate::presence::PresenceTracker;
use crate::version::VersionStore;
use autosave::{AutosaveState, Snapshot};

/// Session manager configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Quiet period before an autosave fires (default: 2s)
    pub autosave_debounce: Duration,
    /// Events buffered per subscriber (default: 256)
    pub event_capacity: usize,
    /// Settings for sessions created without explicit ones
    pub default_settings: SessionSettings,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            autosave_debounce: Duration::from_secs(2),
            event_capacity: 256,
            default_settings: SessionSettings::default(),
        }
    }
}

impl SessionConfig {
    /// Short debounce so tests can observe autosaves.
    pub fn for_testing() -> Self {
        Self {
            autosave_debounce: Duration::from_millis(40),
            event_capacity: 64,
            default_settings: SessionSettings::default(),
        }
    }
}

// ─── Per-session state ────────────────────────────────────────────────

pub(crate) struct LiveSession {
    pub session: Session,
    pub autosave: AutosaveState,
}

impl LiveSession {
    fn snapshot(&self) -> Snapshot {
        let author_id = self
            .session
            .operations
            .last()
            .map(|op| op.author_id)
            .or_else(|| self.session.participants.first().map(|u| u.id))
            .unwrap_or_default();
        Snapshot {
            session_id: self.session.id,
            report_id: self.session.report_id,
            template_id: self.session.template_id,
            author_id,
            content: self.session.content.clone(),
            revision: self.session.revision,
        }
    }

    fn record_save(&mut self, snapshot: &Snapshot, version: &folio_core::Version) {
        self.autosave.settle(snapshot.revision);
        if snapshot.revision > self.autosave.saved_revision {
            self.autosave.saved_revision = snapshot.revision;
            self.autosave.last_version_id = Some(version.id);
        }
        log::debug!(
            "session {}: autosaved revision {} as version {}",
            snapshot.session_id,
            snapshot.revision,
            version.version_number
        );
    }

    /// An online participant, or `NotFound`.
    fn require_participant(&self, user_id: Uuid) -> Result<&User> {
        self.session
            .participant(user_id)
            .filter(|u| u.is_online)
            .ok_or(CollabError::NotFound(Missing::Participant(user_id)))
    }

    fn touch(&mut self, user_id: Uuid) {
        let now = now_millis();
        self.session.last_activity = now;
        if let Some(user) = self.session.participant_mut(user_id) {
            user.last_seen = now;
        }
    }
}

pub(crate) struct SessionHandle {
    pub live: Mutex<LiveSession>,
    pub events: EventChannel,
}

// ─── Manager ──────────────────────────────────────────────────────────

/// Owns every live session.
pub struct SessionManager {
    config: SessionConfig,
    sessions: RwLock<HashMap<Uuid, Arc<SessionHandle>>>,
    presence: Arc<PresenceTracker>,
    versions: Arc<VersionStore>,
}

impl SessionManager {
    pub fn new(config: SessionConfig, presence: Arc<PresenceTracker>, versions: Arc<VersionStore>) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            presence,
            versions,
        }
    }

    pub fn presence(&self) -> &Arc<PresenceTracker> {
        &self.presence
    }

    pub fn versions(&self) -> &Arc<VersionStore> {
        &self.versions
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    async fn handle(&self, session_id: Uuid) -> Result<Arc<SessionHandle>> {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .cloned()
            .ok_or(CollabError::NotFound(Missing::Session(session_id)))
    }

    // ─── Lifecycle ────────────────────────────────────────────────────

    /// Open a session with the creator as its first online participant.
    pub async fn create_session(&self, request: NewSession) -> Result<Session> {
        let settings = request
            .settings
            .unwrap_or_else(|| self.config.default_settings.clone());
        if request.creator.is_anonymous() && !settings.allow_anonymous {
            return Err(CollabError::PermissionDenied(
                "anonymous users are not allowed in this session".into(),
            ));
        }
        if settings.max_participants == 0 {
            return Err(CollabError::InvalidOperation("max_participants must be at least 1".into()));
        }

        let content = match request.content {
            Some(content) => content,
            None => self
                .versions
                .current_version(request.report_id)
                .await?
                .map(|v| v.content)
                .unwrap_or_default(),
        };

        let now = now_millis();
        let mut creator = request.creator;
        creator.is_online = true;
        creator.last_seen = now;

        let mut session = Session {
            id: Uuid::new_v4(),
            report_id: request.report_id,
            template_id: request.template_id,
            participants: vec![creator.clone()],
            operations: Vec::new(),
            comments: Vec::new(),
            content,
            revision: 0,
            created_at: now,
            last_activity: now,
            state: SessionState::Created,
            settings,
        };
        session.state = SessionState::Active;

        let handle = Arc::new(SessionHandle {
            live: Mutex::new(LiveSession {
                session: session.clone(),
                autosave: AutosaveState::default(),
            }),
            events: EventChannel::new(self.config.event_capacity),
        });
        self.sessions.write().await.insert(session.id, Arc::clone(&handle));
        self.presence.touch(creator.id, session.id);

        handle.events.publish(SessionEvent::SessionCreated {
            session_id: session.id,
            report_id: session.report_id,
            creator: creator.clone(),
        });
        log::info!(
            "session {} opened on report {} by {}",
            session.id,
            session.report_id,
            creator.name
        );
        Ok(session)
    }

    /// Add a participant, or bring a returning one back online.
    pub async fn join_session(&self, session_id: Uuid, user: User) -> Result<Session> {
        let handle = self.handle(session_id).await?;
        let mut live = handle.live.lock().await;
        if live.session.is_closed() {
            return Err(CollabError::NotFound(Missing::Session(session_id)));
        }

        let now = now_millis();
        let joined = match live.session.participant_mut(user.id) {
            // The roster keeps the identity and role granted on first join.
            Some(existing) => {
                existing.is_online = true;
                existing.last_seen = now;
                existing.clone()
            }
            None => {
                let settings = &live.session.settings;
                if user.is_anonymous() && !settings.allow_anonymous {
                    return Err(CollabError::PermissionDenied(
                        "anonymous users are not allowed in this session".into(),
                    ));
                }
                if live.session.participants.len() >= settings.max_participants {
                    return Err(CollabError::CapacityExceeded {
                        session_id,
                        max: settings.max_participants,
                    });
                }
                let mut user = user;
                user.is_online = true;
                user.last_seen = now;
                live.session.participants.push(user.clone());
                user
            }
        };
        live.session.last_activity = now;
        self.presence.touch(joined.id, session_id);

        handle.events.publish(SessionEvent::UserJoined {
            session_id,
            user: joined.clone(),
        });
        log::info!("session {session_id}: {} joined", joined.name);
        Ok(live.session.clone())
    }

    /// Take a participant offline; closes the session when nobody is left.
    pub async fn leave_session(&self, session_id: Uuid, user_id: Uuid) -> Result<LeaveOutcome> {
        let handle = self.handle(session_id).await?;
        let closed = {
            let mut live = handle.live.lock().await;
            if live.session.is_closed() {
                return Err(CollabError::NotFound(Missing::Session(session_id)));
            }
            live.require_participant(user_id)?;

            if let Some(user) = live.session.participant_mut(user_id) {
                user.is_online = false;
                user.last_seen = now_millis();
                user.cursor = None;
            }
            live.session.last_activity = now_millis();
            self.presence.remove(user_id);
            handle.events.publish(SessionEvent::UserLeft { session_id, user_id });

            if live.session.online_count() > 0 {
                false
            } else {
                self.close(&handle, &mut live).await;
                true
            }
        };

        if closed {
            self.sessions.write().await.remove(&session_id);
        }
        Ok(LeaveOutcome { closed })
    }

    /// Flush a pending autosave best-effort and mark the session closed.
    async fn close(&self, handle: &SessionHandle, live: &mut LiveSession) {
        let session_id = live.session.id;
        if live.session.settings.auto_save && live.autosave.needs_flush(live.session.revision) {
            let snapshot = live.snapshot();
            match snapshot.write(&self.versions).await {
                Ok(version) => {
                    live.record_save(&snapshot, &version);
                    handle.events.publish(SessionEvent::AutoSave {
                        session_id,
                        version_id: version.id,
                        version_number: version.version_number,
                        revision: snapshot.revision,
                    });
                }
                Err(e) => log::warn!("session {session_id}: final autosave failed: {e}"),
            }
        }

        live.session.state = SessionState::Closed;
        // Stale timers see the bumped generation and stand down.
        live.autosave.generation += 1;
        handle.events.publish(SessionEvent::SessionClosed {
            session_id,
            report_id: live.session.report_id,
        });
        log::info!(
            "session {session_id} closed at revision {}",
            live.session.revision
        );
    }

    // ─── Editing ──────────────────────────────────────────────────────

    /// Reconcile, apply and log one operation from `operation.author_id`.
    pub async fn apply_operation(&self, session_id: Uuid, operation: Operation) -> Result<Applied> {
        let handle = self.handle(session_id).await?;
        let mut live = handle.live.lock().await;
        if live.session.is_closed() {
            return Err(CollabError::NotFound(Missing::Session(session_id)));
        }

        let author = live.require_participant(operation.author_id)?;
        if !author.role.can_edit() {
            return Err(CollabError::PermissionDenied(format!(
                "{} is a viewer and cannot edit",
                author.name
            )));
        }
        operation.validate()?;

        let reconciled = reconcile(&live.session, &operation)?;
        let content = apply(&live.session.content, &reconciled)?;

        let session = &mut live.session;
        session.content = content;
        session.operations.push(reconciled.clone());
        session.revision += 1;
        for comment in &mut session.comments {
            comment.rebase(&reconciled);
        }
        let revision = session.revision;
        live.touch(reconciled.author_id);
        self.presence.touch(reconciled.author_id, session_id);

        log::debug!(
            "session {session_id}: {} by {} at {} -> revision {revision}",
            reconciled.kind,
            reconciled.author_id,
            reconciled.position
        );
        handle.events.publish(SessionEvent::OperationApplied {
            session_id,
            operation: reconciled.clone(),
            revision,
        });

        if live.session.settings.auto_save {
            live.autosave.generation += 1;
            autosave::schedule(
                Arc::clone(&handle),
                Arc::clone(&self.versions),
                self.config.autosave_debounce,
                live.autosave.generation,
            );
        }

        Ok(Applied {
            operation: reconciled,
            revision,
        })
    }

    // ─── Comments ─────────────────────────────────────────────────────

    /// Add a comment thread; notifies each mentioned participant.
    pub async fn add_comment(&self, session_id: Uuid, comment: Comment) -> Result<Comment> {
        let handle = self.handle(session_id).await?;
        let mut live = handle.live.lock().await;
        if live.session.is_closed() {
            return Err(CollabError::NotFound(Missing::Session(session_id)));
        }
        live.require_participant(comment.author_id)?;

        let mut comment = comment;
        comment.id = Uuid::new_v4();
        comment.timestamp = now_millis();
        comment.position = comment.position.min(char_len(&live.session.content));
        // Threads start open; replies and resolution have their own calls.
        comment.resolved = false;
        comment.resolved_by = None;
        comment.resolved_at = None;
        comment.replies.clear();
        let mut seen = HashSet::new();
        comment.mentions.retain(|id| seen.insert(*id));

        live.session.comments.push(comment.clone());
        live.touch(comment.author_id);

        handle.events.publish(SessionEvent::CommentAdded {
            session_id,
            comment: comment.clone(),
        });
        for mentioned in &comment.mentions {
            if live.session.participant(*mentioned).is_some() {
                handle.events.publish(SessionEvent::UserMentioned {
                    session_id,
                    comment_id: comment.id,
                    user_id: *mentioned,
                    mentioned_by: comment.author_id,
                });
            }
        }
        Ok(comment)
    }

    pub async fn reply_to_comment(&self, session_id: Uuid, comment_id: Uuid, reply: Reply) -> Result<Reply> {
        let handle = self.handle(session_id).await?;
        let mut live = handle.live.lock().await;
        if live.session.is_closed() {
            return Err(CollabError::NotFound(Missing::Session(session_id)));
        }
        live.require_participant(reply.author_id)?;

        let mut reply = reply;
        reply.id = Uuid::new_v4();
        reply.timestamp = now_millis();

        let comment = live
            .session
            .comment_mut(comment_id)
            .ok_or(CollabError::NotFound(Missing::Comment(comment_id)))?;
        comment.replies.push(reply.clone());
        live.touch(reply.author_id);

        handle.events.publish(SessionEvent::CommentReply {
            session_id,
            comment_id,
            reply: reply.clone(),
        });
        Ok(reply)
    }

    /// Resolve a thread. Allowed for its author and for any non-viewer.
    pub async fn resolve_comment(&self, session_id: Uuid, comment_id: Uuid, user_id: Uuid) -> Result<Comment> {
        let handle = self.handle(session_id).await?;
        let mut live = handle.live.lock().await;
        if live.session.is_closed() {
            return Err(CollabError::NotFound(Missing::Session(session_id)));
        }
        let can_edit = live.require_participant(user_id)?.role.can_edit();

        let comment = live
            .session
            .comment_mut(comment_id)
            .ok_or(CollabError::NotFound(Missing::Comment(comment_id)))?;
        if comment.author_id != user_id && !can_edit {
            return Err(CollabError::PermissionDenied(
                "viewers may only resolve their own comments".into(),
            ));
        }
        if comment.resolved {
            return Ok(comment.clone());
        }
        comment.resolve(user_id);
        let resolved = comment.clone();
        live.touch(user_id);

        handle.events.publish(SessionEvent::CommentResolved {
            session_id,
            comment_id,
            resolved_by: user_id,
        });
        Ok(resolved)
    }

    /// Record a cursor move. Fire-and-forget for subscribers.
    pub async fn update_cursor(&self, session_id: Uuid, user_id: Uuid, cursor: Cursor) -> Result<()> {
        let handle = self.handle(session_id).await?;
        let mut live = handle.live.lock().await;
        if live.session.is_closed() {
            return Err(CollabError::NotFound(Missing::Session(session_id)));
        }
        live.require_participant(user_id)?;

        let len = char_len(&live.session.content);
        let mut cursor = cursor;
        cursor.position = cursor.position.min(len);
        cursor.selection_end = cursor.selection_end.map(|end| end.min(len));

        if let Some(user) = live.session.participant_mut(user_id) {
            user.cursor = Some(cursor.clone());
        }
        live.touch(user_id);
        self.presence.touch(user_id, session_id);

        handle.events.publish(SessionEvent::CursorUpdate {
            session_id,
            user_id,
            cursor,
        });
        Ok(())
    }

    // ─── Queries ──────────────────────────────────────────────────────

    /// Snapshot of a live session.
    pub async fn session(&self, session_id: Uuid) -> Result<Session> {
        let handle = self.handle(session_id).await?;
        let live = handle.live.lock().await;
        Ok(live.session.clone())
    }

    pub async fn active_sessions(&self) -> Vec<Session> {
        let handles: Vec<Arc<SessionHandle>> = self.sessions.read().await.values().cloned().collect();
        let mut sessions = Vec::with_capacity(handles.len());
        for handle in handles {
            let live = handle.live.lock().await;
            if !live.session.is_closed() {
                sessions.push(live.session.clone());
            }
        }
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    pub async fn sessions_for_report(&self, report_id: Uuid) -> Vec<Session> {
        self.active_sessions()
            .await
            .into_iter()
            .filter(|s| s.report_id == report_id)
            .collect()
    }

    /// Receive every event the session publishes from now on.
    pub async fn subscribe(&self, session_id: Uuid) -> Result<broadcast::Receiver<Arc<SessionEvent>>> {
        Ok(self.handle(session_id).await?.events.subscribe())
    }
}

/// Rewrite an incoming operation for the current session content.
fn reconcile(session: &Session, incoming: &Operation) -> Result<Operation> {
    match session.settings.conflict_resolution {
        ConflictResolution::OperationalTransform => {
            let base = incoming.base_revision.unwrap_or(session.revision);
            if base > session.revision {
                return Err(CollabError::InvalidOperation(format!(
                    "base revision {base} is ahead of session revision {}",
                    session.revision
                )));
            }
            let unseen = &session.operations[base as usize..];
            Ok(transform_against(incoming, unseen))
        }
        ConflictResolution::LastWriteWins => {
            let len = char_len(&session.content);
            let mut op = incoming.clone();
            op.position = op.position.min(len);
            if let Some(length) = op.length {
                op.length = Some(length.min(len - op.position));
            }
            Ok(op)
        }
        ConflictResolution::Manual => match incoming.base_revision {
            Some(base) if base != session.revision => Err(CollabError::InvalidOperation(format!(
                "stale base revision {base}; session is at {}",
                session.revision
            ))),
            _ => Ok(incoming.clone()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::Role;

    fn manager() -> SessionManager {
        SessionManager::new(
            SessionConfig::for_testing(),
            Arc::new(PresenceTracker::default()),
            Arc::new(VersionStore::in_memory()),
        )
    }

    fn editor(name: &str) -> User {
        User::new(Uuid::new_v4(), name, format!("{name}@example.com"), Role::Editor)
    }

    fn session_with(content: &str, resolution: ConflictResolution) -> Session {
        Session {
            id: Uuid::new_v4(),
            report_id: Uuid::new_v4(),
            template_id: Uuid::nil(),
            participants: Vec::new(),
            operations: Vec::new(),
            comments: Vec::new(),
            content: content.to_string(),
            revision: 0,
            created_at: 0,
            last_activity: 0,
            state: SessionState::Active,
            settings: SessionSettings {
                conflict_resolution: resolution,
                ..SessionSettings::default()
            },
        }
    }

    #[test]
    fn test_reconcile_last_write_wins_clamps() {
        let session = session_with("abc", ConflictResolution::LastWriteWins);
        let op = Operation::delete(Uuid::new_v4(), 2, 10);
        let out = reconcile(&session, &op).unwrap();
        assert_eq!(out.position, 2);
        assert_eq!(out.length, Some(1));

        let far = Operation::insert(Uuid::new_v4(), 99, "x");
        assert_eq!(reconcile(&session, &far).unwrap().position, 3);
    }

    #[test]
    fn test_reconcile_manual_rejects_stale() {
        let mut session = session_with("abc", ConflictResolution::Manual);
        session.operations.push(Operation::insert(Uuid::new_v4(), 0, "z"));
        session.revision = 1;

        let stale = Operation::insert(Uuid::new_v4(), 0, "x").with_base_revision(0);
        assert!(matches!(
            reconcile(&session, &stale),
            Err(CollabError::InvalidOperation(_))
        ));
        let fresh = Operation::insert(Uuid::new_v4(), 0, "x").with_base_revision(1);
        assert!(reconcile(&session, &fresh).is_ok());
    }

    #[test]
    fn test_reconcile_rejects_future_base() {
        let session = session_with("abc", ConflictResolution::OperationalTransform);
        let op = Operation::insert(Uuid::new_v4(), 0, "x").with_base_revision(5);
        assert!(reconcile(&session, &op).is_err());
    }

    #[tokio::test]
    async fn test_create_session_seeds_creator() {
        let manager = manager();
        let alice = editor("alice");
        let session = manager
            .create_session(NewSession::new(Uuid::new_v4(), alice.clone()).with_content("hello"))
            .await
            .unwrap();

        assert_eq!(session.state, SessionState::Active);
        assert_eq!(session.participants.len(), 1);
        assert!(session.participants[0].is_online);
        assert_eq!(session.content, "hello");
        assert_eq!(session.revision, 0);
        assert!(manager.presence().get(alice.id).is_some());
    }

    #[tokio::test]
    async fn test_create_session_from_current_version() {
        let manager = manager();
        let report = Uuid::new_v4();
        let alice = editor("alice");
        manager
            .versions()
            .create_version(report, crate::version::NewVersion::new(alice.id, "saved text"))
            .await
            .unwrap();

        let session = manager.create_session(NewSession::new(report, alice)).await.unwrap();
        assert_eq!(session.content, "saved text");
    }

    #[tokio::test]
    async fn test_anonymous_creator_rejected_by_default() {
        let manager = manager();
        let guest = User::anonymous(Uuid::new_v4(), Role::Editor);
        let err = manager
            .create_session(NewSession::new(Uuid::new_v4(), guest))
            .await
            .unwrap_err();
        assert!(matches!(err, CollabError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_apply_emits_event_and_advances_revision() {
        let manager = manager();
        let alice = editor("alice");
        let session = manager
            .create_session(NewSession::new(Uuid::new_v4(), alice.clone()).with_content("world"))
            .await
            .unwrap();
        let mut rx = manager.subscribe(session.id).await.unwrap();

        let applied = manager
            .apply_operation(session.id, Operation::insert(alice.id, 0, "hello "))
            .await
            .unwrap();
        assert_eq!(applied.revision, 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "operationApplied");
        assert_eq!(manager.session(session.id).await.unwrap().content, "hello world");
    }

    #[tokio::test]
    async fn test_failed_apply_leaves_session_untouched() {
        let manager = manager();
        let alice = editor("alice");
        let session = manager
            .create_session(NewSession::new(Uuid::new_v4(), alice.clone()).with_content("abc"))
            .await
            .unwrap();

        let err = manager
            .apply_operation(session.id, Operation::insert(alice.id, 10, "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, CollabError::InvalidOperation(_)));

        let after = manager.session(session.id).await.unwrap();
        assert_eq!(after.content, "abc");
        assert_eq!(after.revision, 0);
        assert!(after.operations.is_empty());
    }

    #[tokio::test]
    async fn test_comment_anchor_follows_edits() {
        let manager = manager();
        let alice = editor("alice");
        let session = manager
            .create_session(NewSession::new(Uuid::new_v4(), alice.clone()).with_content("hello world"))
            .await
            .unwrap();

        let comment = manager
            .add_comment(session.id, Comment::new(alice.id, "check this", 6))
            .await
            .unwrap();
        manager
            .apply_operation(session.id, Operation::insert(alice.id, 0, ">> "))
            .await
            .unwrap();

        let after = manager.session(session.id).await.unwrap();
        assert_eq!(after.comment(comment.id).unwrap().position, 9);
    }
}
