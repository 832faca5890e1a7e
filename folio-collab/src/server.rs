//! WebSocket collaboration server.
//!
//! Architecture:
//! ```text
//! Client A ──┐                       ┌── VersionStore ── VersionRepository
//!             ├── SessionManager ────┤                    (memory | RocksDB)
//! Client B ──┘        │              └── PresenceTracker
//!                     │
//!                     └── per-session EventChannel
//!                              │
//!                   ┌──────────┼───────────┐
//!                   ▼          ▼           ▼
//!                Client A   Client B    Client C
//! ```
//!
//! Each connection runs one task that multiplexes inbound frames and the
//! session's event stream with `tokio::select!`. Dropping the connection
//! leaves the session, which closes it when the last participant goes.
//!
//! Reference: Kleppmann, Designing Data-Intensive Applications, Chapter 8

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::events::SessionEvent;
use crate::presence::{PresenceConfig, PresenceTracker};
use crate::protocol::{ClientFrame, ClientMessage, ServerMessage};
use crate::session::{NewSession, SessionConfig, SessionManager};
use crate::storage::{MemoryRepository, RocksRepository, StoreConfig, StoreError, VersionRepository};
use crate::version::VersionStore;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// RocksDB directory (None = in-memory history)
    pub storage_path: Option<PathBuf>,
    pub session: SessionConfig,
    pub presence: PresenceConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            storage_path: None,
            session: SessionConfig::default(),
            presence: PresenceConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Ephemeral port, in-memory storage, short timers.
    pub fn for_testing() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            storage_path: None,
            session: SessionConfig::for_testing(),
            presence: PresenceConfig::for_testing(),
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub rejected_frames: u64,
}

type ConnectionResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// The collaboration server.
pub struct CollabServer {
    config: ServerConfig,
    manager: Arc<SessionManager>,
    stats: Arc<RwLock<ServerStats>>,
}

impl CollabServer {
    /// Build the server, opening RocksDB when a storage path is configured.
    pub fn new(config: ServerConfig) -> Result<Self, StoreError> {
        let repository: Arc<dyn VersionRepository> = match &config.storage_path {
            Some(path) => Arc::new(RocksRepository::open(StoreConfig {
                path: path.clone(),
                ..StoreConfig::default()
            })?),
            None => Arc::new(MemoryRepository::new()),
        };
        let versions = Arc::new(VersionStore::new(repository));
        let presence = Arc::new(PresenceTracker::new(config.presence.clone()));
        let manager = Arc::new(SessionManager::new(config.session.clone(), presence, versions));

        Ok(Self {
            config,
            manager,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        })
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Bind the configured address and serve forever.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Collaboration server listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error>> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let manager = Arc::clone(&self.manager);
            let stats = Arc::clone(&self.stats);
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, manager, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        manager: Arc<SessionManager>,
        stats: Arc<RwLock<ServerStats>>,
    ) -> ConnectionResult {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        log::info!("WebSocket connection established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let mut conn = Connection::default();
        let result: ConnectionResult = async {
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Binary(data))) => {
                                {
                                    let mut s = stats.write().await;
                                    s.total_messages += 1;
                                    s.total_bytes += data.len() as u64;
                                }
                                let reply = match ClientFrame::decode(&data) {
                                    Ok(frame) => conn.handle(&manager, frame).await,
                                    Err(e) => {
                                        log::warn!("Failed to decode frame from {addr}: {e}");
                                        stats.write().await.rejected_frames += 1;
                                        ServerMessage::protocol_error(0, e.to_string())
                                    }
                                };
                                ws_sender.send(Message::Binary(reply.encode()?.into())).await?;
                            }
                            Some(Ok(Message::Ping(data))) => {
                                ws_sender.send(Message::Pong(data)).await?;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                log::info!("Connection closed from {addr}");
                                break;
                            }
                            Some(Err(e)) => {
                                log::error!("WebSocket error from {addr}: {e}");
                                break;
                            }
                            _ => {}
                        }
                    }

                    event = async {
                        match conn.events.as_mut() {
                            Some(rx) => rx.recv().await,
                            // Nothing to forward until the connection joins
                            None => std::future::pending().await,
                        }
                    } => {
                        match event {
                            Ok(event) => {
                                if conn.is_own_cursor(&event) {
                                    continue;
                                }
                                let message = ServerMessage::Event((*event).clone());
                                ws_sender.send(Message::Binary(message.encode()?.into())).await?;
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                log::warn!("Connection {addr} lagged by {n} events");
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                conn.events = None;
                            }
                        }
                    }
                }
            }
            Ok(())
        }
        .await;

        conn.disconnect(&manager).await;
        {
            let mut s = stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
        }
        result
    }
}

/// Per-connection state: at most one joined session.
#[derive(Default)]
struct Connection {
    user_id: Option<Uuid>,
    session_id: Option<Uuid>,
    events: Option<broadcast::Receiver<Arc<SessionEvent>>>,
}

impl Connection {
    async fn handle(&mut self, manager: &SessionManager, frame: ClientFrame) -> ServerMessage {
        let request_id = frame.request_id;
        let message = frame.message;

        let joined = match (self.session_id, self.user_id) {
            (Some(session_id), Some(user_id)) => Some((session_id, user_id)),
            _ => None,
        };
        if message.requires_session() && joined.is_none() {
            return ServerMessage::protocol_error(request_id, "join a session first");
        }
        if !message.requires_session() && joined.is_some() && message != ClientMessage::Ping {
            return ServerMessage::protocol_error(request_id, "already in a session");
        }

        let result = match (message, joined) {
            (ClientMessage::Ping, _) => return ServerMessage::Pong { request_id },

            (
                ClientMessage::CreateSession {
                    report_id,
                    template_id,
                    user,
                    content,
                    settings,
                },
                _,
            ) => {
                let user_id = user.id;
                let request = NewSession {
                    report_id,
                    template_id,
                    creator: user,
                    content,
                    settings,
                };
                match manager.create_session(request).await {
                    Ok(session) => match manager.subscribe(session.id).await {
                        Ok(rx) => {
                            self.attach(session.id, user_id, rx);
                            return ServerMessage::Joined { request_id, session };
                        }
                        Err(e) => Err(e),
                    },
                    Err(e) => Err(e),
                }
            }

            (ClientMessage::JoinSession { session_id, user }, _) => {
                let user_id = user.id;
                // Subscribe first so no event between snapshot and stream is lost.
                let rx = match manager.subscribe(session_id).await {
                    Ok(rx) => rx,
                    Err(e) => return ServerMessage::error(request_id, &e),
                };
                match manager.join_session(session_id, user).await {
                    Ok(session) => {
                        self.attach(session_id, user_id, rx);
                        return ServerMessage::Joined { request_id, session };
                    }
                    Err(e) => Err(e),
                }
            }

            (ClientMessage::LeaveSession, Some((session_id, user_id))) => {
                let result = manager.leave_session(session_id, user_id).await.map(|_| None);
                self.detach();
                result
            }

            (ClientMessage::ApplyOperation { mut operation }, Some((session_id, user_id))) => {
                operation.author_id = user_id;
                manager
                    .apply_operation(session_id, operation)
                    .await
                    .map(|applied| Some(applied.revision))
            }

            (ClientMessage::AddComment { mut comment }, Some((session_id, user_id))) => {
                comment.author_id = user_id;
                manager.add_comment(session_id, comment).await.map(|_| None)
            }

            (ClientMessage::ReplyToComment { comment_id, mut reply }, Some((session_id, user_id))) => {
                reply.author_id = user_id;
                manager
                    .reply_to_comment(session_id, comment_id, reply)
                    .await
                    .map(|_| None)
            }

            (ClientMessage::ResolveComment { comment_id }, Some((session_id, user_id))) => manager
                .resolve_comment(session_id, comment_id, user_id)
                .await
                .map(|_| None),

            (ClientMessage::UpdateCursor { cursor }, Some((session_id, user_id))) => manager
                .update_cursor(session_id, user_id, cursor)
                .await
                .map(|_| None),

            (_, None) => return ServerMessage::protocol_error(request_id, "join a session first"),
        };

        match result {
            Ok(revision) => ServerMessage::Ack { request_id, revision },
            Err(e) => {
                log::debug!("request {request_id} rejected: {e}");
                ServerMessage::error(request_id, &e)
            }
        }
    }

    fn attach(&mut self, session_id: Uuid, user_id: Uuid, rx: broadcast::Receiver<Arc<SessionEvent>>) {
        self.session_id = Some(session_id);
        self.user_id = Some(user_id);
        self.events = Some(rx);
    }

    fn detach(&mut self) {
        self.session_id = None;
        self.user_id = None;
        self.events = None;
    }

    /// Cursor echoes are not sent back to their author.
    fn is_own_cursor(&self, event: &SessionEvent) -> bool {
        matches!(event, SessionEvent::CursorUpdate { user_id, .. } if Some(*user_id) == self.user_id)
    }

    async fn disconnect(&mut self, manager: &SessionManager) {
        if let (Some(session_id), Some(user_id)) = (self.session_id, self.user_id) {
            match manager.leave_session(session_id, user_id).await {
                Ok(outcome) if outcome.closed => log::info!("Session {session_id} closed on disconnect"),
                Ok(_) => {}
                Err(e) => log::debug!("Leave on disconnect for session {session_id}: {e}"),
            }
        }
        self.detach();
    }
}
