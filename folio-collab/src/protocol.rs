//! Binary WebSocket protocol between editors and the collaboration server.
//!
//! Every frame is one bincode-encoded message:
//! ```text
//! client ── ClientFrame { request_id, ClientMessage } ──────────► server
//! client ◄── ServerMessage::{Joined | Ack | Error | Pong}{request_id} ── server
//! client ◄── ServerMessage::Event(SessionEvent) ─────────────── server (push)
//! ```
//!
//! A connection creates or joins exactly one session; every later request
//! acts on that session as the joined user.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use folio_core::{Comment, Cursor, Operation, Reply, User};

use crate::error::CollabError;
use crate::events::SessionEvent;
use crate::session::{Session, SessionSettings};

/// Client request with a correlation id echoed in the reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientFrame {
    pub request_id: u64,
    pub message: ClientMessage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    CreateSession {
        report_id: Uuid,
        template_id: Uuid,
        user: User,
        content: Option<String>,
        settings: Option<SessionSettings>,
    },
    JoinSession {
        session_id: Uuid,
        user: User,
    },
    LeaveSession,
    ApplyOperation {
        operation: Operation,
    },
    AddComment {
        comment: Comment,
    },
    ReplyToComment {
        comment_id: Uuid,
        reply: Reply,
    },
    ResolveComment {
        comment_id: Uuid,
    },
    UpdateCursor {
        cursor: Cursor,
    },
    Ping,
}

impl ClientMessage {
    /// Requests that need a joined session.
    pub fn requires_session(&self) -> bool {
        !matches!(
            self,
            ClientMessage::CreateSession { .. } | ClientMessage::JoinSession { .. } | ClientMessage::Ping
        )
    }
}

/// Error category carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    PermissionDenied,
    CapacityExceeded,
    NotFound,
    InvalidOperation,
    PersistenceUnavailable,
    /// Malformed frame or request out of sequence
    Protocol,
}

impl From<&CollabError> for ErrorKind {
    fn from(e: &CollabError) -> Self {
        match e {
            CollabError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            CollabError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            CollabError::NotFound(_) => ErrorKind::NotFound,
            CollabError::InvalidOperation(_) => ErrorKind::InvalidOperation,
            CollabError::PersistenceUnavailable(_) => ErrorKind::PersistenceUnavailable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Reply to create/join: the session as of joining
    Joined { request_id: u64, session: Session },
    /// Request succeeded; `revision` is set for applied operations
    Ack { request_id: u64, revision: Option<u64> },
    Error {
        request_id: u64,
        kind: ErrorKind,
        message: String,
    },
    /// Pushed session event
    Event(SessionEvent),
    Pong { request_id: u64 },
}

impl ServerMessage {
    pub fn error(request_id: u64, e: &CollabError) -> Self {
        ServerMessage::Error {
            request_id,
            kind: e.into(),
            message: e.to_string(),
        }
    }

    pub fn protocol_error(request_id: u64, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            request_id,
            kind: ErrorKind::Protocol,
            message: message.into(),
        }
    }
}

/// Serialize to binary wire format.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serde::encode_to_vec(message, bincode::config::standard())
        .map_err(|e| ProtocolError::SerializationError(e.to_string()))
}

/// Deserialize from binary wire format.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let (message, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
    Ok(message)
}

impl ClientFrame {
    pub fn new(request_id: u64, message: ClientMessage) -> Self {
        Self { request_id, message }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }
}

impl ServerMessage {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}
