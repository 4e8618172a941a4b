//! Domain error types.

use thiserror::Error;

/// Validation failure for a value object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("{kind} must be at most {max} characters")]
    TooLong { kind: &'static str, max: usize },
    #[error("invalid peer state: {0}")]
    InvalidPeerState(String),
}

/// Outcome of a non-blocking enqueue onto a connection's outbound queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("client '{0}' is not connected")]
    NotFound(String),
    #[error("outbound queue of client '{0}' is full")]
    QueueFull(String),
    #[error("outbound queue of client '{0}' is closed")]
    Closed(String),
}

/// Failure talking to the signaling hub.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    #[error("signaling hub is not running")]
    Stopped,
    #[error(transparent)]
    Send(#[from] SendError),
}

/// Failure of a peer-state store operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerStoreError {
    #[error("peer '{peer_id}' not found in meeting '{meeting_id}'")]
    PeerNotFound { meeting_id: String, peer_id: String },
    #[error("room for meeting '{0}' not found")]
    RoomNotFound(String),
    #[error("room for meeting '{meeting_id}' has reached its capacity of {max} peers")]
    RoomFull { meeting_id: String, max: usize },
    #[error("peer store unavailable: {0}")]
    Unavailable(String),
    #[error("peer store backend error: {0}")]
    Backend(String),
    /// Another writer holds the database lock; the backend itself is healthy.
    #[error("peer store busy: {0}")]
    Busy(String),
}

impl PeerStoreError {
    /// Whether the error comes from the storage backend itself rather than
    /// from the requested operation.
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Backend(_))
    }

    /// Whether the same operation may succeed if tried again shortly.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy(_))
    }
}

/// Failure of an external persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("persistence backend unavailable: {0}")]
    Unavailable(String),
    #[error("persistence write failed: {0}")]
    WriteFailed(String),
}
