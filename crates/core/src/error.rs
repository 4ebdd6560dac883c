//! Typed error enums at each component boundary, per `roomsync-core`'s error design:
//! one `thiserror` enum per boundary, each with an `Internal` variant that never
//! crosses the wire and is reported to clients as `ErrorKind::InternalError`.

use roomsync_protocol::ErrorKind;

/// Failures of [`crate::room::connect`], one-to-one with the wire [`ErrorKind`]s a
/// rejected connect can surface, plus an internal catch-all.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("malformed connect request: {0}")]
    InvalidMessage(String),
    #[error("room {0} not found")]
    RoomNotFound(String),
    #[error("room {0} is closed")]
    RoomClosed(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("baseCookie {requested:?} is not admissible for current version {current:?}")]
    UnexpectedBaseCookie { requested: Option<u64>, current: Option<u64> },
    #[error("lmid {requested} exceeds stored lastMutationID {stored}")]
    UnexpectedLmid { requested: u64, stored: u64 },
    #[error("internal error: {0}")]
    Internal(#[from] StorageError),
}

impl ConnectError {
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            ConnectError::InvalidMessage(_) => ErrorKind::InvalidMessage,
            ConnectError::RoomNotFound(_) => ErrorKind::RoomNotFound,
            ConnectError::RoomClosed(_) => ErrorKind::RoomClosed,
            ConnectError::Unauthorized => ErrorKind::Unauthorized,
            ConnectError::UnexpectedBaseCookie { .. } => ErrorKind::UnexpectedBaseCookie,
            ConnectError::UnexpectedLmid { .. } => ErrorKind::UnexpectedLMID,
            ConnectError::Internal(_) => ErrorKind::InternalError,
        }
    }
}

/// Failures while handling an already-connected client's frames.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("malformed frame: {0}")]
    InvalidMessage(#[from] roomsync_protocol::frame::FrameError),
    #[error("internal error: {0}")]
    Internal(#[from] StorageError),
}

impl MessageError {
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            MessageError::InvalidMessage(_) => ErrorKind::InvalidMessage,
            MessageError::Internal(_) => ErrorKind::InternalError,
        }
    }
}

/// Failures of `AuthFront::dispatch` (C12), surfaced either as an HTTP status code
/// (admin endpoints) or as an `error` frame followed by socket close (connect).
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("malformed connect request: {0}")]
    InvalidMessage(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("room {0} not found")]
    RoomNotFound(String),
    #[error("room {0} is closed")]
    RoomClosed(String),
    #[error("room {0} is deleted")]
    RoomDeleted(String),
    #[error("internal error: {0}")]
    Internal(#[from] StorageError),
}

impl DispatchError {
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            DispatchError::InvalidMessage(_) => ErrorKind::InvalidMessage,
            DispatchError::Unauthorized => ErrorKind::Unauthorized,
            DispatchError::RoomNotFound(_) => ErrorKind::RoomNotFound,
            DispatchError::RoomClosed(_) | DispatchError::RoomDeleted(_) => ErrorKind::RoomClosed,
            DispatchError::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// HTTP status for the admin surface's non-websocket failure responses.
    pub fn http_status(&self) -> http::StatusCode {
        match self {
            DispatchError::InvalidMessage(_) => http::StatusCode::BAD_REQUEST,
            DispatchError::Unauthorized => http::StatusCode::UNAUTHORIZED,
            DispatchError::RoomNotFound(_) => http::StatusCode::NOT_FOUND,
            DispatchError::RoomDeleted(_) => http::StatusCode::GONE,
            DispatchError::RoomClosed(_) => http::StatusCode::BAD_REQUEST,
            DispatchError::Internal(_) => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Wraps the underlying `sled::Error`. The only error type that participates in
/// the TurnLoop's backoff-and-retry path (storage commit failures roll back the
/// whole turn and are retried, never surfaced to clients as a turn outcome).
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(#[from] sled::Error),
    #[error("corrupt value at key {key}: {source}")]
    Corrupt { key: String, source: serde_json::Error },
}

/// A mutator panicked or returned an application-level error. This rolls back
/// the mutator's staged writes locally but still advances `lastMutationID` —
/// idempotency is preserved, the client just sees no visible state change for
/// that mutation.
#[derive(Debug, thiserror::Error)]
pub enum MutatorError {
    #[error("{0}")]
    Rejected(String),
}

/// The room has begun shutting down and rejects new TurnLock waiters.
#[derive(Debug, thiserror::Error)]
#[error("room is shutting down")]
pub struct TurnLockClosed;
