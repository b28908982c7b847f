use ulid::Ulid;

use crate::model::Status;

#[derive(Debug)]
pub enum EngineError {
    /// No reservation with this id exists.
    NotFound(Ulid),
    /// The requested span overlaps an active reservation (the blocking one's id).
    Conflict(Ulid),
    /// Request rejected before touching any partition state.
    InvalidArgument(&'static str),
    /// A status transition the state machine does not allow.
    InvalidTransition { id: Ulid, from: Status },
    LimitExceeded(&'static str),
    /// The write-ahead log can no longer be written. Unretryable: the
    /// engine's durability guarantee no longer holds.
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::Conflict(id) => write!(f, "conflict with reservation: {id}"),
            EngineError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            EngineError::InvalidTransition { id, from } => {
                write!(f, "invalid transition for {id}: reservation is {from}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
