//! Error types for ackq.

use thiserror::Error;

use crate::model::QueueKind;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid queue name {0:?}: expected [A-Za-z_][A-Za-z0-9_]*, at most 64 bytes, not sqlite_*")]
    InvalidQueueName(String),

    #[error("queue {queue} already exists with a schema that is not a {expected} queue")]
    SchemaMismatch { queue: String, expected: QueueKind },

    #[error("queue is closed")]
    QueueClosed,

    #[error("store is closed")]
    StoreClosed,

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether retrying the same operation may succeed.
    ///
    /// True for lock contention reported by the store (another connection
    /// holds the write lock past the busy timeout).
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Storage(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
