use thiserror::Error;

/// Errors shared by every SQLite-backed store in this crate.
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("blocking task panicked: {0}")]
    TaskPanic(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("agenda item not found: {0}")]
    NotFound(String),
    #[error("agenda item is already claimed")]
    AlreadyClaimed,
    #[error("agenda item is not claimed by {0}")]
    NotClaimedBy(String),
    #[error("agenda item already completed")]
    AlreadyCompleted,
}
