//! Error type shared by every external-collaborator trait in this crate.

use thiserror::Error;

/// Failure modes a collaborator call can report. None of these are fatal to
/// the calling shard — callers log and continue the next tick.
#[derive(Error, Debug, Clone)]
pub enum KernelApiError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("operation not supported by this collaborator: {0}")]
    Unsupported(&'static str),

    #[error("collaborator call timed out")]
    Timeout,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("budget exhausted")]
    BudgetExhausted,

    #[error("validation failed: {0}")]
    ValidationFailed(String),
}
