use kernel_api::KernelApiError;
use shard_base::BaseError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Kernel(#[from] KernelApiError),
    #[error(transparent)]
    Base(#[from] BaseError),
    #[error(transparent)]
    Memory(#[from] shard_memory::MemoryError),
    #[error("appeal for action {0} already pending")]
    DuplicateAppeal(String),
    #[error("no security violation recorded for action {0}")]
    NoSuchViolation(String),
    #[error("walkdir error: {0}")]
    Walk(String),
}
