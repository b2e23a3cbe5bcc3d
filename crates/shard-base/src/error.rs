use thiserror::Error;

#[derive(Error, Debug)]
pub enum BaseError {
    #[error("no LLM client configured")]
    NoClient,

    #[error("cost guard rejected call: {0}")]
    Guarded(String),

    #[error("shard is already completed")]
    AlreadyCompleted,

    #[error(transparent)]
    Kernel(#[from] kernel_api::KernelApiError),

    #[error(transparent)]
    Memory(#[from] shard_memory::MemoryError),
}
