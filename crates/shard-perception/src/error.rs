use kernel_api::KernelApiError;
use shard_base::BaseError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PerceptionError {
    #[error("perception input queue is full")]
    QueueFull,
    #[error(transparent)]
    Kernel(#[from] KernelApiError),
    #[error(transparent)]
    Base(#[from] BaseError),
}
