//! [`VirtualStore`] – the synchronous tool executor the Router prefers when
//! attached, and the world-model ingestion sink WorldModel writes through.

use async_trait::async_trait;
use shard_types::{ActionId, Fact};

use crate::error::KernelApiError;

/// Maps a `next_action`-shaped fact to an actual tool invocation.
#[async_trait]
pub trait VirtualStore: Send + Sync {
    /// Execute `action_id`/`action_type`/`target` with `payload`, returning
    /// the tool's raw string output (or an error the Router records as
    /// `routing_result(ActionID, /failure, ..)`).
    async fn route_action(
        &self,
        action_id: &ActionId,
        action_type: &str,
        target: &str,
        payload: &Fact,
    ) -> Result<String, KernelApiError>;

    /// Persist WorldModel-discovered facts to durable knowledge storage.
    async fn persist_facts_to_knowledge(&self, facts: &[Fact]) -> Result<(), KernelApiError>;

    /// Persist a single dependency/topology link discovered by WorldModel.
    async fn persist_link(&self, from: &str, to: &str, kind: &str) -> Result<(), KernelApiError>;
}
