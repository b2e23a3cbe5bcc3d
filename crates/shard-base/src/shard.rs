//! [`BaseShard`] – identity, state machine, cost guarding, autopoiesis
//! bookkeeping, and learning persistence shared by every shard.

use std::sync::Arc;

use chrono::Utc;
use kernel_api::LlmClient;
use shard_memory::LearningStore;
use tokio::sync::{Notify, RwLock};

use crate::autopoiesis::{AutopoiesisLoop, UnhandledCase};
use crate::cost_guard::{CostGuard, CostGuardConfig};
use crate::error::BaseError;
use crate::learning::{LearningTracker, PatternKind};

/// The lifecycle state every shard moves through.
///
/// `Idle -> Running -> Completed`. There is no transition back to `Running`
/// from `Completed` on the same instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardState {
    Idle,
    Running,
    Completed,
}

/// Shared substrate embedded by every concrete shard (Perception, Executive,
/// Constitution, Router, Planner, Legislator, WorldModel).
pub struct BaseShard {
    shard_id: String,
    state: RwLock<ShardState>,
    stop_signal: Notify,
    cost_guard: CostGuard,
    autopoiesis: RwLock<AutopoiesisLoop>,
    learning: RwLock<LearningTracker>,
    llm: RwLock<Option<Arc<dyn LlmClient>>>,
    last_heartbeat: RwLock<Option<chrono::DateTime<Utc>>>,
}

impl BaseShard {
    pub fn new(shard_id: impl Into<String>, cost_guard_config: CostGuardConfig, unhandled_threshold: usize) -> Self {
        let shard_id = shard_id.into();
        BaseShard {
            autopoiesis: RwLock::new(AutopoiesisLoop::new(unhandled_threshold)),
            learning: RwLock::new(LearningTracker::new(shard_id.clone())),
            cost_guard: CostGuard::new(cost_guard_config),
            shard_id,
            state: RwLock::new(ShardState::Idle),
            stop_signal: Notify::new(),
            llm: RwLock::new(None),
            last_heartbeat: RwLock::new(None),
        }
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    pub async fn state(&self) -> ShardState {
        *self.state.read().await
    }

    pub fn cost_guard(&self) -> &CostGuard {
        &self.cost_guard
    }

    pub async fn set_llm_client(&self, client: Arc<dyn LlmClient>) {
        *self.llm.write().await = Some(client);
    }

    pub async fn set_learning_store(&self, store: Arc<dyn LearningStore>) -> Result<(), BaseError> {
        self.learning.write().await.set_learning_store(store).await
    }

    /// `Idle -> Running`. No-op (returns `Ok`) if already running.
    pub async fn start(&self) -> Result<(), BaseError> {
        let mut state = self.state.write().await;
        match *state {
            ShardState::Completed => Err(BaseError::AlreadyCompleted),
            ShardState::Running => Ok(()),
            ShardState::Idle => {
                *state = ShardState::Running;
                Ok(())
            }
        }
    }

    /// `Running -> Completed`, signaling the stop channel. Idempotent: calling
    /// `stop` on an already-`Completed` or still-`Idle` shard is a no-op.
    pub async fn stop(&self) {
        let mut state = self.state.write().await;
        if *state == ShardState::Running {
            *state = ShardState::Completed;
            self.stop_signal.notify_waiters();
        } else if *state == ShardState::Idle {
            *state = ShardState::Completed;
        }
    }

    /// Resolves once [`BaseShard::stop`] has been called. Intended to be
    /// raced against a tick timer in a shard's run loop via `tokio::select!`.
    pub async fn stopped(&self) {
        self.stop_signal.notified().await;
    }

    pub async fn record_heartbeat(&self) {
        *self.last_heartbeat.write().await = Some(Utc::now());
    }

    pub async fn last_heartbeat(&self) -> Option<chrono::DateTime<Utc>> {
        *self.last_heartbeat.read().await
    }

    pub async fn record_unhandled(&self, case: UnhandledCase) {
        self.autopoiesis.write().await.record_unhandled(case);
    }

    pub async fn should_propose(&self) -> bool {
        self.autopoiesis.read().await.should_propose()
    }

    pub async fn drain_unhandled_cases(&self) -> Vec<UnhandledCase> {
        self.autopoiesis.write().await.get_unhandled_cases()
    }

    pub async fn record_learning(&self, kind: PatternKind, key: &str, source: &str) -> Result<(), BaseError> {
        self.learning.write().await.record(kind, key, source).await
    }

    /// Checks the cost guard, forwards to the configured LLM client, and
    /// records the call outcome. Fails with [`BaseError::NoClient`] if no
    /// [`LlmClient`] has been attached via [`BaseShard::set_llm_client`].
    pub async fn guarded_llm_call(&self, system_prompt: &str, user_prompt: &str) -> Result<String, BaseError> {
        let (ok, reason) = self.cost_guard.can_call().await;
        if !ok {
            return Err(BaseError::Guarded(reason));
        }
        let client = self.llm.read().await.clone().ok_or(BaseError::NoClient)?;
        match client.complete_with_system(system_prompt, user_prompt).await {
            Ok(reply) => {
                self.cost_guard.record_call().await;
                Ok(reply)
            }
            Err(e) => {
                self.cost_guard.record_error().await;
                Err(BaseError::Kernel(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kernel_api::KernelApiError;

    struct EchoClient;

    #[async_trait]
    impl LlmClient for EchoClient {
        async fn complete_with_system(&self, _system: &str, user: &str) -> Result<String, KernelApiError> {
            Ok(format!("echo: {user}"))
        }
    }

    struct FailingClient;

    #[async_trait]
    impl LlmClient for FailingClient {
        async fn complete_with_system(&self, _system: &str, _user: &str) -> Result<String, KernelApiError> {
            Err(KernelApiError::Unavailable("down".to_string()))
        }
    }

    #[tokio::test]
    async fn start_transitions_idle_to_running() {
        let shard = BaseShard::new("s1", CostGuardConfig::default(), 3);
        assert_eq!(shard.state().await, ShardState::Idle);
        shard.start().await.unwrap();
        assert_eq!(shard.state().await, ShardState::Running);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let shard = BaseShard::new("s1", CostGuardConfig::default(), 3);
        shard.start().await.unwrap();
        shard.stop().await;
        shard.stop().await;
        assert_eq!(shard.state().await, ShardState::Completed);
    }

    #[tokio::test]
    async fn start_after_completed_is_rejected() {
        let shard = BaseShard::new("s1", CostGuardConfig::default(), 3);
        shard.stop().await;
        let err = shard.start().await.unwrap_err();
        assert!(matches!(err, BaseError::AlreadyCompleted));
    }

    #[tokio::test]
    async fn guarded_llm_call_without_client_fails() {
        let shard = BaseShard::new("s1", CostGuardConfig::default(), 3);
        let err = shard.guarded_llm_call("sys", "hi").await.unwrap_err();
        assert!(matches!(err, BaseError::NoClient));
    }

    #[tokio::test]
    async fn guarded_llm_call_succeeds_and_records() {
        let shard = BaseShard::new("s1", CostGuardConfig::default(), 3);
        shard.set_llm_client(Arc::new(EchoClient)).await;
        let reply = shard.guarded_llm_call("sys", "hi").await.unwrap();
        assert_eq!(reply, "echo: hi");
    }

    #[tokio::test]
    async fn guarded_llm_call_records_error_and_backs_off() {
        let shard = BaseShard::new("s1", CostGuardConfig::default(), 3);
        shard.set_llm_client(Arc::new(FailingClient)).await;
        assert!(shard.guarded_llm_call("sys", "hi").await.is_err());
        let err = shard.guarded_llm_call("sys", "hi").await.unwrap_err();
        assert!(matches!(err, BaseError::Guarded(_)));
    }
}
