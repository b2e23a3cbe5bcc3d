//! [`LlmClient`] – completion interface consumed by Autopoiesis, Executive,
//! Legislator, and Planner through `BaseShard::GuardedLLMCall`.

use async_trait::async_trait;

use crate::error::KernelApiError;

/// An LLM completion provider. `complete_with_schema` and
/// `complete_with_tools` are optional; the default implementations report
/// [`KernelApiError::Unsupported`] so a minimal provider only needs to
/// implement `complete_with_system`.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete_with_system(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, KernelApiError>;

    async fn complete_with_schema(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _schema: &str,
    ) -> Result<String, KernelApiError> {
        Err(KernelApiError::Unsupported("complete_with_schema"))
    }

    async fn complete_with_tools(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _tool_names: &[String],
    ) -> Result<String, KernelApiError> {
        Err(KernelApiError::Unsupported("complete_with_tools"))
    }
}
