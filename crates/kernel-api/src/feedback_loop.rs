//! [`FeedbackLoop`] – the validated rule-generation pipeline Autopoiesis,
//! Executive, Router, and Legislator all share.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::KernelApiError;
use crate::llm_client::LlmClient;

/// Result of generating (or validating) a candidate deductive rule.
#[derive(Debug, Clone)]
pub struct RuleGenerationResult {
    pub rule: String,
    pub valid: bool,
    pub errors: Vec<String>,
    pub attempts: u32,
    pub auto_fixed: bool,
    pub sanitized: bool,
    /// Confidence in `[0.0, 1.0]`. Rules at or above the shard's
    /// `RuleConfidence` threshold (default 0.8) auto-apply; others become
    /// `rule_proposal_pending`.
    pub confidence: f64,
}

/// External syntax/safety/schema sandbox a `FeedbackLoop` runs a candidate
/// rule through. Distinct from `RuleCourt`, which ratifies a rule that has
/// already passed this check.
#[async_trait]
pub trait RuleValidator: Send + Sync {
    /// Returns the list of validation errors, empty if the rule passes.
    async fn validate(&self, rule: &str) -> Result<Vec<String>, KernelApiError>;
}

/// Narrows which predicates a generated rule may reference, drawn from the
/// Kernel's predicate corpus. `true` means the predicate is in bounds.
pub type PredicateSelector = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Generates and validates candidate rules against a sandbox (syntax,
/// safety, schema, stratification) with bounded auto-repair.
#[async_trait]
pub trait FeedbackLoop: Send + Sync {
    async fn generate_and_validate(
        &self,
        llm: &dyn LlmClient,
        validator: &dyn RuleValidator,
        system_prompt: &str,
        user_prompt: &str,
        domain: &str,
    ) -> Result<RuleGenerationResult, KernelApiError>;

    /// Validate an already-authored rule (used by the Legislator when the
    /// directive text already looks like a rule) without invoking the LLM.
    async fn validate_only(&self, rule: &str, validator: &dyn RuleValidator) -> Result<RuleGenerationResult, KernelApiError>;

    fn is_budget_exhausted(&self) -> bool;

    fn reset_budget(&self);

    /// Whether `prompt` may be retried, and if not, why.
    fn can_retry_prompt(&self, prompt: &str) -> (bool, String);

    /// Restricts subsequent generation to predicates `selector` accepts.
    fn set_predicate_selector(&self, selector: PredicateSelector);
}
