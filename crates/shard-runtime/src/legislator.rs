//! [`Legislator`] – turns an NL constraint or a hand-authored rule into a
//! hot-loaded deductive rule, gated by sandbox ratification.
//!
//! A staged pipeline where each stage either advances or returns a terminal
//! verdict: propose, validate, stratify, ratify, hot-load.

use std::sync::{Arc, LazyLock};

use regex::Regex;

use kernel_api::{FeedbackLoop, Kernel, KernelTx, LlmClient, RuleCourt, RuleGenerationResult, RuleValidator};
use shard_base::{BaseShard, CostGuardConfig, PatternKind};
use shard_types::{Fact, FactValue};

use crate::error::RuntimeError;

const DEFAULT_UNHANDLED_THRESHOLD: usize = 3;

static RULE_HEAD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-zA-Z0-9_]*\([^)]*\)\s*(:-|\.)").expect("static rule-head regex is valid"));

static NEGATED_SELF_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!\s*([a-z][a-zA-Z0-9_]*)\(").expect("static negation-call regex is valid")
});

/// Already rule-shaped text starts with `Decl ` or matches a
/// `head(...) :- ...` / `head(...).` pattern.
pub fn looks_like_mangle_rule(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.starts_with("Decl ") || RULE_HEAD_PATTERN.is_match(trimmed)
}

/// Stratification pre-check: reject a rule whose head predicate appears
/// negated in its own body (`bad(X) :- !bad(X)`).
pub fn passes_stratification(rule: &str) -> bool {
    let Some(head_name) = rule.split('(').next().map(str::trim) else {
        return true;
    };
    if head_name.is_empty() {
        return true;
    }
    !NEGATED_SELF_CALL
        .captures_iter(rule)
        .any(|cap| cap.get(1).map(|m| m.as_str() == head_name).unwrap_or(false))
}

/// Extracts the human-visible surface payload from a Piggyback Protocol
/// envelope, discarding the structured control packet unless its fields are
/// independently validated by the caller. Envelopes are delimited by a
/// `---CONTROL---` marker; text with no marker is returned as-is.
pub fn extract_piggyback_surface(response: &str) -> &str {
    response.split_once("---CONTROL---").map(|(surface, _)| surface.trim()).unwrap_or(response.trim())
}

#[derive(Debug, Clone)]
pub enum LegislatorOutcome {
    HotLoaded { rule: String },
    Rejected { reason: String },
}

pub struct Legislator {
    base: BaseShard,
    kernel: Arc<dyn Kernel>,
    rule_court: Arc<dyn RuleCourt>,
}

impl Legislator {
    pub fn new(shard_id: impl Into<String>, kernel: Arc<dyn Kernel>, rule_court: Arc<dyn RuleCourt>) -> Self {
        Legislator {
            base: BaseShard::new(shard_id, CostGuardConfig::default(), DEFAULT_UNHANDLED_THRESHOLD),
            kernel,
            rule_court,
        }
    }

    pub fn base(&self) -> &BaseShard {
        &self.base
    }

    /// Process one directive: either an already-rule-shaped text or an NL
    /// constraint to synthesize via the feedback loop.
    pub async fn process_directive(
        &self,
        directive: &str,
        llm: &dyn LlmClient,
        feedback: &dyn FeedbackLoop,
        validator: &dyn RuleValidator,
    ) -> Result<LegislatorOutcome, RuntimeError> {
        let result = if looks_like_mangle_rule(directive) {
            feedback.validate_only(directive, validator).await?
        } else {
            let (allowed, reason) = self.base.cost_guard().can_call().await;
            if !allowed {
                return Ok(LegislatorOutcome::Rejected { reason });
            }
            let system_prompt = "Translate the operator's natural-language constraint into a single \
                 Mangle deductive rule. Reply with the rule alone, optionally followed by \
                 `---CONTROL---` and a structured control packet.";
            let raw = feedback.generate_and_validate(llm, validator, system_prompt, directive, "legislator").await?;
            self.base.cost_guard().record_call().await;
            RuleGenerationResult { rule: extract_piggyback_surface(&raw.rule).to_string(), ..raw }
        };

        self.finish(result).await
    }

    async fn finish(&self, result: RuleGenerationResult) -> Result<LegislatorOutcome, RuntimeError> {
        if !result.valid {
            return Ok(self.reject(&result.rule, "rule failed feedback-loop validation").await);
        }
        if !passes_stratification(&result.rule) {
            return Ok(self.reject(&result.rule, "rule head predicate is negated in its own body").await);
        }
        let ratified = self.rule_court.ratify(&result.rule).await?;
        if !ratified {
            return Ok(self.reject(&result.rule, "rule court declined to ratify").await);
        }
        let schema_errors = self.kernel.validate_learned_rules(&[result.rule.clone()]).await?;
        if !schema_errors.is_empty() {
            return Ok(self.reject(&result.rule, &schema_errors.join("; ")).await);
        }

        self.kernel.hot_load_learned_rule(&result.rule).await?;
        self.base.record_learning(PatternKind::Success, "legislator_rule", &result.rule).await.ok();
        let mut tx = KernelTx::new();
        tx.assert(Fact::new("rule_hot_loaded", vec![FactValue::str(&result.rule)]));
        tx.commit(self.kernel.as_ref()).await?;
        Ok(LegislatorOutcome::HotLoaded { rule: result.rule })
    }

    async fn reject(&self, rule: &str, reason: &str) -> LegislatorOutcome {
        let _ = self
            .kernel
            .assert(Fact::new(
                "rule_rejected",
                vec![FactValue::str(rule), FactValue::str(reason)],
            ))
            .await;
        LegislatorOutcome::Rejected { reason: reason.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kernel_api::mock::{InMemoryKernel, PermissiveRuleValidator};
    use kernel_api::KernelApiError;

    #[test]
    fn recognizes_decl_prefixed_text_as_a_rule() {
        assert!(looks_like_mangle_rule("Decl foo(X) : int."));
    }

    #[test]
    fn recognizes_head_predicate_rule_shape() {
        assert!(looks_like_mangle_rule("safe_path(X) :- path(X), not blocked(X)."));
    }

    #[test]
    fn plain_nl_constraint_is_not_rule_shaped() {
        assert!(!looks_like_mangle_rule("never allow writes to /etc"));
    }

    #[test]
    fn self_negating_head_fails_stratification() {
        assert!(!passes_stratification("bad(X) :- !bad(X)."));
    }

    #[test]
    fn non_self_negating_rule_passes_stratification() {
        assert!(passes_stratification("safe(X) :- path(X), !blocked(X)."));
    }

    #[test]
    fn piggyback_envelope_strips_control_packet() {
        let raw = "safe(X) :- path(X).\n---CONTROL---\n{\"confidence\":0.9}";
        assert_eq!(extract_piggyback_surface(raw), "safe(X) :- path(X).");
    }

    struct StubFeedback { result: RuleGenerationResult }

    #[async_trait]
    impl FeedbackLoop for StubFeedback {
        async fn generate_and_validate(
            &self,
            _llm: &dyn LlmClient,
            _validator: &dyn RuleValidator,
            _system_prompt: &str,
            _user_prompt: &str,
            _domain: &str,
        ) -> Result<RuleGenerationResult, KernelApiError> {
            Ok(self.result.clone())
        }

        async fn validate_only(&self, _rule: &str, _validator: &dyn RuleValidator) -> Result<RuleGenerationResult, KernelApiError> {
            Ok(self.result.clone())
        }

        fn is_budget_exhausted(&self) -> bool {
            false
        }

        fn reset_budget(&self) {}

        fn can_retry_prompt(&self, _prompt: &str) -> (bool, String) {
            (true, String::new())
        }

        fn set_predicate_selector(&self, _selector: kernel_api::PredicateSelector) {}
    }

    struct AlwaysRatify;

    #[async_trait]
    impl RuleCourt for AlwaysRatify {
        async fn ratify(&self, _rule: &str) -> Result<bool, KernelApiError> {
            Ok(true)
        }
    }

    struct NeverRatify;

    #[async_trait]
    impl RuleCourt for NeverRatify {
        async fn ratify(&self, _rule: &str) -> Result<bool, KernelApiError> {
            Ok(false)
        }
    }

    fn valid_result(rule: &str) -> RuleGenerationResult {
        RuleGenerationResult {
            rule: rule.to_string(),
            valid: true,
            errors: Vec::new(),
            attempts: 1,
            auto_fixed: false,
            sanitized: false,
            confidence: 0.9,
        }
    }

    #[tokio::test]
    async fn valid_ratified_rule_is_hot_loaded() {
        let kernel = Arc::new(InMemoryKernel::new());
        let legislator = Legislator::new("legislator", kernel.clone(), Arc::new(AlwaysRatify));
        let feedback = StubFeedback { result: valid_result("safe(X) :- path(X).") };
        let llm = kernel_api::mock::ScriptedLlmClient::new("");

        let outcome = legislator.process_directive("safe(X) :- path(X).", &llm, &feedback, &PermissiveRuleValidator).await.unwrap();
        assert!(matches!(outcome, LegislatorOutcome::HotLoaded { .. }));
        assert_eq!(kernel.query("rule_hot_loaded").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn court_rejection_yields_human_readable_reason() {
        let kernel = Arc::new(InMemoryKernel::new());
        let legislator = Legislator::new("legislator", kernel.clone(), Arc::new(NeverRatify));
        let feedback = StubFeedback { result: valid_result("safe(X) :- path(X).") };
        let llm = kernel_api::mock::ScriptedLlmClient::new("");

        let outcome = legislator.process_directive("safe(X) :- path(X).", &llm, &feedback, &PermissiveRuleValidator).await.unwrap();
        match outcome {
            LegislatorOutcome::Rejected { reason } => assert!(reason.contains("ratify")),
            _ => panic!("expected rejection"),
        }
    }

    #[tokio::test]
    async fn self_negating_rule_is_rejected_before_ratification() {
        let kernel = Arc::new(InMemoryKernel::new());
        let legislator = Legislator::new("legislator", kernel.clone(), Arc::new(AlwaysRatify));
        let feedback = StubFeedback { result: valid_result("bad(X) :- !bad(X).") };
        let llm = kernel_api::mock::ScriptedLlmClient::new("");

        let outcome = legislator.process_directive("bad(X) :- !bad(X).", &llm, &feedback, &PermissiveRuleValidator).await.unwrap();
        match outcome {
            LegislatorOutcome::Rejected { reason } => assert!(reason.contains("negated")),
            _ => panic!("expected rejection"),
        }
    }

    #[tokio::test]
    async fn rule_schema_validation_failure_is_rejected_after_ratification() {
        let kernel = Arc::new(InMemoryKernel::new());
        let legislator = Legislator::new("legislator", kernel.clone(), Arc::new(AlwaysRatify));
        let feedback = StubFeedback { result: valid_result("") };
        let llm = kernel_api::mock::ScriptedLlmClient::new("");

        let outcome = legislator.process_directive("", &llm, &feedback, &PermissiveRuleValidator).await.unwrap();
        match outcome {
            LegislatorOutcome::Rejected { reason } => assert!(reason.contains("empty rule")),
            _ => panic!("expected rejection"),
        }
        assert!(kernel.query("rule_hot_loaded").await.unwrap().is_empty());
    }
}
