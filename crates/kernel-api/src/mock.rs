//! In-memory test doubles for every trait in this crate. Used by this
//! workspace's own test suites; never wired to a real deductive engine or
//! LLM provider.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use shard_types::{ActionId, Fact};
use tokio::sync::RwLock;

use crate::error::KernelApiError;
use crate::feedback_loop::{FeedbackLoop, PredicateSelector, RuleGenerationResult, RuleValidator};
use crate::kernel::{Corpus, CorpusEntry, Kernel};
use crate::llm_client::LlmClient;
use crate::rule_court::RuleCourt;
use crate::transducer::{ParsedIntent, Transducer, TransducerOutput};
use crate::virtual_store::VirtualStore;

/// A plain `Vec<Fact>` behind a lock — no indexing, unification, or rule
/// evaluation. Sufficient to exercise every shard's assert/query/retract
/// traffic in tests.
#[derive(Default, Clone)]
pub struct InMemoryKernel {
    facts: Arc<RwLock<Vec<Fact>>>,
    hot_loaded_rules: Arc<RwLock<Vec<String>>>,
    virtual_store: Arc<std::sync::RwLock<Option<Arc<dyn VirtualStore>>>>,
}

impl InMemoryKernel {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all_facts(&self) -> Vec<Fact> {
        self.facts.read().await.clone()
    }

    pub async fn hot_loaded_rules(&self) -> Vec<String> {
        self.hot_loaded_rules.read().await.clone()
    }

    /// Attaches the tool executor `get_virtual_store` reports.
    pub fn with_virtual_store(self, store: Arc<dyn VirtualStore>) -> Self {
        *self.virtual_store.write().unwrap() = Some(store);
        self
    }
}

#[async_trait]
impl Kernel for InMemoryKernel {
    async fn assert(&self, fact: Fact) -> Result<(), KernelApiError> {
        self.facts.write().await.push(fact);
        Ok(())
    }

    async fn assert_batch(&self, facts: Vec<Fact>) -> Result<(), KernelApiError> {
        self.facts.write().await.extend(facts);
        Ok(())
    }

    async fn retract(&self, predicate: &str) -> Result<(), KernelApiError> {
        self.facts.write().await.retain(|f| f.predicate != predicate);
        Ok(())
    }

    async fn retract_fact(&self, fact: &Fact) -> Result<(), KernelApiError> {
        self.retract_exact_fact(fact).await
    }

    async fn retract_exact_fact(&self, fact: &Fact) -> Result<(), KernelApiError> {
        let mut guard = self.facts.write().await;
        if let Some(pos) = guard.iter().position(|f| f == fact) {
            guard.remove(pos);
        }
        Ok(())
    }

    async fn retract_exact_facts_batch(&self, facts: &[Fact]) -> Result<(), KernelApiError> {
        let mut guard = self.facts.write().await;
        for fact in facts {
            if let Some(pos) = guard.iter().position(|f| f == fact) {
                guard.remove(pos);
            }
        }
        Ok(())
    }

    async fn query(&self, predicate: &str) -> Result<Vec<Fact>, KernelApiError> {
        Ok(self
            .facts
            .read()
            .await
            .iter()
            .filter(|f| f.predicate == predicate)
            .cloned()
            .collect())
    }

    async fn hot_load_rule(&self, text: &str) -> Result<(), KernelApiError> {
        self.hot_loaded_rules.write().await.push(text.to_string());
        Ok(())
    }

    async fn hot_load_learned_rule(&self, text: &str) -> Result<(), KernelApiError> {
        self.hot_load_rule(text).await
    }

    async fn validate_learned_rules(&self, texts: &[String]) -> Result<Vec<String>, KernelApiError> {
        Ok(texts
            .iter()
            .filter(|t| t.trim().is_empty())
            .map(|t| format!("empty rule text: {t:?}"))
            .collect())
    }

    async fn get_predicate_corpus(&self) -> Result<Corpus, KernelApiError> {
        let mut by_predicate: BTreeMap<String, usize> = BTreeMap::new();
        for fact in self.facts.read().await.iter() {
            let arity = by_predicate.entry(fact.predicate.clone()).or_insert(fact.args.len());
            *arity = (*arity).max(fact.args.len());
        }
        Ok(Corpus {
            entries: by_predicate
                .into_iter()
                .map(|(predicate, arity)| CorpusEntry { predicate, arity })
                .collect(),
        })
    }

    async fn get_virtual_store(&self) -> Result<Option<Arc<dyn VirtualStore>>, KernelApiError> {
        Ok(self.virtual_store.read().unwrap().clone())
    }
}

/// Echoes a fixed reply, or a per-verb scripted reply when the user prompt
/// contains a key from the script map.
pub struct ScriptedLlmClient {
    pub default_reply: String,
    pub scripted: BTreeMap<String, String>,
    pub calls: AtomicU32,
}

impl ScriptedLlmClient {
    pub fn new(default_reply: impl Into<String>) -> Self {
        ScriptedLlmClient {
            default_reply: default_reply.into(),
            scripted: BTreeMap::new(),
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_script(mut self, key: impl Into<String>, reply: impl Into<String>) -> Self {
        self.scripted.insert(key.into(), reply.into());
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete_with_system(
        &self,
        _system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, KernelApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for (key, reply) in &self.scripted {
            if user_prompt.contains(key.as_str()) {
                return Ok(reply.clone());
            }
        }
        Ok(self.default_reply.clone())
    }
}

/// A transducer driven purely by the 12 regex verb families Perception
/// falls back to — useful for tests that do not care about LLM-backed
/// parsing quality, only about the envelope shape.
pub struct RegexTransducer;

#[async_trait]
impl Transducer for RegexTransducer {
    async fn parse_intent_with_gcd(
        &self,
        input: &str,
        _history: &[String],
        _max_retries: u32,
    ) -> Result<TransducerOutput, KernelApiError> {
        Ok(TransducerOutput {
            intent: ParsedIntent {
                category: shard_types::Atom::new("instruction"),
                verb: shard_types::Atom::new("unknown"),
                target: None,
                constraint: Some(input.to_string()),
                confidence: 0.0,
            },
            mangle_updates: Vec::new(),
        })
    }
}

/// A rule validator that accepts anything non-empty, used by tests that
/// don't care about sandbox specifics.
pub struct PermissiveRuleValidator;

#[async_trait]
impl RuleValidator for PermissiveRuleValidator {
    async fn validate(&self, rule: &str) -> Result<Vec<String>, KernelApiError> {
        if rule.trim().is_empty() {
            Ok(vec!["empty rule".to_string()])
        } else {
            Ok(Vec::new())
        }
    }
}

/// A feedback loop that validates anything a [`RuleValidator`] accepts, and
/// can be toggled into a budget-exhausted state for testing Autopoiesis's
/// drop-not-requeue path.
pub struct AlwaysValidFeedbackLoop {
    budget_exhausted: AtomicBool,
    predicate_selector: std::sync::Mutex<Option<PredicateSelector>>,
}

impl AlwaysValidFeedbackLoop {
    pub fn new() -> Self {
        AlwaysValidFeedbackLoop {
            budget_exhausted: AtomicBool::new(false),
            predicate_selector: std::sync::Mutex::new(None),
        }
    }

    pub fn exhaust_budget(&self) {
        self.budget_exhausted.store(true, Ordering::SeqCst);
    }

    pub fn predicate_selector(&self) -> Option<PredicateSelector> {
        self.predicate_selector.lock().unwrap().clone()
    }
}

impl Default for AlwaysValidFeedbackLoop {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedbackLoop for AlwaysValidFeedbackLoop {
    async fn generate_and_validate(
        &self,
        llm: &dyn LlmClient,
        validator: &dyn RuleValidator,
        system_prompt: &str,
        user_prompt: &str,
        _domain: &str,
    ) -> Result<RuleGenerationResult, KernelApiError> {
        if self.is_budget_exhausted() {
            return Err(KernelApiError::BudgetExhausted);
        }
        let rule = llm.complete_with_system(system_prompt, user_prompt).await?;
        self.validate_only(&rule, validator).await
    }

    async fn validate_only(&self, rule: &str, validator: &dyn RuleValidator) -> Result<RuleGenerationResult, KernelApiError> {
        let errors = validator.validate(rule).await?;
        let valid = errors.is_empty();
        Ok(RuleGenerationResult {
            rule: rule.to_string(),
            valid,
            errors,
            attempts: 1,
            auto_fixed: false,
            sanitized: false,
            confidence: if valid { 0.9 } else { 0.0 },
        })
    }

    fn is_budget_exhausted(&self) -> bool {
        self.budget_exhausted.load(Ordering::SeqCst)
    }

    fn reset_budget(&self) {
        self.budget_exhausted.store(false, Ordering::SeqCst);
    }

    fn can_retry_prompt(&self, _prompt: &str) -> (bool, String) {
        if self.is_budget_exhausted() {
            (false, "budget exhausted".to_string())
        } else {
            (true, String::new())
        }
    }

    fn set_predicate_selector(&self, selector: PredicateSelector) {
        *self.predicate_selector.lock().unwrap() = Some(selector);
    }
}

/// Ratifies every non-empty rule.
pub struct PermissiveRuleCourt;

#[async_trait]
impl RuleCourt for PermissiveRuleCourt {
    async fn ratify(&self, rule: &str) -> Result<bool, KernelApiError> {
        Ok(!rule.trim().is_empty())
    }
}

/// Echoes the action back as its own output, recording every call for
/// assertions.
#[derive(Default)]
pub struct EchoVirtualStore {
    pub calls: RwLock<Vec<(ActionId, String)>>,
}

#[async_trait]
impl VirtualStore for EchoVirtualStore {
    async fn route_action(
        &self,
        action_id: &ActionId,
        action_type: &str,
        target: &str,
        _payload: &Fact,
    ) -> Result<String, KernelApiError> {
        self.calls
            .write()
            .await
            .push((action_id.clone(), action_type.to_string()));
        Ok(format!("executed {action_type} -> {target}"))
    }

    async fn persist_facts_to_knowledge(&self, _facts: &[Fact]) -> Result<(), KernelApiError> {
        Ok(())
    }

    async fn persist_link(&self, _from: &str, _to: &str, _kind: &str) -> Result<(), KernelApiError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shard_types::FactValue;

    #[tokio::test]
    async fn in_memory_kernel_assert_and_query() {
        let kernel = InMemoryKernel::new();
        kernel
            .assert(Fact::new("system_heartbeat", vec![FactValue::atom("router")]))
            .await
            .unwrap();
        let facts = kernel.query("system_heartbeat").await.unwrap();
        assert_eq!(facts.len(), 1);
    }

    #[tokio::test]
    async fn in_memory_kernel_retract_predicate_clears_all_matches() {
        let kernel = InMemoryKernel::new();
        kernel.assert(Fact::new("p", vec![FactValue::from(1i64)])).await.unwrap();
        kernel.assert(Fact::new("p", vec![FactValue::from(2i64)])).await.unwrap();
        kernel.retract("p").await.unwrap();
        assert!(kernel.query("p").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn in_memory_kernel_retract_exact_only_removes_matching_fact() {
        let kernel = InMemoryKernel::new();
        let a = Fact::new("pending_action", vec![FactValue::str("A1")]);
        let b = Fact::new("pending_action", vec![FactValue::str("A2")]);
        kernel.assert(a.clone()).await.unwrap();
        kernel.assert(b.clone()).await.unwrap();
        kernel.retract_exact_fact(&a).await.unwrap();
        let remaining = kernel.query("pending_action").await.unwrap();
        assert_eq!(remaining, vec![b]);
    }

    #[tokio::test]
    async fn scripted_llm_client_falls_back_to_default() {
        let client = ScriptedLlmClient::new("default-reply").with_script("deploy", "deploy-reply");
        let reply = client.complete_with_system("sys", "do the thing").await.unwrap();
        assert_eq!(reply, "default-reply");
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn scripted_llm_client_matches_script_key() {
        let client = ScriptedLlmClient::new("default-reply").with_script("deploy", "deploy-reply");
        let reply = client.complete_with_system("sys", "please deploy the service").await.unwrap();
        assert_eq!(reply, "deploy-reply");
    }

    #[tokio::test]
    async fn feedback_loop_rejects_empty_rule() {
        let fl = AlwaysValidFeedbackLoop::new();
        let result = fl.validate_only("", &PermissiveRuleValidator).await.unwrap();
        assert!(!result.valid);
    }

    #[tokio::test]
    async fn feedback_loop_generate_fails_when_budget_exhausted() {
        let fl = AlwaysValidFeedbackLoop::new();
        fl.exhaust_budget();
        let llm = ScriptedLlmClient::new("rule_head(X) :- fact(X).");
        let result = fl
            .generate_and_validate(&llm, &PermissiveRuleValidator, "sys", "user", "domain")
            .await;
        assert!(matches!(result, Err(KernelApiError::BudgetExhausted)));
    }

    #[tokio::test]
    async fn feedback_loop_set_predicate_selector_is_retrievable() {
        let fl = AlwaysValidFeedbackLoop::new();
        assert!(fl.predicate_selector().is_none());
        fl.set_predicate_selector(Arc::new(|p: &str| p == "user_intent"));
        let selector = fl.predicate_selector().unwrap();
        assert!(selector("user_intent"));
        assert!(!selector("pending_action"));
    }

    #[tokio::test]
    async fn in_memory_kernel_predicate_corpus_reflects_asserted_facts() {
        let kernel = InMemoryKernel::new();
        kernel.assert(Fact::new("p", vec![FactValue::from(1i64), FactValue::from(2i64)])).await.unwrap();
        kernel.assert(Fact::new("q", vec![FactValue::from(1i64)])).await.unwrap();
        let corpus = kernel.get_predicate_corpus().await.unwrap();
        assert!(corpus.contains("p"));
        assert!(corpus.contains("q"));
        assert!(!corpus.contains("r"));
    }

    #[tokio::test]
    async fn in_memory_kernel_virtual_store_defaults_to_none() {
        let kernel = InMemoryKernel::new();
        assert!(kernel.get_virtual_store().await.unwrap().is_none());
        let kernel = kernel.with_virtual_store(Arc::new(EchoVirtualStore::default()));
        assert!(kernel.get_virtual_store().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn rule_court_ratifies_non_empty_rule() {
        let court = PermissiveRuleCourt;
        assert!(court.ratify("fact(X) :- other(X).").await.unwrap());
        assert!(!court.ratify("").await.unwrap());
    }
}
