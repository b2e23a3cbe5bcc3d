//! [`Executive`] – derives `pending_action` facts from active strategies and
//! the latest intent, with boot-guarded OODA-stall detection.
//!
//! Each tick reads the latest intent and strategy facts and emits one batch
//! of derived actions, the same read-then-emit shape used throughout this
//! fabric, rehomed from a fixed sensor frame to a fact-query frame.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use kernel_api::{FeedbackLoop, Kernel, KernelTx, LlmClient, RuleValidator};
use shard_base::{BaseShard, CostGuardConfig, PatternKind, UnhandledCase};
use shard_types::{Fact, FactValue};
use tokio::sync::RwLock;
use tracing::{info, instrument};

use crate::config::ExecutiveConfig;
use crate::error::RuntimeError;

const DEFAULT_UNHANDLED_THRESHOLD: usize = 3;
const STRATEGY_FACT_SOURCES: &[&str] = &["next_action", "tdd_next_action", "campaign_next_action", "repair_next_action"];
const BARRIER_PREDICATES: &[&str] = &["block_commit", "block_action", "executive_blocked", "test_state_blocking"];
const DELEGATION_VERBS: &[&str] = &["/delegate_reviewer", "/delegate_coder", "/delegate_researcher", "/delegate_tool_generator"];
const IO_VERBS: &[&str] = &[
    "/read_file", "/write_file", "/edit_file", "/delete_file",
    "/fs_read", "/fs_write", "/search_files", "/search_code", "/analyze_code",
];

struct LatestIntent {
    intent_id: String,
    category: String,
    verb: String,
    target: String,
    constraint: String,
}

fn derive_action(fact: &Fact) -> Option<(String, String, BTreeMap<String, FactValue>)> {
    let name = fact.args.first().and_then(FactValue::as_str)?.to_string();
    let target = fact.args.get(1).and_then(FactValue::as_str).unwrap_or_default().to_string();
    let mut payload = BTreeMap::new();
    for (i, arg) in fact.args.iter().enumerate().skip(2) {
        match arg {
            FactValue::Map(m) => payload.extend(m.clone()),
            other => {
                payload.insert(format!("arg{i}"), other.clone());
            }
        }
    }
    Some((name, target, payload))
}

fn latest_intent(facts: &[Fact]) -> Option<LatestIntent> {
    let current = facts.iter().find(|f| f.args.first().and_then(FactValue::as_str) == Some("/current_intent"));
    let pick = current.or_else(|| {
        facts
            .iter()
            .filter(|f| f.args.first().and_then(FactValue::as_str).map(|s| s.starts_with("/intent_")).unwrap_or(false))
            .max_by_key(|f| {
                f.args
                    .first()
                    .and_then(FactValue::as_str)
                    .and_then(|s| s.strip_prefix("/intent_"))
                    .and_then(|n| n.parse::<i128>().ok())
                    .unwrap_or(0)
            })
    })?;
    Some(LatestIntent {
        intent_id: pick.args.first().and_then(FactValue::as_str).unwrap_or_default().to_string(),
        category: pick.args.get(1).and_then(FactValue::as_str).unwrap_or_default().to_string(),
        verb: pick.args.get(2).and_then(FactValue::as_str).unwrap_or_default().to_string(),
        target: pick.args.get(3).and_then(FactValue::as_str).unwrap_or_default().to_string(),
        constraint: pick.args.get(4).and_then(FactValue::as_str).unwrap_or_default().to_string(),
    })
}

/// Fills target/payload from the latest intent for the known action kinds;
/// other action types pass through untouched.
fn hydrate(action_type: &str, mut target: String, mut payload: BTreeMap<String, FactValue>, intent: &LatestIntent) -> (String, BTreeMap<String, FactValue>) {
    if action_type == "/interrogative_mode" {
        target = intent.constraint.clone();
        payload.insert("options".to_string(), FactValue::str(intent.target.clone()));
    } else if DELEGATION_VERBS.contains(&action_type) {
        let task = format!("{} {} {}", intent.verb, intent.target, intent.constraint).trim().to_string();
        payload.insert("task".to_string(), FactValue::str(task));
    } else if IO_VERBS.contains(&action_type) {
        if target.is_empty() {
            target = intent.target.clone();
        }
        payload.insert("intent_id".to_string(), FactValue::str(intent.intent_id.clone()));
        payload.insert("intent_constraint".to_string(), FactValue::str(intent.constraint.clone()));
    }
    (target, payload)
}

pub struct Executive {
    base: BaseShard,
    config: ExecutiveConfig,
    kernel: Arc<dyn Kernel>,
    strict_barriers: bool,
    known_strategies: RwLock<HashSet<String>>,
    boot_guard_active: AtomicBool,
    stall_fingerprint: RwLock<Option<(String, Instant)>>,
    stall_fired_for: RwLock<Option<String>>,
}

impl Executive {
    pub fn new(shard_id: impl Into<String>, config: ExecutiveConfig, kernel: Arc<dyn Kernel>, strict_barriers: bool) -> Self {
        Executive {
            base: BaseShard::new(shard_id, CostGuardConfig::default(), DEFAULT_UNHANDLED_THRESHOLD),
            config,
            kernel,
            strict_barriers,
            known_strategies: RwLock::new(HashSet::new()),
            boot_guard_active: AtomicBool::new(true),
            stall_fingerprint: RwLock::new(None),
            stall_fired_for: RwLock::new(None),
        }
    }

    pub fn base(&self) -> &BaseShard {
        &self.base
    }

    /// Retract stale intent/action ephemera on start; boot guard stays
    /// active until the first real user interaction.
    pub async fn on_start(&self) -> Result<(), RuntimeError> {
        let mut tx = KernelTx::new();
        for predicate in ["pending_action", "ooda_timeout", "no_action_reason", "executive_blocked"] {
            tx.retract_predicate(predicate);
        }
        tx.commit(self.kernel.as_ref()).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<(), RuntimeError> {
        self.sync_strategies().await?;

        if self.check_barriers().await? {
            return Ok(());
        }

        let intent_facts = self.kernel.query("user_intent").await?;
        if !intent_facts.is_empty() {
            self.boot_guard_active.store(false, Ordering::Relaxed);
        }
        let intent = latest_intent(&intent_facts);

        let derived = self.derive_actions().await?;
        if self.boot_guard_active.load(Ordering::Relaxed) {
            self.check_stall(intent.as_ref(), !derived.is_empty()).await;
            return Ok(());
        }

        let mut emitted = 0usize;
        for (source_fact, name, target, payload) in derived {
            if emitted >= self.config.max_actions_per_tick {
                break;
            }
            self.emit_action(&source_fact, &name, target, payload, intent.as_ref()).await?;
            emitted += 1;
        }

        self.check_stall(intent.as_ref(), emitted > 0).await;

        if emitted == 0 && intent.is_some() {
            self.record_no_action(intent.as_ref().unwrap()).await?;
        }

        Ok(())
    }

    async fn sync_strategies(&self) -> Result<(), RuntimeError> {
        let strategies = self.kernel.query("active_strategy").await?;
        let names: HashSet<String> = strategies.iter().filter_map(|f| f.args.first().and_then(FactValue::as_str)).map(String::from).collect();
        let mut known = self.known_strategies.write().await;
        for name in names.difference(&known) {
            self.kernel
                .assert(Fact::with_ts("strategy_activated", vec![FactValue::str(name), FactValue::str(name)], Utc::now()))
                .await?;
            info!(strategy = %name, "strategy activated");
        }
        *known = names;
        Ok(())
    }

    /// Returns `true` if a barrier is active in strict mode (caller should
    /// skip action derivation this tick).
    async fn check_barriers(&self) -> Result<bool, RuntimeError> {
        for predicate in BARRIER_PREDICATES {
            let facts = self.kernel.query(predicate).await?;
            if !facts.is_empty() && self.strict_barriers {
                self.kernel
                    .assert(Fact::with_ts("executive_blocked", vec![FactValue::str(*predicate)], Utc::now()))
                    .await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn derive_actions(&self) -> Result<Vec<(Fact, String, String, BTreeMap<String, FactValue>)>, RuntimeError> {
        let mut out = Vec::new();
        for predicate in STRATEGY_FACT_SOURCES {
            for fact in self.kernel.query(predicate).await? {
                if let Some((name, target, payload)) = derive_action(&fact) {
                    out.push((fact, name, target, payload));
                }
            }
        }
        Ok(out)
    }

    async fn emit_action(
        &self,
        source_fact: &Fact,
        action_type: &str,
        target: String,
        payload: BTreeMap<String, FactValue>,
        intent: Option<&LatestIntent>,
    ) -> Result<(), RuntimeError> {
        let (target, mut payload) = match intent {
            Some(intent) => hydrate(action_type, target, payload, intent),
            None => (target, payload),
        };
        let action_id = payload
            .get("action_id")
            .and_then(FactValue::as_str)
            .map(String::from)
            .unwrap_or_else(|| format!("action-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default()));
        payload.entry("action_id".to_string()).or_insert_with(|| FactValue::str(&action_id));

        let mut tx = KernelTx::new();
        tx.retract_exact(source_fact.clone());
        tx.assert(Fact::with_ts(
            "pending_action",
            vec![
                FactValue::str(&action_id),
                FactValue::str(action_type),
                FactValue::str(&target),
                FactValue::Map(payload),
            ],
            Utc::now(),
        ));
        tx.commit(self.kernel.as_ref()).await?;
        self.base.record_learning(PatternKind::Success, &format!("derive:{action_type}"), &target).await.ok();
        Ok(())
    }

    async fn check_stall(&self, intent: Option<&LatestIntent>, derived_any: bool) {
        let Some(intent) = intent else {
            *self.stall_fingerprint.write().await = None;
            *self.stall_fired_for.write().await = None;
            return;
        };
        let fingerprint = format!("{}|{}|{}|{}", intent.category, intent.verb, intent.target, intent.constraint);
        let mut slot = self.stall_fingerprint.write().await;
        match slot.as_ref() {
            Some((fp, since)) if *fp == fingerprint => {
                if !derived_any && since.elapsed() >= self.config.ooda_timeout {
                    let mut fired = self.stall_fired_for.write().await;
                    if fired.as_deref() != Some(fingerprint.as_str()) {
                        let _ = self
                            .kernel
                            .assert(Fact::with_ts("ooda_timeout", vec![FactValue::str(&fingerprint)], Utc::now()))
                            .await;
                        *fired = Some(fingerprint);
                    }
                }
            }
            _ => {
                *slot = Some((fingerprint, Instant::now()));
                *self.stall_fired_for.write().await = None;
            }
        }
    }

    async fn record_no_action(&self, intent: &LatestIntent) -> Result<(), RuntimeError> {
        let reason = if intent.verb.is_empty() { "/no_action_derived" } else { "/unmapped_verb" };
        self.kernel
            .assert(Fact::with_ts(
                "no_action_reason",
                vec![FactValue::str(&intent.intent_id), FactValue::atom(reason)],
                Utc::now(),
            ))
            .await?;
        self.base
            .record_unhandled(UnhandledCase {
                query: format!("no_action:{}:{}", intent.category, intent.verb),
                context: intent.target.clone(),
                facts_snapshot: Vec::new(),
                timestamp: Utc::now(),
            })
            .await;
        Ok(())
    }

    pub async fn run_autopoiesis(
        &self,
        llm: &dyn LlmClient,
        feedback: &dyn FeedbackLoop,
        validator: &dyn RuleValidator,
    ) -> Result<(), RuntimeError> {
        if !self.base.should_propose().await {
            return Ok(());
        }
        let cases = self.base.drain_unhandled_cases().await;
        if feedback.is_budget_exhausted() {
            // Drop, never requeue, to avoid retry storms.
            return Ok(());
        }
        let system_prompt = "Propose a Mangle rule covering Executive's unhandled no-action cases.";
        let user_prompt = cases.iter().map(|c| c.query.clone()).collect::<Vec<_>>().join("\n");
        let result = feedback.generate_and_validate(llm, validator, system_prompt, &user_prompt, "executive").await?;
        if result.valid && result.confidence >= 0.8 {
            self.kernel.hot_load_learned_rule(&result.rule).await?;
            self.base.record_learning(PatternKind::Success, "executive_rule", &result.rule).await.ok();
        } else {
            self.kernel.assert(Fact::new("rule_proposal_pending", vec![FactValue::str(&result.rule)])).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_api::mock::InMemoryKernel;

    fn intent_fact(verb: &str, target: &str) -> Fact {
        Fact::new(
            "user_intent",
            vec![
                FactValue::atom("current_intent"),
                FactValue::atom("file"),
                FactValue::atom(verb),
                FactValue::str(target),
                FactValue::atom("none"),
            ],
        )
    }

    #[tokio::test]
    async fn boot_guard_suppresses_actions_until_first_interaction() {
        let kernel = Arc::new(InMemoryKernel::new());
        kernel
            .assert(Fact::new("next_action", vec![FactValue::str("/read_file"), FactValue::str("a.txt")]))
            .await
            .unwrap();
        let executive = Executive::new("executive", ExecutiveConfig::default(), kernel.clone(), true);

        executive.tick().await.unwrap();

        assert!(kernel.query("pending_action").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn action_emitted_after_user_interaction() {
        let kernel = Arc::new(InMemoryKernel::new());
        kernel.assert(intent_fact("/read_file", "a.txt")).await.unwrap();
        kernel
            .assert(Fact::new("next_action", vec![FactValue::str("/read_file"), FactValue::str("")]))
            .await
            .unwrap();
        let executive = Executive::new("executive", ExecutiveConfig::default(), kernel.clone(), true);

        executive.tick().await.unwrap();

        let pending = kernel.query("pending_action").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].args.get(2).and_then(FactValue::as_str), Some("a.txt"));
        assert!(kernel.query("next_action").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn strict_barrier_blocks_action_derivation() {
        let kernel = Arc::new(InMemoryKernel::new());
        kernel.assert(intent_fact("/read_file", "a.txt")).await.unwrap();
        kernel.assert(Fact::new("block_commit", vec![FactValue::str("pending review")])).await.unwrap();
        kernel
            .assert(Fact::new("next_action", vec![FactValue::str("/read_file"), FactValue::str("a.txt")]))
            .await
            .unwrap();
        let executive = Executive::new("executive", ExecutiveConfig::default(), kernel.clone(), true);

        executive.tick().await.unwrap();

        assert!(kernel.query("pending_action").await.unwrap().is_empty());
        assert!(!kernel.query("executive_blocked").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delegation_verb_synthesizes_task_string() {
        let kernel = Arc::new(InMemoryKernel::new());
        kernel.assert(intent_fact("/delegate_coder", "fix the bug")).await.unwrap();
        kernel
            .assert(Fact::new("next_action", vec![FactValue::str("/delegate_coder"), FactValue::str("")]))
            .await
            .unwrap();
        let executive = Executive::new("executive", ExecutiveConfig::default(), kernel.clone(), true);

        executive.tick().await.unwrap();

        let pending = kernel.query("pending_action").await.unwrap();
        let payload = pending[0].args.get(3).and_then(FactValue::as_map).unwrap();
        assert!(payload.get("task").and_then(FactValue::as_str).unwrap().contains("fix the bug"));
    }

    #[tokio::test]
    async fn ooda_timeout_fires_exactly_once_across_repeated_stall_ticks() {
        let kernel = Arc::new(InMemoryKernel::new());
        kernel.assert(intent_fact("/delegate_coder", "stuck task")).await.unwrap();
        let mut config = ExecutiveConfig::default();
        config.ooda_timeout = Duration::from_millis(20);
        let executive = Executive::new("executive", config, kernel.clone(), true);

        // First interaction clears the boot guard; no strategy fact means
        // nothing is ever derived, so the intent stalls from here on.
        executive.tick().await.unwrap();

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(25)).await;
            executive.tick().await.unwrap();
        }

        assert_eq!(kernel.query("ooda_timeout").await.unwrap().len(), 1);
    }
}
