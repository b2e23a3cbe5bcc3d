//! `shard-perception` – NL input to structured intent.
//!
//! Turns free-text input into the `user_intent`/`focus_resolution` facts the
//! rest of the fabric reasons over, via a `Transducer` with a deterministic
//! regex fallback when the transducer is unavailable.
//!
//! # Modules
//!
//! - [`config`] – [`PerceptionConfig`][config::PerceptionConfig] and
//!   [`TargetResolutionConfig`][config::TargetResolutionConfig].
//! - [`verbs`] – the static `VerbCorpus` and 12-family regex fallback parser.
//! - [`target`] – [`resolve_target`][target::resolve_target]'s four-tier
//!   precedence heuristic.
//! - [`error`] – [`PerceptionError`][error::PerceptionError].

pub mod config;
pub mod error;
pub mod target;
pub mod verbs;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::Utc;
use kernel_api::{Kernel, KernelTx, ParsedIntent, Transducer};
use shard_base::{BaseShard, CostGuardConfig, PatternKind};
use shard_types::{Atom, Fact, FactValue, IntentId};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, instrument, warn};

use crate::config::PerceptionConfig;
use crate::error::PerceptionError;

/// Predicates whose prior value is stale the moment a new input arrives —
/// retracted in the same transaction that asserts the new one.
const STALE_EPHEMERA: &[&str] = &[
    "ambiguity_flag",
    "clarification_needed",
    "intent_unknown",
    "intent_unmapped",
    "no_action_reason",
    "clarification_question",
    "clarification_option",
    "learning_candidate",
    "awaiting_clarification",
    "awaiting_user_input",
    "campaign_awaiting_clarification",
    "focus_resolution",
    "user_input_string",
    "user_intent",
    "processed_intent",
    "executive_processed_intent",
];

/// Default `UnhandledThreshold` `BaseShard` uses for autopoiesis buffering;
/// Perception rarely records unhandled cases itself but still embeds the
/// substrate every shard carries.
const DEFAULT_UNHANDLED_THRESHOLD: usize = 3;

/// NL input to intent. Owns a bounded input queue, a rolling input-history
/// window for transducer context, and the `BaseShard` lifecycle substrate.
pub struct Perception {
    base: BaseShard,
    config: PerceptionConfig,
    kernel: Arc<dyn Kernel>,
    transducer: Arc<dyn Transducer>,
    input_tx: mpsc::Sender<String>,
    input_rx: Mutex<mpsc::Receiver<String>>,
    history: RwLock<VecDeque<String>>,
    unmapped_counts: RwLock<HashMap<String, u32>>,
    clarification_counter: AtomicU32,
    last_input: RwLock<Option<chrono::DateTime<Utc>>>,
}

impl Perception {
    pub fn new(
        shard_id: impl Into<String>,
        config: PerceptionConfig,
        kernel: Arc<dyn Kernel>,
        transducer: Arc<dyn Transducer>,
    ) -> Self {
        let (input_tx, input_rx) = mpsc::channel(config.queue_capacity);
        let cost_guard_config = CostGuardConfig {
            max_validation_retries: Some(config.default_max_retries),
            ..CostGuardConfig::default()
        };
        Perception {
            base: BaseShard::new(shard_id, cost_guard_config, DEFAULT_UNHANDLED_THRESHOLD),
            config,
            kernel,
            transducer,
            input_tx,
            input_rx: Mutex::new(input_rx),
            history: RwLock::new(VecDeque::new()),
            unmapped_counts: RwLock::new(HashMap::new()),
            clarification_counter: AtomicU32::new(0),
            last_input: RwLock::new(None),
        }
    }

    pub fn base(&self) -> &BaseShard {
        &self.base
    }

    /// Nonblocking submit into the bounded queue. Returns
    /// [`PerceptionError::QueueFull`] on overflow rather than blocking the
    /// caller.
    #[instrument(skip(self), fields(queue_capacity = self.config.queue_capacity))]
    pub fn submit_input(&self, input: String) -> Result<(), PerceptionError> {
        match self.input_tx.try_send(input) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(dropped = %dropped, "perception input queue full, dropping submission");
                Err(PerceptionError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PerceptionError::QueueFull),
        }
    }

    /// Consumes the input queue until [`BaseShard::stop`] is called.
    pub async fn run(&self) {
        loop {
            let recv = {
                let mut rx = self.input_rx.lock().await;
                rx.recv()
            };
            tokio::select! {
                _ = self.base.stopped() => break,
                input = recv => {
                    match input {
                        Some(input) => {
                            if let Err(e) = self.perceive(&input).await {
                                warn!(error = %e, "perceive failed");
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    }

    /// The full natural-language-input-to-fact pipeline.
    #[instrument(skip(self))]
    pub async fn perceive(&self, input: &str) -> Result<(), PerceptionError> {
        // 1. Record lastInput.
        *self.last_input.write().await = Some(Utc::now());

        let history_snapshot: Vec<String> = self.history.read().await.iter().cloned().collect();
        let max_retries = self.base.cost_guard().max_validation_retries();

        // 2. Invoke the transducer, falling back to the regex parser.
        let transducer_result = self
            .transducer
            .parse_intent_with_gcd(input, &history_snapshot, max_retries)
            .await;

        let (mut intent, mangle_updates, transducer_failed) = match transducer_result {
            Ok(out) => (out.intent, out.mangle_updates, false),
            Err(_) if self.config.fallback_enabled => match verbs::fallback_parse(input) {
                Some(parsed) => (parsed, Vec::new(), true),
                None => {
                    self.assert_intent_unknown(input, "/no_verb_match").await?;
                    return Ok(());
                }
            },
            Err(_) => {
                self.assert_intent_unknown(input, "/llm_failed").await?;
                return Ok(());
            }
        };

        // 3. Normalize category/verb atoms.
        intent.category = Atom::new(intent.category.stripped());
        intent.verb = Atom::new(intent.verb.stripped());

        self.push_history(input).await;

        let mut tx = KernelTx::new();
        for predicate in STALE_EPHEMERA {
            tx.retract_predicate(*predicate);
        }
        tx.assert(Fact::new("user_input_string", vec![FactValue::str(input)]));

        // 5. Classify the verb against the static corpus and action_mapping.
        let action_mapping = self.kernel.query("action_mapping").await?;
        let known = verbs::verb_corpus_contains(&intent.verb);
        let mapped = action_mapping
            .iter()
            .any(|f| matches!(f.args.first(), Some(FactValue::Atom(a)) if a == &intent.verb));

        if !known {
            tx.assert(Fact::new(
                "intent_unmapped",
                vec![FactValue::Atom(intent.verb.clone()), FactValue::atom("unknown_verb")],
            ));
            intent.confidence = intent.confidence.min(0.4);
            self.record_learning_candidate(&mut tx, input, &intent).await;
        } else if !mapped {
            tx.assert(Fact::new(
                "intent_unmapped",
                vec![FactValue::Atom(intent.verb.clone()), FactValue::atom("no_action_mapping")],
            ));
            intent.confidence = intent.confidence.min(0.4);
            self.record_learning_candidate(&mut tx, input, &intent).await;
        }
        if transducer_failed {
            tx.assert(Fact::new(
                "intent_unknown",
                vec![FactValue::str(input), FactValue::atom("heuristic_low")],
            ));
        }

        // 6. Assert user_intent for /current_intent.
        tx.assert(Fact::new(
            "user_intent",
            vec![
                FactValue::atom(IntentId::current().as_str()),
                FactValue::Atom(intent.category.clone()),
                FactValue::Atom(intent.verb.clone()),
                intent.target.clone().map(FactValue::str).unwrap_or(FactValue::atom("none")),
                intent.constraint.clone().map(FactValue::str).unwrap_or(FactValue::atom("none")),
            ],
        ));

        // 7. Ambiguity check.
        if intent.confidence < self.config.ambiguity_threshold {
            tx.assert(Fact::new(
                "ambiguity_flag",
                vec![
                    FactValue::atom(IntentId::current().as_str()),
                    FactValue::str(input),
                    FactValue::str(format!("confidence={:.2}", intent.confidence)),
                ],
            ));
            let key = format!("ambiguous:{}", intent.verb.stripped());
            let _ = self.base.record_learning(PatternKind::Failure, &key, input).await;
        }

        // 8. Target resolution.
        if let Some(target) = intent.target.clone() {
            let resolution = target::resolve_target(&target, self.kernel.as_ref(), &self.config.target_resolution).await?;
            if resolution.confidence_pct < self.config.target_resolution.clarification_floor {
                self.clarification_counter.fetch_add(1, Ordering::Relaxed);
            }
            tx.assert(Fact::new(
                "focus_resolution",
                vec![
                    FactValue::str(resolution.raw),
                    resolution.path.map(FactValue::str).unwrap_or(FactValue::atom("none")),
                    resolution.symbol.map(FactValue::str).unwrap_or(FactValue::atom("none")),
                    FactValue::Int(resolution.confidence_pct as i64),
                ],
            ));
        }

        // 9. Apply mangle_updates under the conservative policy.
        let mut dropped = 0usize;
        for update in mangle_updates {
            if matches!(update.predicate.as_str(), "ambiguity_flag" | "clarification_needed") {
                tx.assert(update);
            } else {
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!(dropped, "dropped transducer mangle_updates outside the conservative allowlist");
        }

        // 10. Assert processed_intent.
        tx.assert(Fact::new(
            "processed_intent",
            vec![FactValue::atom(IntentId::current().as_str())],
        ));

        tx.commit(self.kernel.as_ref()).await?;

        if intent.confidence >= self.config.ambiguity_threshold && known && mapped {
            let key = format!("{}:{}", intent.verb.stripped(), intent.category.stripped());
            let _ = self.base.record_learning(PatternKind::Success, &key, input).await;
        }

        Ok(())
    }

    async fn assert_intent_unknown(&self, input: &str, reason: &str) -> Result<(), PerceptionError> {
        let mut tx = KernelTx::new();
        for predicate in STALE_EPHEMERA {
            tx.retract_predicate(*predicate);
        }
        tx.assert(Fact::new("user_input_string", vec![FactValue::str(input)]));
        tx.assert(Fact::new(
            "intent_unknown",
            vec![FactValue::str(input), FactValue::atom(reason)],
        ));
        tx.commit(self.kernel.as_ref()).await?;
        Ok(())
    }

    async fn record_learning_candidate(&self, tx: &mut KernelTx, phrase: &str, intent: &ParsedIntent) {
        let mut counts = self.unmapped_counts.write().await;
        let count = counts.entry(phrase.to_string()).or_insert(0);
        *count += 1;
        if *count == self.config.learning_candidate_threshold {
            tx.assert(Fact::new(
                "learning_candidate",
                vec![
                    FactValue::str(phrase),
                    FactValue::Atom(intent.verb.clone()),
                    intent.target.clone().map(FactValue::str).unwrap_or(FactValue::atom("none")),
                    FactValue::atom("no_action_mapping"),
                ],
            ));
        }
    }

    pub fn clarification_count(&self) -> u32 {
        self.clarification_counter.load(Ordering::Relaxed)
    }

    async fn push_history(&self, input: &str) {
        let mut history = self.history.write().await;
        history.push_back(input.to_string());
        while history.len() > self.config.history_depth {
            history.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kernel_api::mock::InMemoryKernel;
    use kernel_api::{KernelApiError, TransducerOutput};

    struct StubTransducer {
        confidence: f64,
        fail: bool,
    }

    #[async_trait]
    impl Transducer for StubTransducer {
        async fn parse_intent_with_gcd(
            &self,
            _input: &str,
            _history: &[String],
            _max_retries: u32,
        ) -> Result<TransducerOutput, KernelApiError> {
            if self.fail {
                return Err(KernelApiError::Unavailable("down".to_string()));
            }
            Ok(TransducerOutput {
                intent: ParsedIntent {
                    category: Atom::new("file"),
                    verb: Atom::new("read"),
                    target: Some("lib.rs".to_string()),
                    constraint: None,
                    confidence: self.confidence,
                },
                mangle_updates: Vec::new(),
            })
        }
    }

    fn kernel_with_mapping() -> Arc<InMemoryKernel> {
        Arc::new(InMemoryKernel::new())
    }

    #[tokio::test]
    async fn perceive_asserts_user_intent_and_processed_intent() {
        let kernel = kernel_with_mapping();
        kernel
            .assert(Fact::new("action_mapping", vec![FactValue::atom("read")]))
            .await
            .unwrap();
        let transducer = Arc::new(StubTransducer { confidence: 0.9, fail: false });
        let perception = Perception::new("perception", PerceptionConfig::default(), kernel.clone(), transducer);

        perception.perceive("read lib.rs").await.unwrap();

        let facts = kernel.query("user_intent").await.unwrap();
        assert_eq!(facts.len(), 1);
        let processed = kernel.query("processed_intent").await.unwrap();
        assert_eq!(processed.len(), 1);
    }

    #[tokio::test]
    async fn low_confidence_parse_raises_ambiguity_flag() {
        let kernel = kernel_with_mapping();
        kernel
            .assert(Fact::new("action_mapping", vec![FactValue::atom("read")]))
            .await
            .unwrap();
        let transducer = Arc::new(StubTransducer { confidence: 0.1, fail: false });
        let perception = Perception::new("perception", PerceptionConfig::default(), kernel.clone(), transducer);

        perception.perceive("read lib.rs").await.unwrap();

        let flags = kernel.query("ambiguity_flag").await.unwrap();
        assert_eq!(flags.len(), 1);
    }

    #[tokio::test]
    async fn unmapped_verb_increments_learning_candidate_at_threshold() {
        let kernel = kernel_with_mapping();
        let transducer = Arc::new(StubTransducer { confidence: 0.9, fail: false });
        let mut config = PerceptionConfig::default();
        config.learning_candidate_threshold = 2;
        let perception = Perception::new("perception", config, kernel.clone(), transducer);

        perception.perceive("read lib.rs").await.unwrap();
        perception.perceive("read lib.rs").await.unwrap();

        let candidates = kernel.query("learning_candidate").await.unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[tokio::test]
    async fn transducer_failure_falls_back_to_regex_parser() {
        let kernel = kernel_with_mapping();
        kernel
            .assert(Fact::new("action_mapping", vec![FactValue::atom("read")]))
            .await
            .unwrap();
        let transducer = Arc::new(StubTransducer { confidence: 0.9, fail: true });
        let perception = Perception::new("perception", PerceptionConfig::default(), kernel.clone(), transducer);

        perception.perceive("read the config file").await.unwrap();

        let facts = kernel.query("user_intent").await.unwrap();
        assert_eq!(facts.len(), 1);
    }

    #[tokio::test]
    async fn submit_input_rejects_when_queue_full() {
        let kernel = kernel_with_mapping();
        let transducer = Arc::new(StubTransducer { confidence: 0.9, fail: false });
        let mut config = PerceptionConfig::default();
        config.queue_capacity = 1;
        let perception = Perception::new("perception", config, kernel, transducer);

        perception.submit_input("first".to_string()).unwrap();
        let err = perception.submit_input("second".to_string()).unwrap_err();
        assert!(matches!(err, PerceptionError::QueueFull));
    }

    #[tokio::test]
    async fn target_resolution_asserts_focus_resolution() {
        let kernel = kernel_with_mapping();
        kernel
            .assert(Fact::new("action_mapping", vec![FactValue::atom("read")]))
            .await
            .unwrap();
        let transducer = Arc::new(StubTransducer { confidence: 0.9, fail: false });
        let perception = Perception::new("perception", PerceptionConfig::default(), kernel.clone(), transducer);

        perception.perceive("read lib.rs").await.unwrap();

        let resolutions = kernel.query("focus_resolution").await.unwrap();
        assert_eq!(resolutions.len(), 1);
    }
}
