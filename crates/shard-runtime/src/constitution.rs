//! [`Constitution`] – permit/deny gatekeeping for every `pending_action`.
//!
//! Ordered sequential checks (appeal override, dangerous pattern, domain
//! allowlist, `permitted/1` derivation) short-circuit on the first match,
//! the same way a capability or state-verifier gate would.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kernel_api::{FeedbackLoop, Kernel, KernelTx, LlmClient, RuleValidator};
use regex::Regex;
use shard_base::{BaseShard, CostGuardConfig, PatternKind};
use shard_types::{ActionId, Fact, FactValue};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::ConstitutionConfig;
use crate::error::RuntimeError;

const DEFAULT_UNHANDLED_THRESHOLD: usize = 3;

/// Regexes compiled once from the default dangerous-pattern deny list.
fn default_dangerous_patterns() -> Vec<Regex> {
    [
        r"rm\s+-rf",
        r"mkfs",
        r"dd\s+if=",
        r"chmod\s+777",
        r"curl.*\|.*sh",
        r"wget.*\|.*sh",
        r">.*\/etc\/",
        r"sudo\s+rm",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static dangerous-pattern regex is valid"))
    .collect()
}

#[derive(Debug, Clone)]
struct ActiveOverride {
    approver: String,
    decided_at: DateTime<Utc>,
    /// `None` means permanent.
    duration: Option<Duration>,
}

impl ActiveOverride {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        match self.duration {
            None => true,
            Some(d) => {
                let expires = self.decided_at + chrono::Duration::from_std(d).unwrap_or_default();
                now <= expires
            }
        }
    }
}

#[derive(Debug, Clone)]
struct SecurityViolation {
    timestamp: DateTime<Utc>,
    action_type: String,
    target: String,
    reason: String,
}

/// A decoded `pending_action` tuple.
struct PendingAction {
    action_id: ActionId,
    action_type: String,
    target: String,
    payload: Fact,
}

fn decode_pending_action(fact: &Fact) -> Option<PendingAction> {
    let action_id = fact.args.first().and_then(FactValue::as_str)?.to_string();
    let action_type = fact.args.get(1).and_then(FactValue::as_str)?.to_string();
    let target = fact.args.get(2).and_then(FactValue::as_str)?.to_string();
    let payload = fact.args.get(3).cloned().unwrap_or(FactValue::str(""));
    Some(PendingAction {
        action_id: ActionId::new(action_id),
        action_type,
        target,
        payload: Fact::new("payload", vec![payload]),
    })
}

pub struct Constitution {
    base: BaseShard,
    config: ConstitutionConfig,
    kernel: Arc<dyn Kernel>,
    dangerous_patterns: Vec<Regex>,
    overrides: RwLock<HashMap<String, ActiveOverride>>,
    violations: RwLock<HashMap<String, SecurityViolation>>,
    appeals_pending: RwLock<HashSet<String>>,
}

impl Constitution {
    pub fn new(shard_id: impl Into<String>, config: ConstitutionConfig, kernel: Arc<dyn Kernel>) -> Self {
        Constitution {
            base: BaseShard::new(shard_id, CostGuardConfig::default(), DEFAULT_UNHANDLED_THRESHOLD),
            config,
            kernel,
            dangerous_patterns: default_dangerous_patterns(),
            overrides: RwLock::new(HashMap::new()),
            violations: RwLock::new(HashMap::new()),
            appeals_pending: RwLock::new(HashSet::new()),
        }
    }

    pub fn base(&self) -> &BaseShard {
        &self.base
    }

    /// Decide every outstanding `pending_action`, one full 50 ms tick.
    pub async fn tick(&self) -> Result<(), RuntimeError> {
        self.expire_overrides().await;
        let pending = self.kernel.query("pending_action").await?;
        for fact in &pending {
            if let Some(action) = decode_pending_action(fact) {
                self.decide(fact, action).await?;
            }
        }
        self.drain_appeal_requests().await?;
        Ok(())
    }

    async fn expire_overrides(&self) {
        let now = Utc::now();
        self.overrides.write().await.retain(|_, o| o.is_live(now));
    }

    async fn decide(&self, pending_fact: &Fact, action: PendingAction) -> Result<(), RuntimeError> {
        let now = Utc::now();

        // 1. Appeal override.
        if let Some(o) = self.overrides.read().await.get(&action.action_type) {
            if o.is_live(now) {
                return self
                    .permit(pending_fact, &action, format!("permitted via appeal override by {}", o.approver))
                    .await;
            }
        }

        // 2. Dangerous pattern.
        if self.dangerous_patterns.iter().any(|re| re.is_match(&action.target)) {
            return self.deny(pending_fact, &action, "matches dangerous command pattern").await;
        }

        // 3. Domain allowlist for network-ish actions.
        if matches!(action.action_type.as_str(), "network" | "fetch" | "browse" | "/network" | "/fetch" | "/browse") {
            let target_lower = action.target.to_lowercase();
            let allowed = self.config.allowed_domains.iter().any(|d| target_lower.contains(&d.to_lowercase()));
            if !allowed {
                return self.deny(pending_fact, &action, "domain not in allowlist").await;
            }
        }

        // 4. permitted/1 derivation.
        let permitted_facts = self.kernel.query("permitted").await?;
        let matched = permitted_facts.iter().any(|f| {
            f.args.first().and_then(FactValue::as_str).is_some_and(|v| {
                v.trim_start_matches('/') == action.action_type.trim_start_matches('/')
            })
        });
        if matched {
            return self.permit(pending_fact, &action, "permitted via derivation").await;
        }
        if self.config.strict_mode {
            self.deny(pending_fact, &action, "not explicitly permitted (default deny)").await
        } else {
            self.permit(pending_fact, &action, "permitted via lax-mode default").await
        }
    }

    async fn permit(&self, pending_fact: &Fact, action: &PendingAction, reason: String) -> Result<(), RuntimeError> {
        let now = Utc::now();
        let mut tx = KernelTx::new();
        tx.retract_exact(pending_fact.clone());
        tx.assert(Fact::with_ts(
            "action_permitted",
            vec![
                FactValue::str(action.action_id.as_str()),
                FactValue::str(&action.action_type),
                FactValue::str(&action.target),
            ],
            now,
        ));
        tx.assert(Fact::with_ts(
            "permitted_action",
            vec![
                FactValue::str(action.action_id.as_str()),
                FactValue::str(&action.action_type),
                FactValue::str(&action.target),
                action.payload.args.first().cloned().unwrap_or(FactValue::str("")),
            ],
            now,
        ));
        tx.commit(self.kernel.as_ref()).await?;
        info!(action_id = %action.action_id, reason = %reason, "action permitted");
        Ok(())
    }

    async fn deny(&self, pending_fact: &Fact, action: &PendingAction, reason: &str) -> Result<(), RuntimeError> {
        let now = Utc::now();
        self.violations.write().await.insert(
            action.action_id.as_str().to_string(),
            SecurityViolation {
                timestamp: now,
                action_type: action.action_type.clone(),
                target: action.target.clone(),
                reason: reason.to_string(),
            },
        );

        let mut tx = KernelTx::new();
        tx.retract_exact(pending_fact.clone());
        tx.assert(Fact::with_ts(
            "security_violation",
            vec![FactValue::str(&action.action_type), FactValue::str(reason)],
            now,
        ));
        tx.assert(Fact::new(
            "appeal_available",
            vec![
                FactValue::str(action.action_id.as_str()),
                FactValue::str(&action.action_type),
                FactValue::str(&action.target),
                FactValue::str(reason),
            ],
        ));
        let ambiguous = matches!(
            reason,
            "not explicitly permitted (default deny)" | "query failed" | "domain not in allowlist"
        );
        if ambiguous {
            tx.assert(Fact::new(
                "escalation_needed",
                vec![FactValue::str(action.action_id.as_str()), FactValue::str(reason)],
            ));
        }
        tx.commit(self.kernel.as_ref()).await?;
        warn!(action_type = %action.action_type, reason = %reason, "action denied");
        Ok(())
    }

    /// `SubmitAppeal`: rejects duplicates for the same action.
    pub async fn submit_appeal(&self, action_id: &str, justification: &str, requester: &str) -> Result<(), RuntimeError> {
        if !self.violations.read().await.contains_key(action_id) {
            return Err(RuntimeError::NoSuchViolation(action_id.to_string()));
        }
        let mut pending = self.appeals_pending.write().await;
        if !pending.insert(action_id.to_string()) {
            return Err(RuntimeError::DuplicateAppeal(action_id.to_string()));
        }
        self.kernel
            .assert(Fact::new(
                "appeal_pending",
                vec![FactValue::str(action_id), FactValue::str(justification), FactValue::str(requester)],
            ))
            .await?;
        Ok(())
    }

    /// `HandleAppeal`: appeals are one-shot — resolving one clears the
    /// pending marker so a fresh request for the same action is accepted.
    pub async fn handle_appeal(
        &self,
        action_id: &str,
        grant: bool,
        approver: &str,
        temporary: bool,
        duration: Option<Duration>,
    ) -> Result<(), RuntimeError> {
        let action_type = self
            .violations
            .read()
            .await
            .get(action_id)
            .map(|v| v.action_type.clone())
            .ok_or_else(|| RuntimeError::NoSuchViolation(action_id.to_string()))?;

        self.appeals_pending.write().await.remove(action_id);

        if grant {
            let now = Utc::now();
            self.overrides.write().await.insert(
                action_type.clone(),
                ActiveOverride {
                    approver: approver.to_string(),
                    decided_at: now,
                    duration: if temporary { duration } else { None },
                },
            );
            self.kernel
                .assert(Fact::new(
                    "appeal_granted",
                    vec![FactValue::str(action_id), FactValue::str(approver)],
                ))
                .await?;
            if temporary {
                if let Some(d) = duration {
                    let expiration = now + chrono::Duration::from_std(d).unwrap_or_default();
                    self.kernel
                        .assert(Fact::new(
                            "temporary_override",
                            vec![FactValue::str(&action_type), FactValue::str(expiration.to_rfc3339())],
                        ))
                        .await?;
                }
            }
        } else {
            self.kernel
                .assert(Fact::new(
                    "appeal_denied",
                    vec![FactValue::str(action_id), FactValue::str(approver)],
                ))
                .await?;
        }
        Ok(())
    }

    async fn drain_appeal_requests(&self) -> Result<(), RuntimeError> {
        let requests = self.kernel.query("user_requests_appeal").await?;
        for fact in &requests {
            let action_id = fact.args.first().and_then(FactValue::as_str).unwrap_or_default().to_string();
            let justification = fact.args.get(1).and_then(FactValue::as_str).unwrap_or_default().to_string();
            let requester = fact.args.get(2).and_then(FactValue::as_str).unwrap_or("anonymous").to_string();
            let _ = self.submit_appeal(&action_id, &justification, &requester).await;
            self.kernel.retract_exact_fact(fact).await?;
        }
        Ok(())
    }

    /// Validates any LLM-proposed rule via the `FeedbackLoop` before
    /// applying it.
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
            return Ok(());
        }
        let system_prompt = "Propose a Mangle rule for Constitution's unhandled denial cases.";
        let user_prompt = cases
            .iter()
            .map(|c| c.query.clone())
            .collect::<Vec<_>>()
            .join("\n");
        let result = feedback
            .generate_and_validate(llm, validator, system_prompt, &user_prompt, "constitution")
            .await?;
        if result.valid {
            let confidence = if result.auto_fixed { 0.75 } else { 0.9 };
            if confidence >= 0.8 {
                self.kernel.hot_load_learned_rule(&result.rule).await?;
                self.base.record_learning(PatternKind::Success, "constitution_rule", &result.rule).await.ok();
            } else {
                self.kernel
                    .assert(Fact::new("rule_proposal_pending", vec![FactValue::str(&result.rule)]))
                    .await?;
            }
        } else {
            self.kernel
                .assert(Fact::new("rule_proposal_pending", vec![FactValue::str(&result.rule)]))
                .await?;
        }
        Ok(())
    }
}
