//! [`Router`] – dispatches `permitted_action` facts to tools.
//!
//! The per-tool rate limiter follows the same sliding-window-counter idiom
//! used elsewhere in this workspace for request pacing, rehomed per-route
//! instead of per-process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use kernel_api::{FeedbackLoop, Kernel, KernelTx, LlmClient, RuleValidator, VirtualStore};
use shard_base::{BaseShard, CostGuardConfig, PatternKind, UnhandledCase};
use shard_middleware::EventBus;
use shard_types::{ActionId, Fact, FactValue, ToolEvent};
use tokio::sync::RwLock;
use tracing::{error, trace};

use crate::config::RouterConfig;
use crate::error::RuntimeError;

const DEFAULT_UNHANDLED_THRESHOLD: usize = 3;

#[derive(Debug, Clone)]
pub struct ToolRoute {
    pub action_pattern: String,
    pub tool_name: String,
    pub timeout: Duration,
    /// Calls allowed per minute; `0` means unlimited.
    pub rate_limit: u32,
    pub requires_safe: bool,
}

/// A representative slice of the full route table, covering every action
/// category the Router dispatches.
fn default_routes() -> Vec<ToolRoute> {
    let r = |pattern: &str, tool: &str, rate_limit: u32, requires_safe: bool| ToolRoute {
        action_pattern: pattern.to_string(),
        tool_name: tool.to_string(),
        timeout: Duration::from_secs(30),
        rate_limit,
        requires_safe,
    };
    vec![
        r("read_file", "fs_read", 0, false),
        r("write_file", "fs_write", 60, true),
        r("edit_file", "fs_edit", 60, true),
        r("delete_file", "fs_delete", 10, true),
        r("fs_read", "fs_read", 0, false),
        r("fs_write", "fs_write", 60, true),
        r("search_files", "fs_search", 30, false),
        r("search_code", "code_search", 30, false),
        r("analyze_code", "code_search", 30, false),
        r("run_tests", "test_runner", 10, true),
        r("run_command", "shell_exec", 10, true),
        r("network", "http_fetch", 20, true),
        r("fetch", "http_fetch", 20, true),
        r("browse", "browser", 10, true),
        r("delegate_reviewer", "shard_manager", 5, false),
        r("delegate_coder", "shard_manager", 5, false),
        r("delegate_researcher", "shard_manager", 5, false),
        r("delegate_tool_generator", "shard_manager", 5, false),
        r("context_compact", "context_manager", 0, false),
        r("context_clear", "context_manager", 0, false),
        r("campaign_start", "campaign_manager", 5, false),
        r("campaign_checkpoint", "campaign_manager", 5, false),
        r("autopoiesis_propose", "rule_proposer", 5, false),
    ]
}

/// Parses an Autopoiesis route proposal in the shared
/// `ACTION:`/`TOOL:`/`TIMEOUT:`/`RATE_LIMIT:`/`REQUIRES_SAFE:` line format.
fn parse_route_proposal(text: &str) -> Option<ToolRoute> {
    let mut action_pattern = None;
    let mut tool_name = None;
    let mut timeout = Duration::from_secs(30);
    let mut rate_limit = 0u32;
    let mut requires_safe = false;
    for line in text.lines() {
        let line = line.trim();
        if let Some(v) = line.strip_prefix("ACTION:") {
            action_pattern = Some(v.trim().trim_start_matches('/').to_string());
        } else if let Some(v) = line.strip_prefix("TOOL:") {
            tool_name = Some(v.trim().to_string());
        } else if let Some(v) = line.strip_prefix("TIMEOUT:") {
            if let Ok(secs) = v.trim().parse::<u64>() {
                timeout = Duration::from_secs(secs);
            }
        } else if let Some(v) = line.strip_prefix("RATE_LIMIT:") {
            if let Ok(n) = v.trim().parse::<u32>() {
                rate_limit = n;
            }
        } else if let Some(v) = line.strip_prefix("REQUIRES_SAFE:") {
            requires_safe = v.trim().eq_ignore_ascii_case("true");
        }
    }
    Some(ToolRoute {
        action_pattern: action_pattern?,
        tool_name: tool_name?,
        timeout,
        rate_limit,
        requires_safe,
    })
}

struct RateBucket {
    count: u32,
    last_reset: Instant,
}

pub struct Router {
    base: BaseShard,
    config: RouterConfig,
    kernel: Arc<dyn Kernel>,
    virtual_store: Option<Arc<dyn VirtualStore>>,
    event_bus: Option<EventBus>,
    routes: RwLock<HashMap<String, ToolRoute>>,
    buckets: RwLock<HashMap<String, RateBucket>>,
    last_prune: RwLock<Instant>,
}

fn score_pattern(pattern: &str, action: &str) -> u8 {
    if pattern == action {
        3
    } else if action.starts_with(pattern) {
        2
    } else if action.contains(pattern) {
        1
    } else {
        0
    }
}

impl Router {
    pub fn new(
        shard_id: impl Into<String>,
        config: RouterConfig,
        kernel: Arc<dyn Kernel>,
        virtual_store: Option<Arc<dyn VirtualStore>>,
        event_bus: Option<EventBus>,
    ) -> Self {
        let routes = default_routes().into_iter().map(|r| (r.action_pattern.clone(), r)).collect();
        Router {
            base: BaseShard::new(shard_id, CostGuardConfig::default(), DEFAULT_UNHANDLED_THRESHOLD),
            config,
            kernel,
            virtual_store,
            event_bus,
            routes: RwLock::new(routes),
            buckets: RwLock::new(HashMap::new()),
            last_prune: RwLock::new(Instant::now()),
        }
    }

    pub fn base(&self) -> &BaseShard {
        &self.base
    }

    /// Deterministic route lookup: exact key, else best-scoring pattern
    /// (ties broken by longer-then-lexicographically-smaller pattern).
    pub async fn lookup_route(&self, action: &str) -> Option<ToolRoute> {
        let normalized = action.strip_prefix('/').unwrap_or(action);
        let routes = self.routes.read().await;
        if let Some(route) = routes.get(normalized) {
            return Some(route.clone());
        }
        routes
            .values()
            .map(|r| (score_pattern(&r.action_pattern, normalized), r))
            .filter(|(score, _)| *score > 0)
            .max_by(|(sa, ra), (sb, rb)| {
                sa.cmp(sb)
                    .then_with(|| ra.action_pattern.len().cmp(&rb.action_pattern.len()))
                    .then_with(|| rb.action_pattern.cmp(&ra.action_pattern))
            })
            .map(|(_, r)| r.clone())
    }

    async fn allow_rate(&self, tool_name: &str, rate_limit: u32) -> bool {
        if rate_limit == 0 {
            return true;
        }
        let mut buckets = self.buckets.write().await;
        let bucket = buckets.entry(tool_name.to_string()).or_insert_with(|| RateBucket {
            count: 0,
            last_reset: Instant::now(),
        });
        if bucket.last_reset.elapsed() >= Duration::from_secs(60) {
            bucket.count = 0;
            bucket.last_reset = Instant::now();
        }
        if bucket.count >= rate_limit {
            false
        } else {
            bucket.count += 1;
            true
        }
    }

    /// One `TickInterval` of draining `permitted_action` and dispatching.
    pub async fn tick(&self) -> Result<(), RuntimeError> {
        let pending = self.kernel.query("permitted_action").await?;
        for fact in &pending {
            self.dispatch(fact).await?;
        }
        self.maybe_prune().await?;
        Ok(())
    }

    async fn dispatch(&self, fact: &Fact) -> Result<(), RuntimeError> {
        let action_id = fact.args.first().and_then(FactValue::as_str).unwrap_or_default().to_string();
        let action_type = fact.args.get(1).and_then(FactValue::as_str).unwrap_or_default().to_string();
        let target = fact.args.get(2).and_then(FactValue::as_str).unwrap_or_default().to_string();
        let payload = fact.args.get(3).cloned().unwrap_or(FactValue::str(""));

        let mut tx = KernelTx::new();
        tx.retract_exact(fact.clone());
        tx.retract_predicate("action_permitted");

        let route = self.lookup_route(&action_type).await;
        let Some(route) = route else {
            tx.commit(self.kernel.as_ref()).await?;
            self.base
                .record_unhandled(UnhandledCase {
                    query: format!("no_route:{action_type}"),
                    context: target,
                    facts_snapshot: Vec::new(),
                    timestamp: Utc::now(),
                })
                .await;
            return Ok(());
        };

        if route.tool_name == "kernel_internal" {
            tx.assert(Fact::with_ts(
                "system_event_handled",
                vec![FactValue::str(&action_type), FactValue::str(&target)],
                Utc::now(),
            ));
            tx.commit(self.kernel.as_ref()).await?;
            return Ok(());
        }

        if !self.allow_rate(&route.tool_name, route.rate_limit).await {
            trace!(tool = %route.tool_name, "rate limit rejection");
            tx.commit(self.kernel.as_ref()).await?;
            return Ok(());
        }

        if let Some(store) = &self.virtual_store {
            let action_id_typed = ActionId::new(action_id.clone());
            let payload_fact = Fact::new("payload", vec![payload]);
            let start = Instant::now();
            let result = store.route_action(&action_id_typed, &action_type, &target, &payload_fact).await;
            let elapsed = start.elapsed();
            let (status, output) = match &result {
                Ok(out) => ("/success", out.clone()),
                Err(e) => {
                    error!(action_id = %action_id, tool = %route.tool_name, error = %e, "tool execution failed");
                    ("/failure", e.to_string())
                }
            };
            let truncated: String = output.chars().take(self.config.output_truncate_chars).collect();
            tx.assert(Fact::with_ts(
                "routing_result",
                vec![
                    FactValue::str(&action_id),
                    FactValue::atom(status),
                    FactValue::str(&truncated),
                ],
                Utc::now(),
            ));
            if let Some(bus) = &self.event_bus {
                bus.publish(ToolEvent {
                    action_id: action_id_typed,
                    tool_name: route.tool_name.clone(),
                    success: result.is_ok(),
                    output: truncated,
                    ts: Utc::now(),
                });
            }
            let _ = elapsed;
        } else {
            tx.assert(Fact::with_ts(
                "exec_request",
                vec![
                    FactValue::str(&route.tool_name),
                    FactValue::str(&target),
                    FactValue::Int(route.timeout.as_secs() as i64),
                    FactValue::str(&action_id),
                ],
                Utc::now(),
            ));
        }

        tx.commit(self.kernel.as_ref()).await?;
        Ok(())
    }

    async fn maybe_prune(&self) -> Result<(), RuntimeError> {
        let mut last_prune = self.last_prune.write().await;
        if last_prune.elapsed() < self.config.prune_interval {
            return Ok(());
        }
        *last_prune = Instant::now();
        drop(last_prune);

        let results = self.kernel.query("routing_result").await?;
        let cutoff = Utc::now() - chrono::Duration::from_std(self.config.routing_result_ttl).unwrap_or_default();
        let stale: Vec<Fact> = results.into_iter().filter(|f| f.ts.map(|ts| ts < cutoff).unwrap_or(false)).collect();
        if !stale.is_empty() {
            self.kernel.retract_exact_facts_batch(&stale).await?;
        }
        Ok(())
    }

    /// Exit cleanly once the cost guard reports no outstanding budget.
    pub async fn is_idle(&self) -> bool {
        self.base.cost_guard().is_idle().await
    }

    /// Proposes and installs a new route for actions that have repeatedly
    /// gone unmatched, following the same validated-generation pattern as
    /// Constitution and Executive.
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
        let system_prompt = "Propose a new tool route for Router's unmatched actions. Reply with \
             ACTION:, TOOL:, TIMEOUT:, RATE_LIMIT:, and REQUIRES_SAFE: lines.";
        let user_prompt = cases.iter().map(|c| c.query.clone()).collect::<Vec<_>>().join("\n");
        let result = feedback.generate_and_validate(llm, validator, system_prompt, &user_prompt, "router").await?;

        if !result.valid || result.confidence < 0.8 {
            self.kernel.assert(Fact::new("rule_proposal_pending", vec![FactValue::str(&result.rule)])).await?;
            return Ok(());
        }
        let Some(route) = parse_route_proposal(&result.rule) else {
            self.kernel.assert(Fact::new("rule_proposal_pending", vec![FactValue::str(&result.rule)])).await?;
            return Ok(());
        };

        let pattern = route.action_pattern.clone();
        let tool_name = route.tool_name.clone();
        self.routes.write().await.insert(pattern.clone(), route);
        self.base.record_learning(PatternKind::Success, "router_route", &pattern).await.ok();
        self.kernel
            .assert(Fact::new("route_installed", vec![FactValue::str(&pattern), FactValue::str(&tool_name)]))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_api::mock::InMemoryKernel;

    fn permitted_action(id: &str, action_type: &str, target: &str) -> Fact {
        Fact::new(
            "permitted_action",
            vec![FactValue::str(id), FactValue::str(action_type), FactValue::str(target), FactValue::str("")],
        )
    }

    #[tokio::test]
    async fn exact_match_outranks_prefix_and_contains() {
        let router = Router::new("router", RouterConfig::default(), Arc::new(InMemoryKernel::new()), None, None);
        let route = router.lookup_route("read_file").await.unwrap();
        assert_eq!(route.tool_name, "fs_read");
    }

    #[tokio::test]
    async fn dispatch_without_virtual_store_emits_exec_request() {
        let kernel = Arc::new(InMemoryKernel::new());
        kernel.assert(permitted_action("r1", "read_file", "a.txt")).await.unwrap();
        let router = Router::new("router", RouterConfig::default(), kernel.clone(), None, None);

        router.tick().await.unwrap();

        let requests = kernel.query("exec_request").await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(kernel.query("permitted_action").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unmatched_action_is_dropped_silently() {
        let kernel = Arc::new(InMemoryKernel::new());
        kernel.assert(permitted_action("r2", "totally_unknown_action", "x")).await.unwrap();
        let router = Router::new("router", RouterConfig::default(), kernel.clone(), None, None);

        router.tick().await.unwrap();

        assert!(kernel.query("exec_request").await.unwrap().is_empty());
        assert!(kernel.query("permitted_action").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rate_limit_blocks_excess_calls_in_same_window() {
        let router = Router::new("router", RouterConfig::default(), Arc::new(InMemoryKernel::new()), None, None);
        assert!(router.allow_rate("delegate", 1).await);
        assert!(!router.allow_rate("delegate", 1).await);
    }

    #[tokio::test]
    async fn unlimited_rate_limit_is_not_rate_limited() {
        let router = Router::new("router", RouterConfig::default(), Arc::new(InMemoryKernel::new()), None, None);
        let route = router.lookup_route("read_file").await.unwrap();
        assert_eq!(route.rate_limit, 0);
    }

    #[tokio::test]
    async fn default_routes_match_documented_tool_names() {
        let router = Router::new("router", RouterConfig::default(), Arc::new(InMemoryKernel::new()), None, None);
        assert_eq!(router.lookup_route("/analyze_code").await.unwrap().tool_name, "code_search");
        assert_eq!(router.lookup_route("/fs_read").await.unwrap().tool_name, "fs_read");
        assert_eq!(router.lookup_route("/delegate_reviewer").await.unwrap().tool_name, "shard_manager");
    }

    #[tokio::test]
    async fn autopoiesis_installs_high_confidence_route_proposal() {
        use kernel_api::mock::{AlwaysValidFeedbackLoop, PermissiveRuleValidator, ScriptedLlmClient};

        let kernel = Arc::new(InMemoryKernel::new());
        let router = Router::new("router", RouterConfig::default(), kernel.clone(), None, None);
        for _ in 0..DEFAULT_UNHANDLED_THRESHOLD {
            router
                .base()
                .record_unhandled(UnhandledCase {
                    query: "no_route:/deploy_canary".to_string(),
                    context: String::new(),
                    facts_snapshot: Vec::new(),
                    timestamp: Utc::now(),
                })
                .await;
        }

        let llm = ScriptedLlmClient::new(
            "ACTION: deploy_canary\nTOOL: kernel_internal\nTIMEOUT: 30\nRATE_LIMIT: 5\nREQUIRES_SAFE: true",
        );
        let feedback = AlwaysValidFeedbackLoop::new();

        router.run_autopoiesis(&llm, &feedback, &PermissiveRuleValidator).await.unwrap();

        let route = router.lookup_route("/deploy_canary").await.unwrap();
        assert_eq!(route.tool_name, "kernel_internal");
        assert_eq!(kernel.query("route_installed").await.unwrap().len(), 1);
    }
}
