//! [`Planner`] – decomposes a goal into a shared agenda and tracks task
//! lifecycle against it.
//!
//! Persistence is delegated to [`shard_memory::AgendaStore`]; this module
//! owns the LLM-driven decomposition, the Kernel-fact mirror of each agenda
//! item, and the periodic sync/checkpoint tick, one layer above the
//! store's own claim-then-complete lifecycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use kernel_api::{Kernel, KernelTx};
use serde::Deserialize;
use shard_base::{BaseShard, CostGuardConfig};
use shard_memory::{AgendaItem, AgendaStatus, AgendaStore};
use shard_types::{Fact, FactValue};
use tokio::sync::RwLock;
use tracing::warn;

use crate::config::PlannerConfig;
use crate::error::RuntimeError;

const DEFAULT_UNHANDLED_THRESHOLD: usize = 3;

#[derive(Debug, Deserialize)]
struct RawTask {
    description: String,
    #[serde(default)]
    priority: Option<u32>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    estimated_minutes: Option<u32>,
}

fn parse_json_tasks(text: &str) -> Option<Vec<RawTask>> {
    serde_json::from_str(text).ok()
}

/// Fallback parse for a numbered text list (`"1. Do X\n2. Do Y"`).
fn parse_numbered_list(text: &str) -> Vec<RawTask> {
    text.lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            let rest = trimmed
                .split_once('.')
                .map(|(prefix, rest)| (prefix.trim().parse::<u32>().is_ok(), rest))
                .filter(|(is_numbered, _)| *is_numbered)
                .map(|(_, rest)| rest.trim().to_string())?;
            if rest.is_empty() {
                None
            } else {
                Some(RawTask { description: rest, priority: None, dependencies: Vec::new(), estimated_minutes: None })
            }
        })
        .collect()
}

pub struct Planner {
    base: BaseShard,
    config: PlannerConfig,
    kernel: Arc<dyn Kernel>,
    agenda: AgendaStore,
    /// Kernel-facing `task-<unix>-<i>` id -> `AgendaStore` row id.
    task_ids: RwLock<HashMap<String, String>>,
    last_checkpoint: RwLock<Instant>,
}

impl Planner {
    pub fn new(shard_id: impl Into<String>, config: PlannerConfig, kernel: Arc<dyn Kernel>, agenda: AgendaStore) -> Self {
        Planner {
            base: BaseShard::new(shard_id, CostGuardConfig::default(), DEFAULT_UNHANDLED_THRESHOLD),
            config,
            kernel,
            agenda,
            task_ids: RwLock::new(HashMap::new()),
            last_checkpoint: RwLock::new(Instant::now()),
        }
    }

    pub fn base(&self) -> &BaseShard {
        &self.base
    }

    /// Decompose `goal` into agenda items via the LLM. Rejects the
    /// degenerate `"system_start"` goal and empty input.
    pub async fn decompose_goal(&self, goal: &str) -> Result<Vec<String>, RuntimeError> {
        if goal.trim().is_empty() || goal.trim() == "system_start" {
            return Ok(Vec::new());
        }
        let system_prompt = "Decompose the goal into an ordered list of tasks. \
             Reply with a JSON array of {description, priority, dependencies, estimated_minutes}.";
        let reply = self
            .base
            .guarded_llm_call(system_prompt, goal)
            .await
            .map_err(RuntimeError::Base)?;

        let tasks = parse_json_tasks(&reply).unwrap_or_else(|| parse_numbered_list(&reply));
        let unix = Utc::now().timestamp();
        let mut ids = Vec::with_capacity(tasks.len());
        let mut tx = KernelTx::new();
        for (i, task) in tasks.iter().enumerate() {
            let task_id = format!("task-{unix}-{i}");
            let store_id = self.agenda.post(goal, &task.description).await?;
            self.agenda.claim(&store_id, self.base.shard_id()).await.ok();
            self.task_ids.write().await.insert(task_id.clone(), store_id);
            tx.assert(Fact::new(
                "agenda_item",
                vec![
                    FactValue::str(&task_id),
                    FactValue::str(goal),
                    FactValue::str(&task.description),
                    FactValue::atom("pending"),
                    FactValue::Int(task.priority.unwrap_or(0) as i64),
                ],
            ));
            ids.push(task_id);
        }
        tx.commit(self.kernel.as_ref()).await?;
        Ok(ids)
    }

    /// One `TickInterval` (default 5s): sync status, checkpoint, escalate.
    pub async fn tick(&self) -> Result<(), RuntimeError> {
        self.sync_task_status("task_completed", true).await?;
        self.sync_task_status("task_blocked", false).await?;
        self.maybe_checkpoint().await?;
        self.emit_status().await?;
        Ok(())
    }

    async fn sync_task_status(&self, predicate: &str, completed: bool) -> Result<(), RuntimeError> {
        let facts = self.kernel.query(predicate).await?;
        if facts.is_empty() {
            return Ok(());
        }
        // Retract only the stale `campaign_task` entries belonging to the
        // tasks touched this pass, not the predicate wholesale — other
        // tasks' rows must survive this sync.
        let existing = self.kernel.query("campaign_task").await?;
        for fact in &facts {
            let Some(task_id) = fact.args.first().and_then(FactValue::as_str) else { continue };
            let Some(store_id) = self.task_ids.read().await.get(task_id).cloned() else { continue };
            let new_status = if completed {
                self.agenda.claim(&store_id, self.base.shard_id()).await.ok();
                self.agenda.complete(&store_id, self.base.shard_id()).await.ok();
                AgendaStatus::Completed
            } else {
                self.agenda.retry_or_block(&store_id).await.unwrap_or(AgendaStatus::Blocked)
            };
            if new_status == AgendaStatus::Blocked && !completed {
                warn!(task_id = %task_id, "task escalated to blocked after exceeding retry budget");
            }
            let mut tx = KernelTx::new();
            for stale in existing.iter().filter(|f| f.args.first().and_then(FactValue::as_str) == Some(task_id)) {
                tx.retract_exact(stale.clone());
            }
            tx.retract_exact(fact.clone());
            tx.assert(Fact::new(
                "campaign_task",
                vec![FactValue::str(task_id), FactValue::atom(status_atom(new_status))],
            ));
            tx.commit(self.kernel.as_ref()).await?;
        }
        Ok(())
    }

    async fn maybe_checkpoint(&self) -> Result<(), RuntimeError> {
        let mut last = self.last_checkpoint.write().await;
        if last.elapsed() < self.config.auto_checkpoint_every {
            return Ok(());
        }
        *last = Instant::now();
        drop(last);
        self.kernel
            .assert(Fact::with_ts("plan_checkpoint", vec![FactValue::str("auto")], Utc::now()))
            .await?;
        Ok(())
    }

    async fn emit_status(&self) -> Result<(), RuntimeError> {
        let items = self.agenda.list_all().await?;
        let completed = items.iter().filter(|i| i.status == AgendaStatus::Completed).count();
        let total = items.len();
        let mut tx = KernelTx::new();
        tx.retract_predicate("session_planner_status");
        tx.retract_predicate("plan_progress");
        tx.retract_predicate("plan_task");
        tx.assert(Fact::new(
            "session_planner_status",
            vec![FactValue::Int(total as i64), FactValue::Int(completed as i64)],
        ));
        tx.assert(Fact::new(
            "plan_progress",
            vec![FactValue::Float(if total == 0 { 0.0 } else { completed as f64 / total as f64 })],
        ));
        for item in &items {
            tx.assert(Fact::new(
                "plan_task",
                vec![FactValue::str(&item.id), FactValue::atom(item.status.clone().as_ref())],
            ));
        }
        tx.commit(self.kernel.as_ref()).await?;
        Ok(())
    }

    pub async fn is_idle(&self) -> bool {
        self.base.cost_guard().is_idle().await
    }

    pub async fn format_as_markdown(&self) -> Result<String, RuntimeError> {
        let items = self.agenda.list_all().await?;
        Ok(format_markdown(&items))
    }

    pub async fn format_as_json(&self) -> Result<String, RuntimeError> {
        let items = self.agenda.list_all().await?;
        serde_json::to_string_pretty(&items).map_err(|e| RuntimeError::Walk(e.to_string()))
    }
}

fn status_atom(status: AgendaStatus) -> &'static str {
    match status {
        AgendaStatus::Pending => "pending",
        AgendaStatus::Claimed => "claimed",
        AgendaStatus::Completed => "completed",
        AgendaStatus::Blocked => "blocked",
    }
}

fn format_markdown(items: &[AgendaItem]) -> String {
    let mut out = String::from("# Plan\n\n");
    for item in items {
        let marker = if item.status == AgendaStatus::Completed { "x" } else { " " };
        out.push_str(&format!("- [{marker}] {} ({:?})\n", item.description, item.status));
    }
    out
}

trait AgendaStatusAsRef {
    fn as_ref(self) -> &'static str;
}

impl AgendaStatusAsRef for AgendaStatus {
    fn as_ref(self) -> &'static str {
        status_atom(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_api::mock::InMemoryKernel;

    fn planner() -> Planner {
        Planner::new(
            "planner",
            PlannerConfig::default(),
            Arc::new(InMemoryKernel::new()),
            AgendaStore::open_in_memory(3).unwrap(),
        )
    }

    #[test]
    fn parses_numbered_list_fallback() {
        let tasks = parse_numbered_list("1. write tests\n2. fix bug\nnotes: ignore this line");
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].description, "write tests");
    }

    #[tokio::test]
    async fn system_start_goal_produces_no_tasks() {
        let planner = planner();
        let ids = planner.decompose_goal("system_start").await.unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn empty_goal_produces_no_tasks() {
        let planner = planner();
        let ids = planner.decompose_goal("   ").await.unwrap();
        assert!(ids.is_empty());
    }

    #[test]
    fn markdown_format_marks_completed_items() {
        let items = vec![AgendaItem {
            id: "t1".to_string(),
            goal: "g".to_string(),
            description: "ship it".to_string(),
            status: AgendaStatus::Completed,
            claimed_by: None,
            retries: 0,
            created_at: "now".to_string(),
            updated_at: "now".to_string(),
        }];
        let md = format_markdown(&items);
        assert!(md.contains("[x] ship it"));
    }
}
