//! Wires the external-collaborator implementations and the shard fleet
//! together into one process.
//!
//! The deductive `Kernel`, the tool `VirtualStore`, and the
//! rule-ratification `RuleCourt` are external collaborators with no
//! production implementation in scope here, so this binary uses the
//! in-memory test doubles from `kernel_api::mock`. The LLM is real: an
//! [`OllamaLlmClient`] when a local Ollama instance answers, a scripted
//! stand-in otherwise so the fleet still boots offline.
//!
//! Perception, Executive, and Constitution start automatically as
//! background tick loops; Router, Planner, Legislator, and WorldModel are
//! held ready and driven on demand by REPL commands.

use std::sync::Arc;
use std::time::Duration;

use kernel_api::mock::{
    AlwaysValidFeedbackLoop, EchoVirtualStore, InMemoryKernel, PermissiveRuleCourt, PermissiveRuleValidator, ScriptedLlmClient,
};
use kernel_api::{FeedbackLoop, Kernel, LlmClient, RuleCourt, RuleValidator, Transducer, VirtualStore};
use shard_memory::AgendaStore;
use shard_middleware::EventBus;
use shard_perception::config::PerceptionConfig;
use shard_perception::Perception;
use shard_runtime::config::{ConstitutionConfig, ExecutiveConfig, PlannerConfig, RouterConfig};
use shard_runtime::{Constitution, Executive, Legislator, OllamaLlmClient, Planner, Router, WorldModel};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::Config;
use crate::transducer::LlmTransducer;

pub struct Fleet {
    pub kernel: Arc<dyn Kernel>,
    pub llm: Arc<dyn LlmClient>,
    pub feedback: Arc<dyn FeedbackLoop>,
    pub rule_validator: Arc<dyn RuleValidator>,
    pub rule_court: Arc<dyn RuleCourt>,
    pub virtual_store: Arc<dyn VirtualStore>,
    pub perception: Arc<Perception>,
    pub executive: Arc<Executive>,
    pub constitution: Arc<Constitution>,
    pub router: Arc<Router>,
    pub planner: Arc<Planner>,
    pub legislator: Arc<Legislator>,
    pub world_model: Arc<WorldModel>,
    background: Vec<JoinHandle<()>>,
}

impl Fleet {
    pub async fn boot(cfg: &Config, ollama_reachable: bool) -> Self {
        let kernel: Arc<dyn Kernel> = Arc::new(InMemoryKernel::new());
        let llm: Arc<dyn LlmClient> = if ollama_reachable {
            Arc::new(OllamaLlmClient::new(cfg.ollama_url.clone(), cfg.active_model.clone()))
        } else {
            Arc::new(ScriptedLlmClient::new(""))
        };
        let feedback: Arc<dyn FeedbackLoop> = Arc::new(AlwaysValidFeedbackLoop::new());
        let rule_validator: Arc<dyn RuleValidator> = Arc::new(PermissiveRuleValidator);
        let rule_court: Arc<dyn RuleCourt> = Arc::new(PermissiveRuleCourt);
        let virtual_store: Arc<dyn VirtualStore> = Arc::new(EchoVirtualStore::default());
        let transducer: Arc<dyn Transducer> = Arc::new(LlmTransducer::new(llm.clone()));

        let perception = Arc::new(Perception::new("perception", PerceptionConfig::default(), kernel.clone(), transducer));
        perception.base().set_llm_client(llm.clone()).await;

        let executive = Arc::new(Executive::new("executive", ExecutiveConfig::default(), kernel.clone(), cfg.strict_barriers));
        executive.base().set_llm_client(llm.clone()).await;

        let constitution_cfg = ConstitutionConfig {
            allowed_domains: cfg.allowed_domains.clone(),
            strict_mode: cfg.strict_mode,
            ..ConstitutionConfig::default()
        };
        let constitution = Arc::new(Constitution::new("constitution", constitution_cfg, kernel.clone()));
        constitution.base().set_llm_client(llm.clone()).await;

        let event_bus = EventBus::new(256);
        let router = Arc::new(Router::new("router", RouterConfig::default(), kernel.clone(), Some(virtual_store.clone()), Some(event_bus)));

        let agenda = AgendaStore::open_in_memory(cfg.max_task_retries).expect("in-memory agenda store always opens");
        let planner = Arc::new(Planner::new("planner", PlannerConfig::default(), kernel.clone(), agenda));
        planner.base().set_llm_client(llm.clone()).await;

        let legislator = Arc::new(Legislator::new("legislator", kernel.clone(), rule_court.clone()));
        legislator.base().set_llm_client(llm.clone()).await;

        let world_model = Arc::new(WorldModel::new("world_model", kernel.clone(), Some(virtual_store.clone())));

        let mut fleet = Fleet {
            kernel,
            llm,
            feedback,
            rule_validator,
            rule_court,
            virtual_store,
            perception,
            executive,
            constitution,
            router,
            planner,
            legislator,
            world_model,
            background: Vec::new(),
        };
        fleet.start_automatic_shards().await;
        fleet
    }

    /// Perception, Executive, Constitution start automatically; the rest
    /// are ticked on demand by the REPL.
    async fn start_automatic_shards(&mut self) {
        self.perception.base().start().await.ok();
        self.executive.base().start().await.ok();
        self.constitution.base().start().await.ok();

        let perception = self.perception.clone();
        self.background.push(tokio::spawn(async move { perception.run().await }));

        let executive = self.executive.clone();
        self.background.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(100));
            loop {
                tokio::select! {
                    _ = executive.base().stopped() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = executive.tick().await {
                            warn!(error = %e, "executive tick failed");
                        }
                    }
                }
            }
        }));

        let constitution = self.constitution.clone();
        self.background.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(50));
            loop {
                tokio::select! {
                    _ = constitution.base().stopped() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = constitution.tick().await {
                            warn!(error = %e, "constitution tick failed");
                        }
                    }
                }
            }
        }));
    }

    pub async fn shutdown(&mut self) {
        self.perception.base().stop().await;
        self.executive.base().stop().await;
        self.constitution.base().stop().await;
        for handle in self.background.drain(..) {
            handle.abort();
        }
    }
}
