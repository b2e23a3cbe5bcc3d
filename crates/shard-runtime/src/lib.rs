//! `shard-runtime` – the system shards that drive the OODA loop.
//!
//! Each shard here owns one stage of Observe–Orient–Decide–Act over the
//! shared [`kernel_api::Kernel`] fact store: [`Constitution`] guards actions
//! against the active policy, [`Router`] dispatches permitted actions to
//! tools, [`Executive`] derives the next action from the latest intent and
//! strategy facts, [`Planner`] decomposes goals into an agenda, [`Legislator`]
//! turns directives into hot-loaded deductive rules, and [`WorldModel`] seeds
//! the fact store with filesystem topology. [`config`] holds each shard's
//! tunables; [`error::RuntimeError`] is the shared failure type;
//! [`llm_driver::OllamaLlmClient`] is the concrete [`kernel_api::LlmClient`]
//! these shards call through `BaseShard::guarded_llm_call`.

pub mod config;
pub mod constitution;
pub mod error;
pub mod executive;
pub mod legislator;
pub mod llm_driver;
pub mod planner;
pub mod router;
pub mod world_model;

pub use config::{AutopoiesisConfig, ConstitutionConfig, ExecutiveConfig, PlannerConfig, RouterConfig};
pub use constitution::Constitution;
pub use error::RuntimeError;
pub use executive::Executive;
pub use legislator::{Legislator, LegislatorOutcome};
pub use llm_driver::{ChatMessage, OllamaLlmClient, Role, STABILITY_GUIDELINES};
pub use planner::Planner;
pub use router::Router;
pub use world_model::{ScanSummary, WorldModel};
