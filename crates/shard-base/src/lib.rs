//! `shard-base` – lifecycle, cost guarding, autopoiesis bookkeeping, and
//! learning persistence shared by every shard.
//!
//! # Modules
//!
//! - [`cost_guard`] – [`CostGuard`][cost_guard::CostGuard]: rate limiting,
//!   idle timeout, and exponential backoff for LLM calls.
//! - [`autopoiesis`] – [`AutopoiesisLoop`][autopoiesis::AutopoiesisLoop]:
//!   buffers unhandled cases until a threshold is crossed.
//! - [`learning`] – [`LearningStore`][learning::LearningStore] and
//!   [`LearningTracker`][learning::LearningTracker]: key-addressed pattern
//!   persistence with confidence thresholds.
//! - [`shard`] – [`BaseShard`][shard::BaseShard]: the `Idle -> Running ->
//!   Completed` state machine and guarded LLM call every shard embeds.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: initializes
//!   the global `tracing` subscriber with an optional OTLP span exporter.

pub mod autopoiesis;
pub mod cost_guard;
pub mod error;
pub mod learning;
pub mod shard;
pub mod telemetry;

pub use autopoiesis::{AutopoiesisLoop, UnhandledCase};
pub use cost_guard::{CostGuard, CostGuardConfig};
pub use error::BaseError;
pub use learning::{LearningStore, LearningTracker, PatternKind};
pub use shard::{BaseShard, ShardState};
pub use telemetry::{init_tracing, TracerProviderGuard};
