//! `shard-memory` – persistent state backing the shard fleet's learning and
//! planning.
//!
//! # Modules
//!
//! - [`learning_store`] – [`LearningStore`][learning_store::LearningStore] /
//!   [`SqliteLearningStore`][learning_store::SqliteLearningStore]: key-addressed
//!   success/failure/correction pattern persistence with confidence decay.
//! - [`agenda`] – [`AgendaStore`][agenda::AgendaStore]: Planner's shared
//!   goal-decomposition queue with claim/complete/retry-to-escalation.

pub mod agenda;
pub mod error;
pub mod learning_store;

pub use agenda::{AgendaItem, AgendaStatus, AgendaStore};
pub use error::MemoryError;
pub use learning_store::{LearningRecord, LearningStore, SqliteLearningStore};
