//! `shard-middleware` – the optional tool event bus.
//!
//! Inter-shard communication is exclusively through Kernel facts; this
//! crate is strictly an observability side-channel the Router publishes
//! truncated tool-call output to, for anything watching live (a dashboard,
//! a log shipper) without querying the Kernel.
//!
//! # Modules
//!
//! - [`bus`] – Headless, topic-based publish/subscribe event bus built on
//!   Tokio broadcast channels.

pub mod bus;

pub use bus::{EventBus, TopicSubscriber};
