//! `kernel-api` – the external collaborator boundary.
//!
//! The deductive engine (`Kernel`), the tool executor (`VirtualStore`), LLM
//! providers (`LlmClient`), the NL transducer (`Transducer`), the rule
//! generation/validation pipeline (`FeedbackLoop`), and the rule sandbox
//! (`RuleCourt`) are all out of scope for this workspace — they are given
//! collaborators, consumed only through the traits defined here. Each trait
//! ships an in-memory test double under [`mock`] so the rest of the
//! workspace can be exercised without a real deductive engine attached.
//!
//! # Modules
//!
//! - [`kernel`] – the [`Kernel`][kernel::Kernel] trait and [`KernelTx`][kernel::KernelTx],
//!   the fact store every shard reads and writes.
//! - [`virtual_store`] – [`VirtualStore`][virtual_store::VirtualStore], the
//!   synchronous tool executor the Router prefers when attached.
//! - [`llm_client`] – [`LlmClient`][llm_client::LlmClient], an
//!   OpenAI-compatible completion interface.
//! - [`transducer`] – [`Transducer`][transducer::Transducer], NL input to a
//!   structured intent envelope.
//! - [`feedback_loop`] – [`FeedbackLoop`][feedback_loop::FeedbackLoop], the
//!   validated rule-generation pipeline Autopoiesis and Legislator share.
//! - [`rule_court`] – [`RuleCourt`][rule_court::RuleCourt], the external
//!   sandbox that ratifies a rule before it is hot-loaded.

pub mod error;
pub mod feedback_loop;
pub mod kernel;
pub mod llm_client;
pub mod mock;
pub mod rule_court;
pub mod transducer;
pub mod virtual_store;

pub use error::KernelApiError;
pub use feedback_loop::{FeedbackLoop, PredicateSelector, RuleGenerationResult, RuleValidator};
pub use kernel::{Corpus, CorpusEntry, Kernel, KernelTx};
pub use llm_client::LlmClient;
pub use rule_court::RuleCourt;
pub use transducer::{ParsedIntent, Transducer, TransducerOutput};
pub use virtual_store::VirtualStore;
