//! [`Transducer`] – NL input to a structured intent envelope, consumed by
//! Perception.

use async_trait::async_trait;
use shard_types::{Atom, Fact};

use crate::error::KernelApiError;

/// The structured envelope a `Transducer` parses free-text input into.
#[derive(Debug, Clone)]
pub struct ParsedIntent {
    pub category: Atom,
    pub verb: Atom,
    pub target: Option<String>,
    pub constraint: Option<String>,
    /// Confidence in `[0.0, 1.0]`.
    pub confidence: f64,
}

/// The full result of `parse_intent_with_gcd`: the parsed intent plus any
/// Mangle-rule updates the transducer proposes. Perception applies these
/// under a conservative policy.
#[derive(Debug, Clone)]
pub struct TransducerOutput {
    pub intent: ParsedIntent,
    pub mangle_updates: Vec<Fact>,
}

#[async_trait]
pub trait Transducer: Send + Sync {
    /// Parse `input` (with `history` as prior-turn context) into a
    /// [`TransducerOutput`], retrying internally up to `max_retries` times
    /// on malformed model output.
    async fn parse_intent_with_gcd(
        &self,
        input: &str,
        history: &[String],
        max_retries: u32,
    ) -> Result<TransducerOutput, KernelApiError>;
}
