//! [`RuleCourt`] – the external sandbox that ratifies a candidate rule
//! before the Legislator hot-loads it.

use async_trait::async_trait;

use crate::error::KernelApiError;

/// Ratifies (or rejects) a rule text. Distinct from [`FeedbackLoop`],
/// which generates/validates syntax and schema; `RuleCourt` is the final
/// safety ratification step before a rule hot-loads.
///
/// [`FeedbackLoop`]: crate::FeedbackLoop
#[async_trait]
pub trait RuleCourt: Send + Sync {
    /// Returns `Ok(true)` if ratified, `Ok(false)` with no error if rejected
    /// for a policy reason (the caller surfaces a human-readable rejection
    /// string rather than treating this as a hard error).
    async fn ratify(&self, rule: &str) -> Result<bool, KernelApiError>;
}
