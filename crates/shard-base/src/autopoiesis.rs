//! [`AutopoiesisLoop`] – buffers unhandled queries until enough of them have
//! accumulated to justify an LLM rule-synthesis pass.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use shard_types::Fact;

/// A single unhandled query captured for later rule synthesis.
#[derive(Debug, Clone)]
pub struct UnhandledCase {
    pub query: String,
    pub context: String,
    pub facts_snapshot: Vec<Fact>,
    pub timestamp: DateTime<Utc>,
}

/// Accumulates [`UnhandledCase`]s and reports when enough have built up to
/// warrant invoking the `FeedbackLoop`.
pub struct AutopoiesisLoop {
    threshold: usize,
    buffer: VecDeque<UnhandledCase>,
    proposals_recorded: usize,
    rules_applied: usize,
}

impl AutopoiesisLoop {
    /// `threshold` is `UnhandledThreshold`; the default is 3.
    pub fn new(threshold: usize) -> Self {
        AutopoiesisLoop {
            threshold: threshold.max(1),
            buffer: VecDeque::new(),
            proposals_recorded: 0,
            rules_applied: 0,
        }
    }

    pub fn record_unhandled(&mut self, case: UnhandledCase) {
        self.buffer.push_back(case);
    }

    /// True once the buffer has reached `UnhandledThreshold`.
    pub fn should_propose(&self) -> bool {
        self.buffer.len() >= self.threshold
    }

    /// Drains and returns every buffered case.
    pub fn get_unhandled_cases(&mut self) -> Vec<UnhandledCase> {
        self.buffer.drain(..).collect()
    }

    pub fn record_proposal(&mut self) {
        self.proposals_recorded += 1;
    }

    pub fn record_applied_rule(&mut self) {
        self.rules_applied += 1;
    }

    pub fn proposals_recorded(&self) -> usize {
        self.proposals_recorded
    }

    pub fn rules_applied(&self) -> usize {
        self.rules_applied
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(query: &str) -> UnhandledCase {
        UnhandledCase {
            query: query.to_string(),
            context: String::new(),
            facts_snapshot: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn does_not_propose_below_threshold() {
        let mut loop_ = AutopoiesisLoop::new(3);
        loop_.record_unhandled(case("q1"));
        loop_.record_unhandled(case("q2"));
        assert!(!loop_.should_propose());
    }

    #[test]
    fn proposes_at_threshold() {
        let mut loop_ = AutopoiesisLoop::new(3);
        loop_.record_unhandled(case("q1"));
        loop_.record_unhandled(case("q2"));
        loop_.record_unhandled(case("q3"));
        assert!(loop_.should_propose());
    }

    #[test]
    fn drain_empties_buffer() {
        let mut loop_ = AutopoiesisLoop::new(1);
        loop_.record_unhandled(case("q1"));
        let drained = loop_.get_unhandled_cases();
        assert_eq!(drained.len(), 1);
        assert_eq!(loop_.buffered_len(), 0);
        assert!(!loop_.should_propose());
    }

    #[test]
    fn audit_counters_increment_independently() {
        let mut loop_ = AutopoiesisLoop::new(1);
        loop_.record_proposal();
        loop_.record_proposal();
        loop_.record_applied_rule();
        assert_eq!(loop_.proposals_recorded(), 2);
        assert_eq!(loop_.rules_applied(), 1);
    }

    #[test]
    fn threshold_of_zero_is_clamped_to_one() {
        let loop_ = AutopoiesisLoop::new(0);
        assert!(!loop_.should_propose());
    }
}
