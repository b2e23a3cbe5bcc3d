//! [`LearningTracker`] – in-memory success/failure/correction pattern
//! counters, persisted to a [`LearningStore`] once a kind's threshold is
//! crossed.

use std::collections::HashMap;
use std::sync::Arc;

use shard_memory::LearningStore;
use shard_types::FactValue;

use crate::error::BaseError;

/// The three pattern kinds `BaseShard` tracks, each with its own threshold
/// before a pattern is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternKind {
    Success,
    Failure,
    Correction,
}

impl PatternKind {
    pub fn threshold(&self) -> u32 {
        match self {
            PatternKind::Success => 3,
            PatternKind::Failure => 2,
            PatternKind::Correction => 2,
        }
    }

    fn predicate(&self) -> &'static str {
        match self {
            PatternKind::Success => "learned_success",
            PatternKind::Failure => "learned_failure",
            PatternKind::Correction => "learned_correction",
        }
    }

    fn from_predicate(predicate: &str) -> Option<Self> {
        match predicate {
            "learned_success" => Some(PatternKind::Success),
            "learned_failure" => Some(PatternKind::Failure),
            "learned_correction" => Some(PatternKind::Correction),
            _ => None,
        }
    }
}

/// Per-shard pattern counters. Construct with [`LearningTracker::new`], then
/// call [`LearningTracker::set_learning_store`] once a backend is available.
pub struct LearningTracker {
    shard_id: String,
    store: Option<Arc<dyn LearningStore>>,
    counts: HashMap<(PatternKind, String), u32>,
}

impl LearningTracker {
    pub fn new(shard_id: impl Into<String>) -> Self {
        LearningTracker { shard_id: shard_id.into(), store: None, counts: HashMap::new() }
    }

    /// Attach a persistence backend and hydrate already-learned patterns for
    /// this shard, seeding their in-memory counter at the kind's threshold so
    /// they are not immediately re-learned from scratch.
    pub async fn set_learning_store(&mut self, store: Arc<dyn LearningStore>) -> Result<(), BaseError> {
        let records = store.load(&self.shard_id).await?;
        for record in &records {
            if let Some(kind) = PatternKind::from_predicate(&record.predicate) {
                if let Some(FactValue::Str(key)) = record.args.first() {
                    self.counts.insert((kind, key.clone()), kind.threshold());
                }
            }
        }
        self.store = Some(store);
        Ok(())
    }

    /// Record one occurrence of `kind` for `key`. Persists once the running
    /// count reaches (or has already crossed) the kind's threshold; the
    /// persisted confidence asymptotically approaches 1.0 as the count grows
    /// past threshold.
    pub async fn record(&mut self, kind: PatternKind, key: &str, source: &str) -> Result<(), BaseError> {
        let counter = self.counts.entry((kind, key.to_string())).or_insert(0);
        *counter += 1;
        let count = *counter;
        let threshold = kind.threshold();
        if count >= threshold {
            if let Some(store) = &self.store {
                let confidence = 1.0 - 1.0 / (1.0 + (count - threshold + 1) as f64);
                store
                    .save(&self.shard_id, kind.predicate(), &[FactValue::str(key)], source, confidence)
                    .await?;
            }
        }
        Ok(())
    }

    pub fn count(&self, kind: PatternKind, key: &str) -> u32 {
        self.counts.get(&(kind, key.to_string())).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shard_memory::SqliteLearningStore;

    #[tokio::test]
    async fn below_threshold_does_not_persist() {
        let store: Arc<dyn LearningStore> = Arc::new(SqliteLearningStore::open_in_memory().unwrap());
        let mut tracker = LearningTracker::new("perception-1");
        tracker.set_learning_store(store.clone()).await.unwrap();
        tracker.record(PatternKind::Success, "move:file", "perception").await.unwrap();
        let records = store.load("perception-1").await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn crossing_threshold_persists() {
        let store: Arc<dyn LearningStore> = Arc::new(SqliteLearningStore::open_in_memory().unwrap());
        let mut tracker = LearningTracker::new("perception-1");
        tracker.set_learning_store(store.clone()).await.unwrap();
        for _ in 0..PatternKind::Success.threshold() {
            tracker.record(PatternKind::Success, "move:file", "perception").await.unwrap();
        }
        let records = store.load("perception-1").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].predicate, "learned_success");
    }

    #[tokio::test]
    async fn hydration_suppresses_immediate_relearning() {
        let store: Arc<dyn LearningStore> = Arc::new(SqliteLearningStore::open_in_memory().unwrap());
        store
            .save("perception-1", "learned_failure", &[FactValue::str("ambiguous:go")], "prior-session", 0.75)
            .await
            .unwrap();

        let mut tracker = LearningTracker::new("perception-1");
        tracker.set_learning_store(store.clone()).await.unwrap();
        assert_eq!(tracker.count(PatternKind::Failure, "ambiguous:go"), PatternKind::Failure.threshold());

        // One more occurrence should immediately re-persist (count already >= threshold).
        tracker.record(PatternKind::Failure, "ambiguous:go", "perception").await.unwrap();
        let records = store.load_by_predicate("perception-1", "learned_failure").await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn distinct_keys_tracked_independently() {
        let store: Arc<dyn LearningStore> = Arc::new(SqliteLearningStore::open_in_memory().unwrap());
        let mut tracker = LearningTracker::new("s1");
        tracker.set_learning_store(store).await.unwrap();
        tracker.record(PatternKind::Correction, "a", "src").await.unwrap();
        tracker.record(PatternKind::Correction, "b", "src").await.unwrap();
        assert_eq!(tracker.count(PatternKind::Correction, "a"), 1);
        assert_eq!(tracker.count(PatternKind::Correction, "b"), 1);
    }
}
