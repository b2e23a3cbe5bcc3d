//! [`Kernel`] – the deductive fact store every shard reads and writes.
//!
//! The deductive engine itself, its own concurrency model, and rule
//! stratification/compilation are the Kernel's own responsibility, out of
//! scope here. This crate only defines the boundary the fabric consumes.

use std::sync::Arc;

use async_trait::async_trait;
use shard_types::Fact;

use crate::error::KernelApiError;
use crate::virtual_store::VirtualStore;

/// A predicate the Kernel currently knows how to assert or derive over, and
/// the arity it has been observed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusEntry {
    pub predicate: String,
    pub arity: usize,
}

/// The set of predicates the Kernel currently exposes, consulted by
/// Autopoiesis and the Legislator so a proposed rule only references
/// predicates the Kernel actually knows about.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    pub entries: Vec<CorpusEntry>,
}

impl Corpus {
    pub fn contains(&self, predicate: &str) -> bool {
        self.entries.iter().any(|e| e.predicate == predicate)
    }
}

/// The deductive store. Facts are the sole inter-shard communication medium;
/// no shard reads another shard's internal state directly.
#[async_trait]
pub trait Kernel: Send + Sync {
    async fn assert(&self, fact: Fact) -> Result<(), KernelApiError>;

    async fn assert_batch(&self, facts: Vec<Fact>) -> Result<(), KernelApiError>;

    /// Retract every fact whose predicate matches, regardless of arguments.
    async fn retract(&self, predicate: &str) -> Result<(), KernelApiError>;

    /// Retract a fact matching on predicate + a caller-supplied equality
    /// check left to the Kernel's own unification rules.
    async fn retract_fact(&self, fact: &Fact) -> Result<(), KernelApiError>;

    /// Retract exactly the fact observed, matched by full structural
    /// equality — callers must not guess at other intent.
    async fn retract_exact_fact(&self, fact: &Fact) -> Result<(), KernelApiError>;

    async fn retract_exact_facts_batch(&self, facts: &[Fact]) -> Result<(), KernelApiError>;

    async fn query(&self, predicate: &str) -> Result<Vec<Fact>, KernelApiError>;

    async fn hot_load_rule(&self, text: &str) -> Result<(), KernelApiError>;

    async fn hot_load_learned_rule(&self, text: &str) -> Result<(), KernelApiError>;

    async fn validate_learned_rules(&self, texts: &[String]) -> Result<Vec<String>, KernelApiError>;

    /// The predicates currently known to the Kernel, for sandbox checks
    /// ahead of rule generation.
    async fn get_predicate_corpus(&self) -> Result<Corpus, KernelApiError>;

    /// The tool executor the Kernel is wired to, if any.
    async fn get_virtual_store(&self) -> Result<Option<Arc<dyn VirtualStore>>, KernelApiError>;
}

/// Batches retracts/asserts into a single commit to avoid incremental
/// rebuilds and to avoid observable intermediate states — e.g. Perception
/// clears stale ephemera and asserts the new intent in one transaction.
#[derive(Debug, Default)]
pub struct KernelTx {
    retract_predicates: Vec<String>,
    retract_exact: Vec<Fact>,
    asserts: Vec<Fact>,
}

impl KernelTx {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retract_predicate(&mut self, predicate: impl Into<String>) -> &mut Self {
        self.retract_predicates.push(predicate.into());
        self
    }

    pub fn retract_exact(&mut self, fact: Fact) -> &mut Self {
        self.retract_exact.push(fact);
        self
    }

    pub fn assert(&mut self, fact: Fact) -> &mut Self {
        self.asserts.push(fact);
        self
    }

    /// Apply every buffered operation against `kernel`. Retracts run before
    /// asserts so a transaction can cleanly replace `/current_intent`.
    pub async fn commit(self, kernel: &dyn Kernel) -> Result<(), KernelApiError> {
        for predicate in &self.retract_predicates {
            kernel.retract(predicate).await?;
        }
        if !self.retract_exact.is_empty() {
            kernel.retract_exact_facts_batch(&self.retract_exact).await?;
        }
        if !self.asserts.is_empty() {
            kernel.assert_batch(self.asserts).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::InMemoryKernel;
    use shard_types::FactValue;

    #[tokio::test]
    async fn tx_retracts_before_asserting() {
        let kernel = InMemoryKernel::new();
        kernel
            .assert(Fact::new("user_intent", vec![FactValue::atom("stale")]))
            .await
            .unwrap();

        let mut tx = KernelTx::new();
        tx.retract_predicate("user_intent");
        tx.assert(Fact::new("user_intent", vec![FactValue::atom("fresh")]));
        tx.commit(&kernel).await.unwrap();

        let facts = kernel.query("user_intent").await.unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].args[0], FactValue::atom("fresh"));
    }
}
