//! [`WorldModel`] – ingests filesystem topology, a lightweight symbol index,
//! and import-style dependency links into the Kernel.
//!
//! Real AST parsing and full workspace indexing are left to an external
//! collaborator; this module does the filesystem walk and a line-pattern
//! symbol/import scan good enough to seed `shard-perception`'s
//! `symbol_graph`/`file_topology` target resolution, not a real compiler
//! front end.

use std::path::Path;
use std::sync::Arc;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use kernel_api::{Kernel, KernelTx, VirtualStore};
use regex::Regex;
use shard_base::{BaseShard, CostGuardConfig};
use shard_types::{Fact, FactValue};
use walkdir::WalkDir;

use crate::error::RuntimeError;

const DEFAULT_UNHANDLED_THRESHOLD: usize = 3;
const MAX_SCAN_BYTES: u64 = 1_000_000;

static SYMBOL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?(fn|struct|enum|trait|impl|class|def)\s+([A-Za-z_][A-Za-z0-9_]*)")
        .expect("static symbol-pattern regex is valid")
});

static IMPORT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*(?:use|import|require)\s*\(?\s*"?([A-Za-z0-9_:./\-]+)"?"#)
        .expect("static import-pattern regex is valid")
});

#[derive(Debug, Default, Clone)]
pub struct ScanSummary {
    pub files_scanned: usize,
    pub symbols_found: usize,
    pub links_found: usize,
}

pub struct WorldModel {
    base: BaseShard,
    kernel: Arc<dyn Kernel>,
    virtual_store: Option<Arc<dyn VirtualStore>>,
}

impl WorldModel {
    pub fn new(shard_id: impl Into<String>, kernel: Arc<dyn Kernel>, virtual_store: Option<Arc<dyn VirtualStore>>) -> Self {
        WorldModel {
            base: BaseShard::new(shard_id, CostGuardConfig::default(), DEFAULT_UNHANDLED_THRESHOLD),
            kernel,
            virtual_store,
        }
    }

    pub fn base(&self) -> &BaseShard {
        &self.base
    }

    /// Walk `root`, asserting `file_topology`/`symbol_graph`/
    /// `dependency_link`/`modified` facts for every plain-text source file
    /// found, and persisting the same facts through the attached
    /// `VirtualStore`, if any.
    pub async fn scan(&self, root: &Path) -> Result<ScanSummary, RuntimeError> {
        let mut summary = ScanSummary::default();
        let mut tx = KernelTx::new();
        let mut persisted = Vec::new();

        for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.components().any(|c| c.as_os_str() == ".git" || c.as_os_str() == "target") {
                continue;
            }
            let path_str = path.to_string_lossy().to_string();
            let metadata = entry.metadata().map_err(|e| RuntimeError::Walk(e.to_string()))?;
            if metadata.len() > MAX_SCAN_BYTES {
                continue;
            }
            let modified: DateTime<Utc> = metadata.modified().map(DateTime::from).unwrap_or_else(|_| Utc::now());

            let topology_fact = Fact::with_ts("file_topology", vec![FactValue::str(&path_str), FactValue::atom("/file")], modified);
            tx.assert(topology_fact.clone());
            persisted.push(topology_fact);
            tx.assert(Fact::with_ts("modified", vec![FactValue::str(&path_str)], modified));
            summary.files_scanned += 1;

            let Ok(contents) = std::fs::read_to_string(path) else { continue };

            for cap in SYMBOL_PATTERN.captures_iter(&contents) {
                let name = &cap[2];
                let symbol_fact = Fact::new("symbol_graph", vec![FactValue::str(name), FactValue::str(&path_str)]);
                tx.assert(symbol_fact.clone());
                persisted.push(symbol_fact);
                summary.symbols_found += 1;
            }

            for cap in IMPORT_PATTERN.captures_iter(&contents) {
                let target = &cap[1];
                tx.assert(Fact::new(
                    "dependency_link",
                    vec![FactValue::str(&path_str), FactValue::str(target), FactValue::atom("/import")],
                ));
                summary.links_found += 1;
            }
        }

        tx.commit(self.kernel.as_ref()).await?;

        if let Some(store) = &self.virtual_store {
            store.persist_facts_to_knowledge(&persisted).await?;
            for fact in persisted.iter().filter(|f| f.predicate == "symbol_graph") {
                let (Some(name), Some(path)) = (fact.args.first().and_then(FactValue::as_str), fact.args.get(1).and_then(FactValue::as_str)) else {
                    continue;
                };
                store.persist_link(name, path, "defined_in").await?;
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_api::mock::InMemoryKernel;
    use std::fs;

    #[tokio::test]
    async fn scan_asserts_topology_and_symbol_facts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("lib.rs"), "pub fn resolve_target(x: &str) -> bool {\n    true\n}\n").unwrap();

        let kernel = Arc::new(InMemoryKernel::new());
        let world_model = WorldModel::new("world_model", kernel.clone(), None);

        let summary = world_model.scan(dir.path()).await.unwrap();

        assert_eq!(summary.files_scanned, 1);
        assert_eq!(summary.symbols_found, 1);
        let symbols = kernel.query("symbol_graph").await.unwrap();
        assert_eq!(symbols[0].args.first().and_then(FactValue::as_str), Some("resolve_target"));
    }

    #[tokio::test]
    async fn scan_detects_import_style_dependency_links() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("mod.rs"), "use crate::shard_types::Fact;\nfn noop() {}\n").unwrap();

        let kernel = Arc::new(InMemoryKernel::new());
        let world_model = WorldModel::new("world_model", kernel.clone(), None);
        let summary = world_model.scan(dir.path()).await.unwrap();

        assert_eq!(summary.links_found, 1);
        let links = kernel.query("dependency_link").await.unwrap();
        assert_eq!(links[0].args.get(1).and_then(FactValue::as_str), Some("crate::shard_types::Fact"));
    }

    #[tokio::test]
    async fn scan_skips_git_and_target_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git").join("config"), "fn ignored() {}\n").unwrap();

        let kernel = Arc::new(InMemoryKernel::new());
        let world_model = WorldModel::new("world_model", kernel.clone(), None);
        let summary = world_model.scan(dir.path()).await.unwrap();

        assert_eq!(summary.files_scanned, 0);
    }
}
