//! Target resolution: maps a raw target string onto a `(path, symbol,
//! confidence)` triple, preferring a path-like string, then a `symbol_graph`
//! name match, then a `file_topology` substring match, then unresolved.

use kernel_api::Kernel;
use shard_types::FactValue;

use crate::config::TargetResolutionConfig;

/// Resolved target, matching the `focus_resolution(Raw, Path, Symbol,
/// ConfidencePct)` fact.
#[derive(Debug, Clone, PartialEq)]
pub struct FocusResolution {
    pub raw: String,
    pub path: Option<String>,
    pub symbol: Option<String>,
    pub confidence_pct: u8,
}

fn is_path_like(raw: &str) -> bool {
    raw.contains('/') || raw.contains('\\') || raw.contains('.')
}

/// Resolve `raw` against the Kernel's `symbol_graph`/`file_topology` facts.
///
/// Precedence: (a) path-like strings pass through at `path_like` confidence;
/// (b) case-insensitive match in `symbol_graph` at `symbol_match` confidence;
/// (c) substring match in `file_topology` paths at `substring_match`
/// confidence; (d) otherwise `unresolved`.
pub async fn resolve_target(
    raw: &str,
    kernel: &dyn Kernel,
    cfg: &TargetResolutionConfig,
) -> Result<FocusResolution, kernel_api::KernelApiError> {
    if is_path_like(raw) {
        return Ok(FocusResolution {
            raw: raw.to_string(),
            path: Some(raw.to_string()),
            symbol: None,
            confidence_pct: cfg.path_like,
        });
    }

    let symbol_facts = kernel.query("symbol_graph").await?;
    let raw_lower = raw.to_lowercase();
    for fact in &symbol_facts {
        if let Some(symbol) = fact.args.first().and_then(FactValue::as_str) {
            if symbol.to_lowercase() == raw_lower {
                let symbol = symbol.to_string();
                let path = fact.args.get(1).and_then(|v| v.as_str()).map(str::to_string);
                return Ok(FocusResolution {
                    raw: raw.to_string(),
                    path,
                    symbol: Some(symbol),
                    confidence_pct: cfg.symbol_match,
                });
            }
        }
    }

    let topology_facts = kernel.query("file_topology").await?;
    for fact in &topology_facts {
        if let Some(path) = fact.args.first().and_then(|v| v.as_str()) {
            if path.to_lowercase().contains(&raw_lower) {
                return Ok(FocusResolution {
                    raw: raw.to_string(),
                    path: Some(path.to_string()),
                    symbol: None,
                    confidence_pct: cfg.substring_match,
                });
            }
        }
    }

    Ok(FocusResolution {
        raw: raw.to_string(),
        path: None,
        symbol: None,
        confidence_pct: cfg.unresolved,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_api::mock::InMemoryKernel;
    use shard_types::Fact;

    #[tokio::test]
    async fn path_like_target_short_circuits() {
        let kernel = InMemoryKernel::new();
        let cfg = TargetResolutionConfig::default();
        let res = resolve_target("src/lib.rs", &kernel, &cfg).await.unwrap();
        assert_eq!(res.confidence_pct, 90);
        assert_eq!(res.path.as_deref(), Some("src/lib.rs"));
    }

    #[tokio::test]
    async fn symbol_graph_match_takes_precedence_over_substring() {
        let kernel = InMemoryKernel::new();
        kernel
            .assert(Fact::new("symbol_graph", vec![FactValue::str("MyStruct"), FactValue::str("src/types.rs")]))
            .await
            .unwrap();
        let cfg = TargetResolutionConfig::default();
        let res = resolve_target("mystruct", &kernel, &cfg).await.unwrap();
        assert_eq!(res.confidence_pct, 85);
        assert_eq!(res.symbol.as_deref(), Some("MyStruct"));
    }

    #[tokio::test]
    async fn file_topology_substring_match() {
        let kernel = InMemoryKernel::new();
        kernel
            .assert(Fact::new("file_topology", vec![FactValue::str("crates/shard-runtime/src/executive.rs")]))
            .await
            .unwrap();
        let cfg = TargetResolutionConfig::default();
        let res = resolve_target("executive", &kernel, &cfg).await.unwrap();
        assert_eq!(res.confidence_pct, 70);
    }

    #[tokio::test]
    async fn unresolved_target_gets_lowest_confidence() {
        let kernel = InMemoryKernel::new();
        let cfg = TargetResolutionConfig::default();
        let res = resolve_target("nonexistent_thing", &kernel, &cfg).await.unwrap();
        assert_eq!(res.confidence_pct, 30);
    }
}
