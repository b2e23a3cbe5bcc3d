//! Configuration for the Perception shard. All thresholds are configurable;
//! the values here are the stated defaults (or, where a default was left
//! unspecified, the decision recorded in `DESIGN.md`).

/// Confidence percentages (0-100) assigned by target resolution's four
/// precedence tiers.
#[derive(Debug, Clone, Copy)]
pub struct TargetResolutionConfig {
    pub path_like: u8,
    pub symbol_match: u8,
    pub substring_match: u8,
    pub unresolved: u8,
    /// Below this, a clarification counter is incremented.
    pub clarification_floor: u8,
}

impl Default for TargetResolutionConfig {
    fn default() -> Self {
        TargetResolutionConfig {
            path_like: 90,
            symbol_match: 85,
            substring_match: 70,
            unresolved: 30,
            clarification_floor: 85,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PerceptionConfig {
    /// `SubmitInput`'s bounded queue capacity.
    pub queue_capacity: usize,
    /// Default `maxRetries` passed to `Transducer::parse_intent_with_gcd`
    /// when `CostGuard::max_validation_retries` is unset.
    pub default_max_retries: u32,
    /// Parses below this confidence are flagged `ambiguity_flag`. See
    /// `DESIGN.md`'s Open Question log for how this default was chosen.
    pub ambiguity_threshold: f64,
    /// Number of unmapped-verb occurrences for the same phrase before a
    /// `learning_candidate` fact is emitted.
    pub learning_candidate_threshold: u32,
    /// Whether a `Transducer` failure falls back to the deterministic regex
    /// verb-family parser.
    pub fallback_enabled: bool,
    /// How many prior turns of input are kept as `Transducer` context.
    pub history_depth: usize,
    pub target_resolution: TargetResolutionConfig,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        PerceptionConfig {
            queue_capacity: 100,
            default_max_retries: 3,
            ambiguity_threshold: 0.5,
            learning_candidate_threshold: 3,
            fallback_enabled: true,
            history_depth: 10,
            target_resolution: TargetResolutionConfig::default(),
        }
    }
}
