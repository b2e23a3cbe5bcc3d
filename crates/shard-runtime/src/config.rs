//! Per-component tick intervals and thresholds for the OODA fabric, gathered
//! here into one config struct per shard.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ExecutiveConfig {
    pub tick_interval: Duration,
    pub max_actions_per_tick: usize,
    pub ooda_timeout: Duration,
}

impl Default for ExecutiveConfig {
    fn default() -> Self {
        ExecutiveConfig {
            tick_interval: Duration::from_millis(100),
            max_actions_per_tick: 5,
            ooda_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConstitutionConfig {
    pub tick_interval: Duration,
    /// Strict mode denies on no `permitted/1` match; lax mode permits.
    pub strict_mode: bool,
    pub allowed_domains: Vec<String>,
}

impl Default for ConstitutionConfig {
    fn default() -> Self {
        ConstitutionConfig {
            tick_interval: Duration::from_millis(50),
            strict_mode: true,
            allowed_domains: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub tick_interval: Duration,
    pub prune_interval: Duration,
    pub routing_result_ttl: Duration,
    pub output_truncate_chars: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            tick_interval: Duration::from_millis(100),
            prune_interval: Duration::from_secs(10),
            routing_result_ttl: Duration::from_secs(15 * 60),
            output_truncate_chars: 500,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub tick_interval: Duration,
    pub auto_checkpoint_every: Duration,
    pub max_retries_per_task: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        PlannerConfig {
            tick_interval: Duration::from_secs(5),
            auto_checkpoint_every: Duration::from_secs(10 * 60),
            max_retries_per_task: 3,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AutopoiesisConfig {
    pub rule_confidence_threshold: f64,
}

impl Default for AutopoiesisConfig {
    fn default() -> Self {
        AutopoiesisConfig {
            rule_confidence_threshold: 0.8,
        }
    }
}
