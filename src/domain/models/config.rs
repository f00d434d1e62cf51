//! Typed configuration consumed by the core.
//!
//! The core never reads configuration files itself; the loader in
//! `infrastructure::config` produces this value from YAML and environment
//! overrides.

use serde::{Deserialize, Serialize};

use super::provider::ProviderConfig;
use super::workflow::ExecuteOptions;

/// Token bucket settings applied per provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Burst capacity.
    pub max_tokens: f64,
    /// Tokens added per refill interval.
    pub refill_rate: f64,
    pub refill_interval_ms: u64,
    /// How long a completion call may wait for a token.
    pub acquire_timeout_ms: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_tokens: 10.0,
            refill_rate: 10.0,
            refill_interval_ms: 1_000,
            acquire_timeout_ms: 30_000,
        }
    }
}

/// Circuit breaker settings applied per provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Time the circuit stays open before a half-open probe.
    pub cooldown_ms: u64,
    /// Successes in half-open required to close.
    pub success_threshold: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 60_000,
            success_threshold: 2,
        }
    }
}

/// Top-level core configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Name of the provider used when a request has no preference.
    #[serde(default)]
    pub active_provider: Option<String>,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub breaker: BreakerSettings,
    #[serde(default)]
    pub workflow: ExecuteOptions,
    #[serde(default = "default_memory_db_path")]
    pub memory_db_path: String,
    #[serde(default = "default_planner_output_dir")]
    pub planner_output_dir: String,
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: String,
    #[serde(default = "default_seed_dir")]
    pub seed_dir: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            active_provider: None,
            providers: Vec::new(),
            rate_limit: RateLimitSettings::default(),
            breaker: BreakerSettings::default(),
            workflow: ExecuteOptions::default(),
            memory_db_path: default_memory_db_path(),
            planner_output_dir: default_planner_output_dir(),
            checkpoint_dir: default_checkpoint_dir(),
            seed_dir: default_seed_dir(),
        }
    }
}

fn default_memory_db_path() -> String {
    "data/memory.db".to_string()
}

fn default_planner_output_dir() -> String {
    "planner/output".to_string()
}

fn default_checkpoint_dir() -> String {
    "workflow/reports".to_string()
}

fn default_seed_dir() -> String {
    "data/seed/memory".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.memory_db_path, "data/memory.db");
        assert_eq!(config.planner_output_dir, "planner/output");
        assert_eq!(config.checkpoint_dir, "workflow/reports");
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.rate_limit.refill_interval_ms, 1_000);
    }

    #[test]
    fn test_deserialize_partial_yaml_shape() {
        let json = serde_json::json!({
            "active_provider": "anthropic-main",
            "breaker": { "failure_threshold": 3, "cooldown_ms": 5000, "success_threshold": 1 }
        });
        let config: CoreConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.active_provider.as_deref(), Some("anthropic-main"));
        assert_eq!(config.breaker.failure_threshold, 3);
        // Untouched sections keep defaults.
        assert_eq!(config.workflow.max_retries, 3);
    }
}
