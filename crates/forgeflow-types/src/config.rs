//! Engine and pool configuration.
//!
//! Loaded from `forgeflow.toml`. All fields have defaults chosen for a
//! single-host deployment; production fleets override the pool sizing and
//! heartbeat timing.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Configuration for the DAG execution engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default step timeout when a step declares none.
    #[serde(default = "default_step_timeout_secs")]
    pub default_step_timeout_secs: u64,

    /// Hard wall-clock ceiling for a whole run.
    #[serde(default = "default_run_timeout_secs")]
    pub default_run_timeout_secs: u64,

    /// Default parallel-group concurrency when a group declares none.
    #[serde(default = "default_group_concurrency")]
    pub default_group_concurrency: u32,

    /// Broadcast channel capacity for the run event bus.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Maximum assignment attempts after infrastructure failures before a
    /// step is marked failed.
    #[serde(default = "default_max_infra_attempts")]
    pub max_infra_attempts: u32,

    /// Base backoff between infrastructure re-assignments, doubling per
    /// attempt and capped at `infra_backoff_cap_secs`.
    #[serde(default = "default_infra_backoff_base_secs")]
    pub infra_backoff_base_secs: u64,

    #[serde(default = "default_infra_backoff_cap_secs")]
    pub infra_backoff_cap_secs: u64,
}

fn default_step_timeout_secs() -> u64 {
    300
}

fn default_run_timeout_secs() -> u64 {
    3600
}

fn default_group_concurrency() -> u32 {
    4
}

fn default_event_capacity() -> usize {
    1024
}

fn default_max_infra_attempts() -> u32 {
    3
}

fn default_infra_backoff_base_secs() -> u64 {
    2
}

fn default_infra_backoff_cap_secs() -> u64 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_step_timeout_secs: default_step_timeout_secs(),
            default_run_timeout_secs: default_run_timeout_secs(),
            default_group_concurrency: default_group_concurrency(),
            event_capacity: default_event_capacity(),
            max_infra_attempts: default_max_infra_attempts(),
            infra_backoff_base_secs: default_infra_backoff_base_secs(),
            infra_backoff_cap_secs: default_infra_backoff_cap_secs(),
        }
    }
}

impl EngineConfig {
    /// Backoff before the given (1-based) re-assignment attempt.
    pub fn infra_backoff_secs(&self, attempt: u32) -> u64 {
        let doubled = self
            .infra_backoff_base_secs
            .saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
        doubled.min(self.infra_backoff_cap_secs)
    }
}

// ---------------------------------------------------------------------------
// PoolConfig
// ---------------------------------------------------------------------------

/// Configuration for the runner pool manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Interval workers must heartbeat within; a miss flips them unhealthy.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Grace period an unhealthy worker gets before removal from the pool.
    #[serde(default = "default_unhealthy_grace_secs")]
    pub unhealthy_grace_secs: u64,

    /// Callback/control endpoint every sandbox allowlist must contain.
    #[serde(default = "default_control_endpoint")]
    pub control_endpoint: String,
}

fn default_heartbeat_interval_secs() -> u64 {
    15
}

fn default_unhealthy_grace_secs() -> u64 {
    120
}

fn default_control_endpoint() -> String {
    "https://forgeflow.internal/control".to_string()
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            unhealthy_grace_secs: default_unhealthy_grace_secs(),
            control_endpoint: default_control_endpoint(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.default_step_timeout_secs, 300);
        assert_eq!(config.max_infra_attempts, 3);
        assert_eq!(config.infra_backoff_base_secs, 2);
    }

    #[test]
    fn test_engine_config_deserialize_empty_toml() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config.default_run_timeout_secs, 3600);
        assert_eq!(config.event_capacity, 1024);
    }

    #[test]
    fn test_engine_config_deserialize_overrides() {
        let config: EngineConfig = toml::from_str(
            r#"
default_step_timeout_secs = 60
max_infra_attempts = 5
"#,
        )
        .unwrap();
        assert_eq!(config.default_step_timeout_secs, 60);
        assert_eq!(config.max_infra_attempts, 5);
        // Untouched fields keep their defaults
        assert_eq!(config.default_group_concurrency, 4);
    }

    #[test]
    fn test_infra_backoff_doubles_and_caps() {
        let config = EngineConfig::default();
        assert_eq!(config.infra_backoff_secs(1), 2);
        assert_eq!(config.infra_backoff_secs(2), 4);
        assert_eq!(config.infra_backoff_secs(3), 8);
        assert_eq!(config.infra_backoff_secs(10), 30);
    }

    #[test]
    fn test_pool_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.heartbeat_interval_secs, 15);
        assert!(config.control_endpoint.contains("forgeflow"));
    }
}
