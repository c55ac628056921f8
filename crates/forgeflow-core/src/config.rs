//! Configuration loader for Forgeflow.
//!
//! Reads `forgeflow.toml` from the data directory and deserializes it into
//! [`ForgeflowConfig`]. Falls back to defaults when the file is missing or
//! malformed.

use std::path::Path;

use forgeflow_types::config::{EngineConfig, PoolConfig};
use serde::{Deserialize, Serialize};

/// Top-level configuration file shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForgeflowConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub pool: PoolConfig,
}

/// Load configuration from `{data_dir}/forgeflow.toml`.
///
/// - If the file does not exist, returns [`ForgeflowConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the
///   default.
/// - If the file exists and parses successfully, returns the parsed config.
pub async fn load_config(data_dir: &Path) -> ForgeflowConfig {
    let config_path = data_dir.join("forgeflow.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No forgeflow.toml found at {}, using defaults", config_path.display());
            return ForgeflowConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return ForgeflowConfig::default();
        }
    };

    match toml::from_str::<ForgeflowConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", config_path.display());
            ForgeflowConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(tmp.path()).await;
        assert_eq!(config.engine.default_step_timeout_secs, 300);
        assert_eq!(config.pool.heartbeat_interval_secs, 15);
    }

    #[tokio::test]
    async fn load_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("forgeflow.toml"),
            r#"
[engine]
default_step_timeout_secs = 120
max_infra_attempts = 5

[pool]
heartbeat_interval_secs = 5
"#,
        )
        .await
        .unwrap();

        let config = load_config(tmp.path()).await;
        assert_eq!(config.engine.default_step_timeout_secs, 120);
        assert_eq!(config.engine.max_infra_attempts, 5);
        assert_eq!(config.pool.heartbeat_interval_secs, 5);
        // Untouched fields keep their defaults
        assert_eq!(config.engine.default_group_concurrency, 4);
    }

    #[tokio::test]
    async fn load_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("forgeflow.toml"), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_config(tmp.path()).await;
        assert_eq!(config.engine.event_capacity, 1024);
    }
}
