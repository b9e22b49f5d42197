//! Agent configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Node name from Kubernetes downward API
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Seconds between snapshot attempts
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval_secs: u64,

    /// Upper bound on the initial collector sync
    #[serde(default = "default_sync_timeout")]
    pub sync_timeout_secs: u64,

    /// A populated kind with no writes for this long marks the store degraded
    #[serde(default = "default_staleness_threshold")]
    pub staleness_threshold_secs: u64,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_snapshot_interval() -> u64 {
    60
}

fn default_sync_timeout() -> u64 {
    300
}

fn default_staleness_threshold() -> u64 {
    900
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            api_port: default_api_port(),
            snapshot_interval_secs: default_snapshot_interval(),
            sync_timeout_secs: default_sync_timeout(),
            staleness_threshold_secs: default_staleness_threshold(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from `AGENT_*` environment variables
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("AGENT"))
            .build()
            .context("failed to read agent configuration")?;

        let config: AgentConfig = config
            .try_deserialize()
            .context("invalid agent configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.snapshot_interval_secs > 0,
            "snapshot_interval_secs must be greater than zero"
        );
        anyhow::ensure!(
            self.sync_timeout_secs > 0,
            "sync_timeout_secs must be greater than zero"
        );
        Ok(())
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }

    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.staleness_threshold_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.snapshot_interval(), Duration::from_secs(60));
        assert_eq!(config.sync_timeout(), Duration::from_secs(300));
        assert_eq!(config.staleness_threshold(), Duration::from_secs(900));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = AgentConfig {
            snapshot_interval_secs: 0,
            ..AgentConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
