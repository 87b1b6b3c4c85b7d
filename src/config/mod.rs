//! Configuration Module
//!
//! Provides TOML-based configuration for slotwise with support for:
//! - Logging
//! - Cluster membership (gossip)
//! - Coordination channel and counter names
//! - Environment variable overrides (SLOTWISE__* prefix)

use std::collections::HashSet;
use std::path::Path;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

pub use cluster::ClusterConfig;
pub use coordination::CoordinationConfig;

use crate::cluster::NotificationChannel;

mod cluster;
mod coordination;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").expect("valid env var pattern");
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

#[cfg(test)]
mod tests;

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error reading config file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Config crate error
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Cluster membership configuration
    pub cluster: ClusterConfig,
    /// Channel and counter names
    pub coordination: CoordinationConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `SLOTWISE__` prefix with double underscores for nesting:
    ///    - `SLOTWISE__CLUSTER__GOSSIP_ADDR=0.0.0.0:7950` overrides `cluster.gossip_addr`
    ///    - `SLOTWISE__CLUSTER__ENABLED=true` overrides `cluster.enabled`
    ///    - `SLOTWISE__COORDINATION__QUEUE_TOPIC=q` overrides `coordination.queue_topic`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            // Start with defaults
            .set_default("log.level", "info")?
            .set_default("cluster.enabled", false)?
            .set_default("cluster.gossip_addr", "0.0.0.0:7946")?
            .set_default("cluster.gossip_interval", 1000)?
            .set_default("cluster.notification_window", 64)?;

        // Load from file with env var substitution
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        // Override with environment variables (SLOTWISE__CLUSTER__ENABLED, etc.)
        // Double underscore separates nested keys, single underscore preserved in field names
        let cfg = builder
            .add_source(
                Environment::with_prefix("SLOTWISE")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("cluster.seeds")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides only (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut topics = HashSet::new();
        for channel in NotificationChannel::ALL {
            let topic = self.coordination.topic_name(channel);
            if topic.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "{} topic name must not be empty",
                    channel
                )));
            }
            if !topics.insert(topic) {
                return Err(ConfigError::Validation(format!(
                    "topic name '{}' is used by more than one channel",
                    topic
                )));
            }
        }

        if self.coordination.id_counter.is_empty() {
            return Err(ConfigError::Validation(
                "id_counter must not be empty".to_string(),
            ));
        }

        if self.cluster.gossip_interval == 0 {
            return Err(ConfigError::Validation(
                "gossip_interval must be greater than 0".to_string(),
            ));
        }

        if self.cluster.failure_timeout == 0 {
            return Err(ConfigError::Validation(
                "failure_timeout must be greater than 0".to_string(),
            ));
        }

        if self.cluster.notification_window == 0 {
            return Err(ConfigError::Validation(
                "notification_window must be greater than 0".to_string(),
            ));
        }

        if self.cluster.id_claim_attempts == 0 {
            return Err(ConfigError::Validation(
                "id_claim_attempts must be greater than 0".to_string(),
            ));
        }

        if let Some(uuid) = &self.cluster.node_uuid {
            if uuid::Uuid::parse_str(uuid).is_err() {
                return Err(ConfigError::Validation(format!(
                    "node_uuid '{}' is not a valid UUID",
                    uuid
                )));
            }
        }

        Ok(())
    }
}
