//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod dispatch;
mod rewards;
mod server;
mod storage;

pub use dispatch::DispatchConfig;
pub use rewards::{
    CheckinConfig, RewardsConfig, DEFAULT_CHECKIN_POINTS, DEFAULT_CODE_PREFIX,
    DEFAULT_CODE_RETRY_LIMIT,
};
pub use server::{ServerConfig, WebhookConfig, DEFAULT_DEDUP_RETENTION_SECS};
pub use storage::{SqliteConfig, StorageConfig, StorageType};

use serde::Deserialize;

use crate::rewards::PinApprover;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "PUNCHCARD_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "PUNCHCARD";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "PUNCHCARD_LOG";

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listener.
    pub server: ServerConfig,
    /// Storage backend.
    pub storage: StorageConfig,
    /// Global reward defaults and code generation.
    pub rewards: RewardsConfig,
    /// Check-in award.
    pub checkin: CheckinConfig,
    /// Inbound webhook credential.
    pub webhook: WebhookConfig,
    /// Outbound notification queue.
    pub dispatch: DispatchConfig,
    /// Staff allowed to approve redemptions and manual awards.
    pub approvers: Vec<PinApprover>,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the services cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rewards
            .defaults
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("rewards.defaults: {}", e)))?;
        if self.rewards.code_retry_limit == 0 {
            return Err(ConfigError::Invalid(
                "rewards.code_retry_limit must be at least 1".to_string(),
            ));
        }
        if self.checkin.points_per_checkin <= 0 {
            return Err(ConfigError::Invalid(
                "checkin.points_per_checkin must be positive".to_string(),
            ));
        }
        if self.storage.operation_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "storage.operation_timeout_ms must be positive".to_string(),
            ));
        }
        if self.dispatch.capacity == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.capacity must be positive".to_string(),
            ));
        }
        for approver in &self.approvers {
            if !matches!(hex::decode(&approver.pin_sha256), Ok(digest) if digest.len() == 32) {
                return Err(ConfigError::Invalid(format!(
                    "approver {} has a malformed pin_sha256",
                    approver.approver_id
                )));
            }
        }
        Ok(())
    }

    /// Create config for testing: in-memory storage and a fixed webhook secret.
    pub fn for_test() -> Self {
        let mut config = Self::default();
        config.storage.storage_type = StorageType::Memory;
        config.webhook.secret = "test-secret".to_string();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.storage.storage_type, StorageType::Sqlite);
        assert_eq!(config.checkin.points_per_checkin, 10);
        assert_eq!(config.rewards.defaults.points_required, 100);
        assert!(config.approvers.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_for_test() {
        let config = Config::for_test();
        assert_eq!(config.storage.storage_type, StorageType::Memory);
        assert_eq!(config.webhook.secret, "test-secret");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.checkin.points_per_checkin = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.rewards.defaults.points_required = -1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.approvers.push(PinApprover {
            tenant_id: uuid::Uuid::new_v4(),
            approver_id: uuid::Uuid::new_v4(),
            pin_sha256: "not-hex".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("punchcard.yaml");
        std::fs::write(
            &path,
            r#"
server:
  port: 9191
storage:
  type: memory
  operation_timeout_ms: 750
rewards:
  defaults:
    points_required: 50
  code_prefix: "RW"
checkin:
  points_per_checkin: 15
webhook:
  secret: "s3cret"
  dedup_retention_secs: 3600
"#,
        )
        .unwrap();

        let config = Config::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.server.port, 9191);
        assert_eq!(config.storage.storage_type, StorageType::Memory);
        assert_eq!(config.storage.operation_timeout_ms, 750);
        assert_eq!(config.rewards.defaults.points_required, 50);
        assert_eq!(config.rewards.defaults.card_value, 5);
        assert_eq!(config.rewards.code_prefix, "RW");
        assert_eq!(config.checkin.points_per_checkin, 15);
        assert_eq!(config.webhook.secret, "s3cret");
        assert_eq!(config.webhook.header, "x-webhook-token");
        assert_eq!(config.webhook.dedup_retention_secs, 3600);
    }
}
