pub mod models;
pub mod validation;

pub use models::{
    AppConfig, BackupS3Config, DatabaseConfig, DispatcherConfig, MessageQueueConfig,
    MessageQueueType, ObservabilityConfig, RegistryConfig, ResultStoreConfig, ResultStoreType,
    StorageConfig,
};
pub use validation::{ConfigValidator, ValidationUtils};

/// Configuration error type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration error enumeration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("File error: {0}")]
    File(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<anyhow::Error> for ConfigError {
    fn from(err: anyhow::Error) -> Self {
        ConfigError::Configuration(err.to_string())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Configuration(err.to_string())
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::File(err.to_string())
    }
}
