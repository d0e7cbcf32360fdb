use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{Config as ConfigBuilder, ConfigBuilder as Builder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    database::DatabaseConfig,
    dispatcher::DispatcherConfig,
    message_queue::{MessageQueueConfig, ResultStoreConfig},
    observability::ObservabilityConfig,
    registry::{BackupS3Config, RegistryConfig},
    storage::StorageConfig,
};
use crate::validation::ConfigValidator;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub message_queue: MessageQueueConfig,
    pub dispatcher: DispatcherConfig,
    pub storage: StorageConfig,
    pub registry: RegistryConfig,
    pub result_store: ResultStoreConfig,
    #[serde(default)]
    pub backup_s3: Option<BackupS3Config>,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = Self::with_defaults(ConfigBuilder::builder())?;

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/executor.toml",
                "executor.toml",
                "/etc/rbd-executor/config.toml",
            ];

            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("EXECUTOR")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    fn with_defaults(builder: Builder<DefaultState>) -> Result<Builder<DefaultState>> {
        let defaults = AppConfig::default();
        let builder = builder
            .set_default("database.url", defaults.database.url)?
            .set_default("database.max_connections", defaults.database.max_connections as i64)?
            .set_default("database.min_connections", defaults.database.min_connections as i64)?
            .set_default(
                "database.connection_timeout_seconds",
                defaults.database.connection_timeout_seconds as i64,
            )?
            .set_default(
                "database.idle_timeout_seconds",
                defaults.database.idle_timeout_seconds as i64,
            )?
            .set_default("message_queue.type", "in_memory")?
            .set_default("message_queue.url", defaults.message_queue.url)?
            .set_default("message_queue.builder_topic", defaults.message_queue.builder_topic)?
            .set_default("message_queue.worker_topic", defaults.message_queue.worker_topic)?
            .set_default(
                "message_queue.poll_interval_ms",
                defaults.message_queue.poll_interval_ms as i64,
            )?
            .set_default(
                "message_queue.connection_timeout_seconds",
                defaults.message_queue.connection_timeout_seconds as i64,
            )?
            .set_default(
                "dispatcher.max_concurrent_tasks",
                defaults.dispatcher.max_concurrent_tasks as i64,
            )?
            .set_default(
                "dispatcher.shutdown_timeout_seconds",
                defaults.dispatcher.shutdown_timeout_seconds as i64,
            )?
            .set_default(
                "dispatcher.shutdown_poll_interval_seconds",
                defaults.dispatcher.shutdown_poll_interval_seconds as i64,
            )?
            .set_default(
                "dispatcher.build_timeout_seconds",
                defaults.dispatcher.build_timeout_seconds as i64,
            )?
            .set_default(
                "dispatcher.generic_timeout_seconds",
                defaults.dispatcher.generic_timeout_seconds as i64,
            )?
            .set_default("storage.local_data_path", defaults.storage.local_data_path)?
            .set_default("storage.share_data_path", defaults.storage.share_data_path)?
            .set_default("storage.cache_root", defaults.storage.cache_root)?
            .set_default("storage.tmp_root", defaults.storage.tmp_root)?
            .set_default("storage.source_root", defaults.storage.source_root)?
            .set_default("storage.slug_root", defaults.storage.slug_root)?
            .set_default("registry.domain", defaults.registry.domain)?
            .set_default("registry.cli", defaults.registry.cli)?
            .set_default("result_store.type", "in_memory")?
            .set_default("result_store.url", defaults.result_store.url)?
            .set_default("observability.log_level", defaults.observability.log_level)?
            .set_default("observability.log_format", defaults.observability.log_format)?
            .set_default(
                "observability.metrics_enabled",
                defaults.observability.metrics_enabled,
            )?
            .set_default(
                "observability.metrics_bind_address",
                defaults.observability.metrics_bind_address,
            )?;
        Ok(builder)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        self.database.validate()?;
        self.message_queue.validate()?;
        self.dispatcher.validate()?;
        self.storage.validate()?;
        self.registry.validate()?;
        self.result_store.validate()?;
        if let Some(s3) = &self.backup_s3 {
            s3.validate()?;
        }
        self.observability.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MessageQueueType, ResultStoreType};
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.registry.domain, "goodrain.me");
        assert_eq!(config.dispatcher.shutdown_timeout_seconds, 30);
        assert!(config.backup_s3.is_none());
    }

    #[test]
    fn test_toml_roundtrip_preserves_sections() {
        let mut config = AppConfig::default();
        config.backup_s3 = Some(BackupS3Config {
            endpoint: "http://minio:9000".to_string(),
            region: "us-east-1".to_string(),
            access_key: "ak".to_string(),
            secret_key: "sk".to_string(),
            bucket: "backups".to_string(),
        });

        let toml_str = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&toml_str).unwrap();

        assert_eq!(parsed.message_queue.builder_topic, "builder");
        assert_eq!(parsed.backup_s3.unwrap().bucket, "backups");
    }

    #[test]
    fn test_load_merges_partial_file_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[message_queue]
type = "rabbitmq"
url = "amqp://mq:5672/%2f"

[result_store]
type = "redis"
url = "redis://cache:6379"

[registry]
domain = "hub.internal:5000"
"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = AppConfig::load(Some(&path)).unwrap();

        assert_eq!(config.message_queue.r#type, MessageQueueType::Rabbitmq);
        assert_eq!(config.message_queue.worker_topic, "worker");
        assert_eq!(config.result_store.r#type, ResultStoreType::Redis);
        assert_eq!(config.registry.domain, "hub.internal:5000");
        assert_eq!(config.dispatcher.build_timeout_seconds, 1800);
    }

    #[test]
    fn test_load_rejects_missing_file() {
        assert!(AppConfig::load(Some("/definitely/not/here.toml")).is_err());
    }

    #[test]
    fn test_invalid_toml_section_is_rejected() {
        let mut config = AppConfig::default();
        config.dispatcher.max_concurrent_tasks = 0;
        let toml_str = config.to_toml().unwrap();
        assert!(AppConfig::from_toml(&toml_str).is_err());
    }
}
