use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

/// 平台内部镜像仓库
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub domain: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// docker 兼容的命令行工具
    pub cli: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            domain: "goodrain.me".to_string(),
            user: None,
            password: None,
            cli: "docker".to_string(),
        }
    }
}

impl ConfigValidator for RegistryConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.domain, "registry.domain")?;
        if self.domain.contains("://") || self.domain.ends_with('/') {
            return Err(crate::ConfigError::Validation(
                "registry.domain must be a bare host[:port]".to_string(),
            ));
        }
        ValidationUtils::validate_not_empty(&self.cli, "registry.cli")?;
        Ok(())
    }
}

/// 在线备份包所在的 S3 兼容对象存储
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupS3Config {
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
}

impl ConfigValidator for BackupS3Config {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_url(&self.endpoint, "backup_s3.endpoint")?;
        ValidationUtils::validate_not_empty(&self.access_key, "backup_s3.access_key")?;
        ValidationUtils::validate_not_empty(&self.secret_key, "backup_s3.secret_key")?;
        ValidationUtils::validate_not_empty(&self.bucket, "backup_s3.bucket")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_domain_validation() {
        let mut config = RegistryConfig::default();
        assert!(config.validate().is_ok());

        config.domain = "https://goodrain.me".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backup_s3_validation() {
        let config = BackupS3Config {
            endpoint: "http://minio:9000".to_string(),
            region: "us-east-1".to_string(),
            access_key: "ak".to_string(),
            secret_key: "sk".to_string(),
            bucket: "rbd-backup".to_string(),
        };
        assert!(config.validate().is_ok());

        let mut invalid = config;
        invalid.bucket = String::new();
        assert!(invalid.validate().is_err());
    }
}
