use crate::{ConfigError, ConfigResult};

pub trait ConfigValidator {
    fn validate(&self) -> ConfigResult<()>;
}

/// 通用字段校验
pub struct ValidationUtils;

impl ValidationUtils {
    /// 验证字符串非空
    pub fn validate_not_empty(value: &str, field_name: &str) -> ConfigResult<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "{field_name} cannot be empty"
            )));
        }
        Ok(())
    }

    /// 验证端口号
    pub fn validate_port(port: u16) -> ConfigResult<()> {
        if port == 0 {
            return Err(ConfigError::Validation("Port cannot be 0".to_string()));
        }
        Ok(())
    }

    /// 验证超时值
    pub fn validate_timeout(timeout_seconds: u64, field_name: &str) -> ConfigResult<()> {
        if timeout_seconds == 0 {
            return Err(ConfigError::Validation(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if timeout_seconds > 3600 {
            return Err(ConfigError::Validation(format!(
                "{field_name} must be less than or equal to 3600 seconds"
            )));
        }
        Ok(())
    }

    /// 验证URL格式
    pub fn validate_url(url: &str, field_name: &str) -> ConfigResult<()> {
        Self::validate_not_empty(url, field_name)?;

        if !url.contains("://") && !url.starts_with("sqlite:") {
            return Err(ConfigError::Validation(format!(
                "{field_name} must be a valid URL with protocol"
            )));
        }

        Ok(())
    }

    /// 验证计数值
    pub fn validate_count(count: usize, field_name: &str, max_value: usize) -> ConfigResult<()> {
        if count == 0 {
            return Err(ConfigError::Validation(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if count > max_value {
            return Err(ConfigError::Validation(format!(
                "{field_name} must be less than or equal to {max_value}"
            )));
        }
        Ok(())
    }

    /// 验证绝对路径
    pub fn validate_absolute_path(path: &str, field_name: &str) -> ConfigResult<()> {
        Self::validate_not_empty(path, field_name)?;
        if !path.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "{field_name} must be an absolute path"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_utils() {
        assert!(ValidationUtils::validate_not_empty("value", "field").is_ok());
        assert!(ValidationUtils::validate_not_empty("  ", "field").is_err());

        assert!(ValidationUtils::validate_port(5672).is_ok());
        assert!(ValidationUtils::validate_port(0).is_err());

        assert!(ValidationUtils::validate_timeout(30, "timeout").is_ok());
        assert!(ValidationUtils::validate_timeout(0, "timeout").is_err());
        assert!(ValidationUtils::validate_timeout(3601, "timeout").is_err());

        assert!(ValidationUtils::validate_url("amqp://localhost:5672", "url").is_ok());
        assert!(ValidationUtils::validate_url("sqlite::memory:", "url").is_ok());
        assert!(ValidationUtils::validate_url("localhost", "url").is_err());

        assert!(ValidationUtils::validate_count(5, "count", 10).is_ok());
        assert!(ValidationUtils::validate_count(0, "count", 10).is_err());
        assert!(ValidationUtils::validate_count(11, "count", 10).is_err());

        assert!(ValidationUtils::validate_absolute_path("/grdata", "path").is_ok());
        assert!(ValidationUtils::validate_absolute_path("grdata", "path").is_err());
    }
}
