use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// 实际并发上限取 max(该值, 2 × CPU核数)
    pub max_concurrent_tasks: usize,
    pub shutdown_timeout_seconds: u64,
    pub shutdown_poll_interval_seconds: u64,
    pub build_timeout_seconds: u64,
    pub generic_timeout_seconds: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 10,
            shutdown_timeout_seconds: 30,
            shutdown_poll_interval_seconds: 2,
            build_timeout_seconds: 1800,
            generic_timeout_seconds: 600,
        }
    }
}

impl ConfigValidator for DispatcherConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_count(
            self.max_concurrent_tasks,
            "dispatcher.max_concurrent_tasks",
            1000,
        )?;
        ValidationUtils::validate_timeout(
            self.shutdown_timeout_seconds,
            "dispatcher.shutdown_timeout_seconds",
        )?;
        ValidationUtils::validate_timeout(
            self.shutdown_poll_interval_seconds,
            "dispatcher.shutdown_poll_interval_seconds",
        )?;
        if self.shutdown_poll_interval_seconds > self.shutdown_timeout_seconds {
            return Err(crate::ConfigError::Validation(
                "dispatcher.shutdown_poll_interval_seconds must not exceed shutdown_timeout_seconds"
                    .to_string(),
            ));
        }
        ValidationUtils::validate_timeout(
            self.build_timeout_seconds,
            "dispatcher.build_timeout_seconds",
        )?;
        ValidationUtils::validate_timeout(
            self.generic_timeout_seconds,
            "dispatcher.generic_timeout_seconds",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatcher_config_validation() {
        let config = DispatcherConfig::default();
        assert!(config.validate().is_ok());

        let mut invalid = config.clone();
        invalid.max_concurrent_tasks = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = config.clone();
        invalid.shutdown_poll_interval_seconds = 60;
        assert!(invalid.validate().is_err());

        let mut invalid = config;
        invalid.build_timeout_seconds = 7200;
        assert!(invalid.validate().is_err());
    }
}
