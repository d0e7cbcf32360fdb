use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_bind_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_bind_address: "0.0.0.0:9090".to_string(),
        }
    }
}

impl ConfigValidator for ObservabilityConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(crate::ConfigError::Validation(format!(
                "observability.log_level must be one of: {valid_levels:?}"
            )));
        }
        if !["pretty", "json"].contains(&self.log_format.as_str()) {
            return Err(crate::ConfigError::Validation(
                "observability.log_format must be pretty or json".to_string(),
            ));
        }
        if self.metrics_enabled {
            ValidationUtils::validate_not_empty(
                &self.metrics_bind_address,
                "observability.metrics_bind_address",
            )?;
            let port = self
                .metrics_bind_address
                .rsplit(':')
                .next()
                .and_then(|p| p.parse::<u16>().ok())
                .ok_or_else(|| {
                    crate::ConfigError::Validation(
                        "observability.metrics_bind_address must be host:port".to_string(),
                    )
                })?;
            ValidationUtils::validate_port(port)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observability_validation() {
        let mut config = ObservabilityConfig::default();
        assert!(config.validate().is_ok());

        config.log_level = "verbose".to_string();
        assert!(config.validate().is_err());

        config.log_level = "debug".to_string();
        config.metrics_enabled = true;
        config.metrics_bind_address = "0.0.0.0".to_string();
        assert!(config.validate().is_err());
    }
}
