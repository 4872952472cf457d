//! Configuration validation utilities.

use mirai_core::RetryConfig;

use super::error::{ConfigError, ConfigResult};
use super::schema::{ConnectionConfig, LogOutput, LoggingConfig, MiraiConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &MiraiConfig) -> ConfigResult<()> {
    validate_connection(&config.connection)?;
    validate_retry_config(&config.stream.retry)?;
    validate_logging(&config.logging)?;
    Ok(())
}

fn validate_connection(connection: &ConnectionConfig) -> ConfigResult<()> {
    if connection.host.trim().is_empty() {
        return Err(ConfigError::missing_field("connection.host"));
    }

    if connection.host.contains("://") {
        return Err(ConfigError::InvalidHost(connection.host.clone()));
    }

    if connection.port == 0 {
        return Err(ConfigError::InvalidPort(connection.port));
    }

    if connection.request_timeout.is_zero() {
        return Err(ConfigError::validation("Request timeout must be greater than 0"));
    }

    Ok(())
}

fn validate_retry_config(retry: &RetryConfig) -> ConfigResult<()> {
    if retry.multiplier.is_nan() || retry.multiplier <= 0.0 {
        return Err(ConfigError::InvalidBackoff(format!(
            "multiplier must be greater than 0, got {}",
            retry.multiplier
        )));
    }

    if retry.max_delay < retry.initial_delay {
        return Err(ConfigError::InvalidBackoff(
            "max_delay is shorter than initial_delay".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&MiraiConfig::default()).is_ok());
    }

    #[test]
    fn rejects_empty_host() {
        let mut config = MiraiConfig::default();
        config.connection.host = "  ".to_string();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));
    }

    #[test]
    fn rejects_url_as_host() {
        let mut config = MiraiConfig::default();
        config.connection.host = "http://localhost".to_string();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::InvalidHost(_))
        ));
    }

    #[test]
    fn rejects_port_zero() {
        let mut config = MiraiConfig::default();
        config.connection.port = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::InvalidPort(0))
        ));
    }

    #[test]
    fn rejects_non_positive_multiplier() {
        let mut config = MiraiConfig::default();
        config.stream.retry.multiplier = 0.0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::InvalidBackoff(_))
        ));

        config.stream.retry.multiplier = f64::NAN;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_inverted_delays() {
        let mut config = MiraiConfig::default();
        config.stream.retry.initial_delay = Duration::from_secs(10);
        config.stream.retry.max_delay = Duration::from_secs(1);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn file_output_needs_a_path() {
        let mut config = MiraiConfig::default();
        config.logging.output = LogOutput::File;
        assert!(validate_config(&config).is_err());

        config.logging.file_path = Some("mirai.log".into());
        assert!(validate_config(&config).is_ok());
    }
}
