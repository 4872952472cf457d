//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Why a [`MiraiConfig`](super::MiraiConfig) could not be produced.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// The file extension names no enabled format (`toml-config`, `yaml-config`).
    #[error("Unsupported configuration format: {0}")]
    UnsupportedFormat(PathBuf),

    /// A layer could not be parsed or the merged result does not fit the schema.
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] Box<figment::Error>),

    #[error("Invalid configuration: {message}")]
    ValidationError { message: String },

    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    /// `connection.host` is a URL rather than a host name.
    #[error("Invalid mirai-api-http host `{0}`: expected a host name")]
    InvalidHost(String),

    #[error("Invalid mirai-api-http port: {0}")]
    InvalidPort(u16),

    /// The reconnect backoff in `stream.retry` cannot produce delays.
    #[error("Invalid reconnect backoff: {0}")]
    InvalidBackoff(String),
}

impl ConfigError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::ParseError(Box::new(err))
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
