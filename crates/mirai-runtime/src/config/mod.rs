//! Configuration for the mirai runtime.
//!
//! Layered loading with figment (defaults, files, `MIRAI_*` environment
//! variables) plus validation of the merged result.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    ConnectionConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig, MiraiConfig,
    SessionSettings, SpanEventConfig, StreamSettings,
};
pub use validation::validate_config;
