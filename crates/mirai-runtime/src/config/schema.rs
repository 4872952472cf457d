//! Configuration schema definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use mirai_core::{RetryConfig, SessionConfig, UserId};
use serde::{Deserialize, Serialize};

/// Where the mirai-api-http server listens.
pub use mirai_core::EndpointConfig as ConnectionConfig;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MiraiConfig {
    /// HTTP endpoint of the mirai-api-http server.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Credentials and session options.
    #[serde(default)]
    pub session: SessionSettings,

    /// Event stream behaviour.
    #[serde(default)]
    pub stream: StreamSettings,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// =============================================================================
// Session
// =============================================================================

/// Credentials used by `authorize`, plus the session options applied after it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSettings {
    /// The `authKey` configured in the mirai-api-http plugin.
    #[serde(default)]
    pub auth_key: String,

    /// Account the session binds to.
    #[serde(default)]
    pub bot_id: UserId,

    /// Size of the server-side message cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_size: Option<i32>,

    /// Whether the server pushes events over WebSocket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_websocket: Option<bool>,
}

impl SessionSettings {
    /// The session options to push after authorizing, if any are set.
    pub fn session_config(&self) -> Option<SessionConfig> {
        if self.cache_size.is_none() && self.enable_websocket.is_none() {
            return None;
        }
        Some(SessionConfig {
            cache_size: self.cache_size,
            enable_websocket: self.enable_websocket,
        })
    }
}

// =============================================================================
// Stream
// =============================================================================

/// Event stream settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Reconnect after a transport failure.
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    /// Backoff used between reconnect attempts.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_auto_reconnect() -> bool {
    true
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            auto_reconnect: default_auto_reconnect(),
            retry: RetryConfig::default(),
        }
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Newline-delimited JSON. Needs the `json-log` feature.
    Json,
}

/// Where log lines are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// How often file output starts a new file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base level; `RUST_LOG` takes precedence when set.
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Per-target overrides, e.g. `mirai_core = "debug"`.
    #[serde(default)]
    pub filters: BTreeMap<String, LogLevel>,

    /// Log file, used when `output` is `file`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,

    #[serde(default)]
    pub rotation: LogRotation,

    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line.
    #[serde(default)]
    pub file_location: bool,

    #[serde(default)]
    pub span_events: SpanEventConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn defaults_are_complete() {
        let config: MiraiConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.connection.host, "127.0.0.1");
        assert_eq!(config.connection.port, 8080);
        assert!(config.stream.auto_reconnect);
        assert_eq!(config.stream.retry.max_retries, 3);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert!(config.session.session_config().is_none());
    }

    #[test]
    fn parses_nested_sections() {
        let raw = serde_json::json!({
            "connection": { "host": "mirai.local", "port": 9000, "request_timeout": "5s" },
            "session": { "auth_key": "secret", "bot_id": 42, "cache_size": 2048 },
            "stream": { "auto_reconnect": false, "retry": { "initial_delay": "250ms" } },
            "logging": { "level": "debug", "format": "pretty", "filters": { "mirai_core": "trace" } }
        });
        let config: MiraiConfig = serde_json::from_value(raw).unwrap();

        assert_eq!(config.connection.request_timeout, Duration::from_secs(5));
        assert_eq!(config.session.bot_id, UserId(42));
        assert_eq!(
            config.session.session_config(),
            Some(SessionConfig {
                cache_size: Some(2048),
                enable_websocket: None
            })
        );
        assert!(!config.stream.auto_reconnect);
        assert_eq!(config.stream.retry.initial_delay, Duration::from_millis(250));
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.logging.filters["mirai_core"], LogLevel::Trace);
    }
}
