//! Transport abstractions and their configuration.
//!
//! The concrete HTTP and WebSocket clients live in `mirai-transport`; the core
//! only sees the [`Transport`] and [`FrameStream`] traits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::foundation::error::TransportResult;

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// A file or text field of a multipart upload.
#[derive(Debug, Clone)]
pub enum MultipartPart {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        mime: String,
        bytes: Vec<u8>,
    },
}

#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Multipart(Vec<MultipartPart>),
}

/// One request/response exchange with the HTTP API.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    /// Path relative to the server root, such as `/sendGroupMessage`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

impl HttpRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn post_json(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Json(body),
        }
    }

    pub fn post_multipart(path: impl Into<String>, parts: Vec<MultipartPart>) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Multipart(parts),
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }
}

// ============================================================================
// Traits
// ============================================================================

/// The read side of the event stream.
#[async_trait]
pub trait FrameStream: Send {
    /// Reads the next text frame. `Ok(None)` means the peer closed the stream.
    ///
    /// Must be cancel safe: the reader drops this future when a stop is requested.
    async fn next_frame(&mut self) -> TransportResult<Option<String>>;

    async fn close(&mut self) -> TransportResult<()>;
}

pub type BoxedFrameStream = Box<dyn FrameStream>;

/// HTTP request primitive plus the event stream connector.
///
/// Requests may be issued concurrently from any number of tasks.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs `request` and returns the JSON response body.
    async fn request(&self, request: HttpRequest) -> TransportResult<Value>;

    /// Opens the event stream at `path` (such as `/all`).
    async fn open_stream(&self, path: &str, query: &[(String, String)]) -> TransportResult<BoxedFrameStream>;
}

pub type SharedTransport = Arc<dyn Transport>;

// ============================================================================
// Configuration
// ============================================================================

/// Where the mirai-api-http server listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Use `https`/`wss` instead of `http`/`ws`.
    #[serde(default)]
    pub use_tls: bool,
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub request_timeout: Duration,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            use_tls: false,
            request_timeout: default_timeout(),
        }
    }
}

impl EndpointConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn http_base(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    pub fn ws_base(&self) -> String {
        let scheme = if self.use_tls { "wss" } else { "ws" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

/// Reconnect policy for the event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of reconnect attempts after a failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(with = "humantime_serde", default = "default_initial_delay")]
    pub initial_delay: Duration,
    #[serde(with = "humantime_serde", default = "default_max_delay")]
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Delay before reconnect attempt `attempt` (0-based), capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        if !delay.is_finite() || delay >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay)
        }
    }
}

/// Durations written as `"500ms"`, `"30s"`, `"2m"`, or as a number of seconds.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Secs(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(s) => parse_duration(&s).map_err(serde::de::Error::custom),
        }
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let parse = |n: &str| n.trim().parse::<u64>().map_err(|e| format!("'{s}': {e}"));

        if let Some(ms) = s.strip_suffix("ms") {
            parse(ms).map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            parse(secs).map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            parse(mins).map(|m| Duration::from_secs(m * 60))
        } else {
            parse(s).map(Duration::from_secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_urls_follow_tls_flag() {
        let mut endpoint = EndpointConfig::new("mirai.local", 8080);
        assert_eq!(endpoint.http_base(), "http://mirai.local:8080");
        assert_eq!(endpoint.ws_base(), "ws://mirai.local:8080");

        endpoint.use_tls = true;
        assert_eq!(endpoint.http_base(), "https://mirai.local:8080");
        assert_eq!(endpoint.ws_base(), "wss://mirai.local:8080");
    }

    #[test]
    fn parses_duration_units() {
        use humantime_serde::parse_duration;
        assert_eq!(parse_duration("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("7"), Ok(Duration::from_secs(7)));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn endpoint_accepts_numeric_timeout() {
        let endpoint: EndpointConfig =
            serde_json::from_value(serde_json::json!({ "request_timeout": 5 })).unwrap();
        assert_eq!(endpoint.request_timeout, Duration::from_secs(5));
        assert_eq!(endpoint.host, "127.0.0.1");

        let endpoint: EndpointConfig =
            serde_json::from_value(serde_json::json!({ "request_timeout": "250ms" })).unwrap();
        assert_eq!(endpoint.request_timeout, Duration::from_millis(250));
    }

    #[test]
    fn retry_delay_grows_and_caps() {
        let retry = RetryConfig {
            max_retries: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        };
        assert_eq!(retry.delay_for(0), Duration::from_secs(1));
        assert_eq!(retry.delay_for(1), Duration::from_secs(2));
        assert_eq!(retry.delay_for(2), Duration::from_secs(4));
        assert_eq!(retry.delay_for(3), Duration::from_secs(5));
    }

    #[test]
    fn request_builder_collects_query() {
        let request = HttpRequest::get("/memberList").query("sessionKey", "abc").query("target", 42);
        assert_eq!(request.method, HttpMethod::Get);
        assert_eq!(
            request.query,
            vec![
                ("sessionKey".to_string(), "abc".to_string()),
                ("target".to_string(), "42".to_string())
            ]
        );
    }
}
