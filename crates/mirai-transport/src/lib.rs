//! # Mirai Transport
//!
//! Network implementations of the `mirai-core` [`Transport`] trait.
//!
//! ## Features
//!
//! - `http-client`: request/response calls through `reqwest`
//! - `ws-client`: the `/all` event stream through `tokio-tungstenite`
//! - `full`: both
//!
//! Without a feature the matching half of [`MiraiClient`] returns
//! [`TransportError::NotAvailable`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mirai_core::EndpointConfig;
//! use mirai_transport::MiraiClient;
//!
//! let transport = MiraiClient::new(EndpointConfig::new("127.0.0.1", 8080))?.shared();
//! let about = transport.request(HttpRequest::get("/about")).await?;
//! ```

#[cfg(feature = "http-client")]
pub mod http;
#[cfg(feature = "ws-client")]
pub mod websocket;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use mirai_core::{
    BoxedFrameStream, EndpointConfig, HttpRequest, SharedTransport, Transport, TransportError,
    TransportResult,
};

/// The mirai-api-http server, reached over HTTP and WebSocket.
#[derive(Debug, Clone)]
pub struct MiraiClient {
    endpoint: EndpointConfig,
    #[cfg(feature = "http-client")]
    http: reqwest::Client,
}

impl MiraiClient {
    pub fn new(endpoint: EndpointConfig) -> TransportResult<Self> {
        if endpoint.host.trim().is_empty() {
            return Err(TransportError::InvalidConfig("host must not be empty".into()));
        }
        debug!(base = %endpoint.http_base(), "Creating mirai client");

        Ok(Self {
            #[cfg(feature = "http-client")]
            http: http::build_client(endpoint.request_timeout)?,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    pub fn shared(self) -> SharedTransport {
        Arc::new(self)
    }
}

#[async_trait]
impl Transport for MiraiClient {
    async fn request(&self, request: HttpRequest) -> TransportResult<Value> {
        #[cfg(feature = "http-client")]
        {
            http::send(&self.http, &self.endpoint.http_base(), request).await
        }
        #[cfg(not(feature = "http-client"))]
        {
            let _ = request;
            Err(TransportError::NotAvailable {
                transport: "http-client",
            })
        }
    }

    async fn open_stream(&self, path: &str, query: &[(String, String)]) -> TransportResult<BoxedFrameStream> {
        #[cfg(feature = "ws-client")]
        {
            let url = build_url(&self.endpoint.ws_base(), path, query);
            websocket::connect(&url, path).await
        }
        #[cfg(not(feature = "ws-client"))]
        {
            let _ = (path, query);
            Err(TransportError::NotAvailable {
                transport: "ws-client",
            })
        }
    }
}

/// Joins `base`, `path` and a percent-encoded query string.
pub fn build_url(base: &str, path: &str, query: &[(String, String)]) -> String {
    let mut url = format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'));
    for (i, (key, value)) in query.iter().enumerate() {
        url.push(if i == 0 { '?' } else { '&' });
        encode_component(key, &mut url);
        url.push('=');
        encode_component(value, &mut url);
    }
    url
}

fn encode_component(input: &str, out: &mut String) {
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn builds_urls_with_encoded_query() {
        assert_eq!(build_url("http://h:1/", "/about", &[]), "http://h:1/about");
        assert_eq!(
            build_url("ws://h:1", "all", &pairs(&[("sessionKey", "a b&c")])),
            "ws://h:1/all?sessionKey=a%20b%26c"
        );
        assert_eq!(
            build_url("http://h:1", "/memberList", &pairs(&[("sessionKey", "k"), ("target", "42")])),
            "http://h:1/memberList?sessionKey=k&target=42"
        );
    }

    #[test]
    fn rejects_empty_host() {
        let endpoint = EndpointConfig::new(" ", 8080);
        assert!(matches!(
            MiraiClient::new(endpoint),
            Err(TransportError::InvalidConfig(_))
        ));
    }

    #[cfg(not(feature = "ws-client"))]
    #[tokio::test]
    async fn stream_unavailable_without_feature() {
        let client = MiraiClient::new(EndpointConfig::default()).unwrap();
        let err = client.open_stream("/all", &[]).await.err().unwrap();
        assert!(matches!(err, TransportError::NotAvailable { transport: "ws-client" }));
    }
}
