//! Mirai Runtime - session and process layer for the mirai client.
//!
//! This crate provides:
//! - The [`Bot`] session: authorization, the event stream and pattern waits
//! - The mirai-api-http request surface (messages, uploads, group management)
//! - Layered configuration (`figment`: defaults, files, `MIRAI_*` environment)
//! - Logging configuration
//! - [`MiraiRuntime`] / [`launch`] to run a bot until Ctrl+C
//!
//! ```ignore
//! use mirai_runtime::{Bot, MiraiRuntime};
//! use mirai_core::{Event, Flow};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = MiraiRuntime::new()?;
//!     let handle = runtime.clone();
//!
//!     runtime
//!         .run(|bot: Bot| async move {
//!             handle
//!                 .monitor_events(&bot, |event: Event| async move {
//!                     tracing::info!(event_type = %event.event_type(), "Event");
//!                     Ok(Flow::Continue)
//!                 })
//!                 .await
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! # Transport Features
//!
//! - `http-client`: request/response calls over `reqwest`
//! - `ws-client`: the `/all` event stream over `tokio-tungstenite`
//! - `full-transport`: both

pub mod api;
pub mod bot;
pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

// Re-exports
pub use api::UploadTarget;
pub use bot::{Bot, SessionInfo};
pub use config::{
    ConfigError, ConfigLoader, ConfigResult, ConnectionConfig, LoggingConfig, MiraiConfig, Profile,
    SessionSettings, StreamSettings,
};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{MiraiRuntime, launch, wait_for_shutdown};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros for bot code.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
