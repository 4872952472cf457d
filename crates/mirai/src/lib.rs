//! # Mirai
//!
//! An asynchronous client for mirai-api-http, built around an event
//! multiplexer: code can wait for "the next event like this" while every
//! event nobody waits for goes to a fallback callback.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐   claimed   ┌──────────────────────┐
//! │  Transport   │────▶│ StreamReader │────────────▶│ bot.next_event_*()   │
//! │ (HTTP + WS)  │     │              │             └──────────────────────┘
//! └──────────────┘     └──────┬───────┘  unclaimed  ┌──────────────────────┐
//!                             └────────────────────▶│ fallback callback    │
//!                                                   └──────────────────────┘
//! ```
//!
//! - **Core** (`mirai-core`): events, messages, the waiter queue, patterns and
//!   the stream reader
//! - **Transport** (`mirai-transport`): `reqwest` and `tokio-tungstenite`
//!   implementations of the transport traits
//! - **Runtime** (`mirai-runtime`): the [`Bot`](prelude::Bot) session, the
//!   request API, configuration, logging and process lifecycle
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mirai::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = MiraiRuntime::new()?;
//!     let handle = runtime.clone();
//!
//!     runtime
//!         .run(|bot: Bot| async move {
//!             let replier = bot.clone();
//!             handle
//!                 .monitor_events(&bot, move |event: Event| {
//!                     let bot = replier.clone();
//!                     async move {
//!                         if let Event::FriendMessage(message) = event {
//!                             bot.reply(&message, message.message.plain_text()).await?;
//!                         }
//!                         Ok(Flow::Continue)
//!                     }
//!                 })
//!                 .await
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` (default) / `yaml-config`: configuration file formats
//! - `http-client` (default) / `ws-client` (default): transports
//! - `json-log`: JSON log output

pub use mirai_core as core;
pub use mirai_runtime as runtime;
pub use mirai_transport as transport;

/// Commonly used types for writing bots:
///
/// ```rust,ignore
/// use mirai::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use mirai_runtime::{
        Bot, MiraiConfig, MiraiRuntime, RuntimeError, RuntimeResult, UploadTarget, launch,
    };

    // Transport
    pub use mirai_transport::MiraiClient;

    // Events
    pub use mirai_core::{
        ConcreteEvent, Event, EventType, FriendMessageEvent, GroupMessageEvent, MessageEvent,
        ReplyTarget, TempMessageEvent,
    };

    // Messages and ids
    pub use mirai_core::{GroupId, ImageRef, Message, MessageId, Segment, TempId, UserId};

    // Event stream and waits
    pub use mirai_core::pattern::{any, from_group, from_temp, from_user, replying, text_eq};
    pub use mirai_core::{Flow, Pattern, StopHandle, WaitError};

    // Logging macros
    pub use mirai_runtime::prelude::*;
}
