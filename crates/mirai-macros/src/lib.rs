//! Procedural macros for the mirai client.
//!
//! This crate provides:
//!
//! - `#[derive(ConcreteEvent)]` - Ties a concrete event struct to its variant of
//!   `mirai_core::Event` and its `EventType` tag
//!
//! # ConcreteEvent Derive Macro
//!
//! ```rust,ignore
//! use mirai_macros::ConcreteEvent;
//!
//! #[derive(Debug, Clone, Deserialize, ConcreteEvent)]
//! pub struct GroupMessageEvent {
//!     #[serde(rename = "messageChain")]
//!     pub message: ReceivedMessage,
//!     pub sender: Member,
//! }
//!
//! // The variant defaults to the struct name minus the `Event` suffix.
//! #[derive(Debug, Clone, Deserialize, ConcreteEvent)]
//! #[event(variant = "BotOnline")]
//! pub struct BotOnlineEvent { /* ... */ }
//! ```

mod event;

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

/// Derives `ConcreteEvent` and `From<Self> for Event` for an event struct.
///
/// # Attributes
///
/// - `#[event(variant = "...")]` - Name of the `Event`/`EventType` variant
///   (default: the struct name with a trailing `Event` removed)
#[proc_macro_derive(ConcreteEvent, attributes(event))]
pub fn derive_concrete_event(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    event::derive_concrete_event(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}
