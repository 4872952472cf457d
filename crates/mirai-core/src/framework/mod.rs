//! Framework layer: the event multiplexer.
//!
//! - [`scheduler`] - timers and task spawning
//! - [`waiter`] - the waiter queue and its exactly-once claim protocol
//! - [`pattern`] - patterns and the `await_match*` API
//! - [`stream`] - the stream reader loop and fallback dispatch

pub mod error;
pub mod pattern;
pub mod scheduler;
pub mod stream;
pub mod waiter;
