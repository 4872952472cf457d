//! Errors raised by the waiter queue, the stream reader and fallback dispatch.

use std::any::Any;

use thiserror::Error;

use crate::foundation::error::{DecodeError, TransportError};
use crate::foundation::event::EventType;

/// Boxed error returned by user callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

// =============================================================================
// Wait Errors
// =============================================================================

/// Why a pending wait ended without an event.
#[derive(Debug, Clone, Error)]
pub enum WaitError {
    /// The predicate of this waiter panicked while evaluating an event.
    #[error("predicate panicked: {0}")]
    PredicatePanicked(String),

    /// The event stream failed while the waiter was pending.
    #[error("event stream failed: {0}")]
    StreamFailed(TransportError),

    /// The event stream was stopped while the waiter was pending.
    #[error("event stream closed")]
    StreamClosed,

    /// The waiter was resolved without an event, or polled after completion.
    #[error("waiter closed")]
    Closed,

    /// A claimed event did not convert into the waited type.
    #[error("expected {expected} event, got {found}")]
    TypeMismatch {
        expected: EventType,
        found: EventType,
    },
}

// =============================================================================
// Stream Errors
// =============================================================================

/// Terminal error of a stream reader.
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// Connecting to or reading from the stream failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The reader task ended without reporting a result.
    #[error("stream reader aborted: {0}")]
    Aborted(String),
}

// =============================================================================
// Dispatch Errors
// =============================================================================

/// Non-fatal failures handed to the exception sink.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A frame could not be decoded and was skipped.
    #[error("skipped undecodable frame: {0}")]
    Decode(#[from] DecodeError),

    /// A fallback callback returned an error.
    #[error("callback for {event_type} failed: {source}")]
    Callback {
        event_type: EventType,
        #[source]
        source: BoxError,
    },

    /// A fallback callback panicked.
    #[error("callback for {event_type} panicked: {message}")]
    CallbackPanicked {
        event_type: EventType,
        message: String,
    },
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for pattern waits.
pub type WaitResult<T> = Result<T, WaitError>;

/// Result type for stream readers.
pub type StreamResult<T> = Result<T, StreamError>;

/// Renders a panic payload caught with `catch_unwind`.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
