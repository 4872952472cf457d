//! Runtime error types.

use mirai_core::{ApiError, StreamError, TransportError};
use thiserror::Error;

pub use crate::config::{ConfigError, ConfigResult};

/// Errors that can end a [`launch`](crate::launch)ed bot.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Loading or validating the configuration failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Building the transport failed.
    #[error("failed to build transport: {0}")]
    Transport(#[from] TransportError),

    /// A request to the server failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The event stream ended with an error.
    #[error("event stream failed: {0}")]
    Stream(#[from] StreamError),

    /// The user task failed.
    #[error("bot task failed: {0}")]
    Task(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl RuntimeError {
    /// Wraps an error returned by the user task.
    pub fn task(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Task(err.into())
    }
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
