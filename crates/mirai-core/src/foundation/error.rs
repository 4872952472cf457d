//! Error types shared by the foundation and integration layers.
//!
//! Errors raised by the waiter queue and the stream reader live in
//! [`crate::framework::error`].

use thiserror::Error;

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors that can occur in transport operations.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {url} - {reason}")]
    ConnectionFailed {
        /// The URL that failed to connect.
        url: String,
        /// Reason for failure.
        reason: String,
    },

    /// Connection closed unexpectedly.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Reason for closure.
        reason: String,
    },

    /// The server answered with a non-success HTTP status.
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// Status code returned by the server.
        status: u16,
        /// The request URL.
        url: String,
    },

    /// Response body could not be read as JSON.
    #[error("invalid response body: {0}")]
    InvalidBody(String),

    /// Transport not compiled in.
    #[error("transport '{transport}' not available")]
    NotAvailable {
        /// The transport type that's not available.
        transport: &'static str,
    },

    /// Invalid configuration.
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// =============================================================================
// Decode Errors
// =============================================================================

/// Errors produced while turning a stream frame into an [`Event`](crate::Event).
///
/// Never fatal to the stream: the reader reports and skips the frame.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// The frame is not valid JSON or does not fit the event's shape.
    #[error("malformed event payload: {0}")]
    Json(String),

    /// The object has no string `type` field.
    #[error("event payload has no `type` discriminant")]
    MissingDiscriminant,

    /// The `type` field names an event this client does not know.
    #[error("unknown event type '{0}'")]
    UnknownEventType(String),
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

// =============================================================================
// API Errors
// =============================================================================

/// Status codes returned in the `code` field of mirai-api-http responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MiraiStatus {
    Success,
    IncorrectAuthKey,
    BotNotExist,
    SessionInvalid,
    SessionNotVerified,
    TargetNotExist,
    FileNotExist,
    NoPermission,
    BotMuted,
    MessageTooLong,
    ErroneousAccess,
}

impl MiraiStatus {
    /// Maps a raw status code, or `None` for codes this client does not know.
    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => Self::Success,
            1 => Self::IncorrectAuthKey,
            2 => Self::BotNotExist,
            3 => Self::SessionInvalid,
            4 => Self::SessionNotVerified,
            5 => Self::TargetNotExist,
            6 => Self::FileNotExist,
            10 => Self::NoPermission,
            20 => Self::BotMuted,
            30 => Self::MessageTooLong,
            400 => Self::ErroneousAccess,
            _ => return None,
        })
    }

    pub fn code(self) -> i64 {
        match self {
            Self::Success => 0,
            Self::IncorrectAuthKey => 1,
            Self::BotNotExist => 2,
            Self::SessionInvalid => 3,
            Self::SessionNotVerified => 4,
            Self::TargetNotExist => 5,
            Self::FileNotExist => 6,
            Self::NoPermission => 10,
            Self::BotMuted => 20,
            Self::MessageTooLong => 30,
            Self::ErroneousAccess => 400,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::IncorrectAuthKey => "incorrect auth key",
            Self::BotNotExist => "the bot does not exist",
            Self::SessionInvalid => "the session is invalid or does not exist",
            Self::SessionNotVerified => "the session has not been verified",
            Self::TargetNotExist => "the target of the message does not exist",
            Self::FileNotExist => "the requested file does not exist",
            Self::NoPermission => "the bot has no permission for this operation",
            Self::BotMuted => "the bot is muted in this group",
            Self::MessageTooLong => "the message is too long",
            Self::ErroneousAccess => "erroneous access",
        }
    }
}

impl std::fmt::Display for MiraiStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.description(), self.code())
    }
}

/// Errors returned by session and request methods.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The server rejected the request with a known status code.
    #[error("request rejected: {0}")]
    Status(MiraiStatus),

    /// The server answered with a status code this client does not know.
    #[error("request rejected with unknown status code {0}")]
    UnknownStatus(i64),

    /// The session has not been authorized yet.
    #[error("session is not authorized")]
    NotAuthorized,

    /// `authorize` was called on a session that already holds a key.
    #[error("session is already authorized")]
    AlreadyAuthorized,

    /// A response did not have the expected shape.
    #[error("unexpected response: {0}")]
    Response(String),

    /// Transport error.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ApiError {
    /// Builds the error for a non-zero status code.
    pub fn from_status_code(code: i64) -> Self {
        match MiraiStatus::from_code(code) {
            Some(status) => Self::Status(status),
            None => Self::UnknownStatus(code),
        }
    }

    /// Creates a response shape error.
    pub fn response(msg: impl Into<String>) -> Self {
        Self::Response(msg.into())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Response(err.to_string())
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for event decoding.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Result type for session and request methods.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_round_trip() {
        for code in [0, 1, 2, 3, 4, 5, 6, 10, 20, 30, 400] {
            let status = MiraiStatus::from_code(code).unwrap();
            assert_eq!(status.code(), code);
        }
        assert!(MiraiStatus::from_code(7).is_none());
    }

    #[test]
    fn api_error_from_status_code() {
        assert!(matches!(
            ApiError::from_status_code(3),
            ApiError::Status(MiraiStatus::SessionInvalid)
        ));
        assert!(matches!(
            ApiError::from_status_code(99),
            ApiError::UnknownStatus(99)
        ));
        let msg = ApiError::from_status_code(20).to_string();
        assert!(msg.contains("muted"));
    }
}
