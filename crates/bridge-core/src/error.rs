use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Agent adapter unavailable: {0}")]
    AdapterUnavailable(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Turn cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session error: {0}")]
    SessionError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Wire-level classification of an [`Error`], carried by error frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadRequest,
    UnknownAgent,
    AdapterUnavailable,
    Timeout,
    StreamError,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Whether the failure ends a turn after streaming has begun.
    pub fn is_mid_stream(&self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::StreamError)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::UnknownAgent => "unknown_agent",
            ErrorKind::AdapterUnavailable => "adapter_unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::StreamError => "stream_error",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BadRequest(_) => ErrorKind::BadRequest,
            Error::UnknownAgent(_) => ErrorKind::UnknownAgent,
            Error::AdapterUnavailable(_) => ErrorKind::AdapterUnavailable,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::StreamError(_) => ErrorKind::StreamError,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Config(_)
            | Error::SessionError(_)
            | Error::SerializationError(_)
            | Error::IoError(_)
            | Error::Other(_) => ErrorKind::Internal,
        }
    }

    /// Only a transport failure before the first event may be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::AdapterUnavailable(_))
    }

    /// Helper for creating configuration errors
    ///
    /// # Example
    /// ```
    /// use bridge_core::Error;
    /// let err = Error::config_error("duplicate agent name");
    /// ```
    pub fn config_error(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Helper for creating validation errors
    ///
    /// # Example
    /// ```
    /// use bridge_core::{Error, ErrorKind};
    /// let err = Error::bad_request("message must not be empty");
    /// assert_eq!(err.kind(), ErrorKind::BadRequest);
    /// ```
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Error::BadRequest(msg.into())
    }

    pub fn stream_error(msg: impl Into<String>) -> Self {
        Error::StreamError(msg.into())
    }

    /// Helper for creating general errors with a message
    pub fn message(msg: impl Into<String>) -> Self {
        Error::Other(anyhow::anyhow!("{}", msg.into()))
    }
}
