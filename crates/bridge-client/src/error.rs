use bridge_core::ErrorKind;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The bridge refused the turn before streaming anything
    #[error("bridge rejected the request ({status}): {message}")]
    Rejected {
        status: u16,
        kind: Option<ErrorKind>,
        message: String,
    },

    #[error(transparent)]
    Bridge(#[from] bridge_core::Error),
}

impl ClientError {
    /// Error kind reported by the bridge, if it reported one
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ClientError::Rejected { kind, .. } => *kind,
            ClientError::Bridge(e) => Some(e.kind()),
            ClientError::Http(_) => None,
        }
    }

    /// The turn may succeed if sent again later
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Rejected { status, .. } => *status == 503,
            ClientError::Http(e) => e.is_connect() || e.is_timeout(),
            ClientError::Bridge(e) => e.is_retryable(),
        }
    }
}
