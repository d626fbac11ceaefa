use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("agent returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}

impl AdapterError {
    /// Whether the agent may succeed if the request is sent again
    pub fn is_transient(&self) -> bool {
        match self {
            AdapterError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            AdapterError::Json(_) => false,
            AdapterError::Status { status, .. } => {
                status.is_server_error()
                    || *status == reqwest::StatusCode::REQUEST_TIMEOUT
                    || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
        }
    }
}

impl From<AdapterError> for bridge_core::Error {
    fn from(err: AdapterError) -> Self {
        if err.is_transient() {
            bridge_core::Error::AdapterUnavailable(err.to_string())
        } else {
            bridge_core::Error::StreamError(err.to_string())
        }
    }
}
