use crate::types::ErrorBody;
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bridge_core::{Error, ErrorKind};

/// Seconds a client should wait before retrying an unavailable agent
pub const RETRY_AFTER_SECS: u64 = 1;

/// Error returned before a response starts streaming
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    kind: ErrorKind,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, ErrorKind::BadRequest, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let kind = err.kind();
        let status = match kind {
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::UnknownAgent => StatusCode::NOT_FOUND,
            ErrorKind::AdapterUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::StreamError | ErrorKind::Cancelled | ErrorKind::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(kind = %kind, error = %err, "Request failed");
        } else {
            tracing::debug!(kind = %kind, error = %err, "Request rejected");
        }
        Self::new(status, kind, err.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            ErrorKind::BadRequest,
            format!("bad request: {}", rejection.body_text()),
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            kind: self.kind,
        };
        let mut response = (self.status, Json(body)).into_response();
        if self.kind == ErrorKind::AdapterUnavailable {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECS));
        }
        response
    }
}
