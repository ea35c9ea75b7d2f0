//! Mapping of library errors onto HTTP responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::error::BackendError;
use crate::Error;

/// Errors returned by HTTP handlers. Bodies are plain text.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),

    #[error(transparent)]
    Iris(#[from] Error),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Iris(Error::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            Self::Iris(Error::Backend(err)) => backend_status(err),
            Self::Iris(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// The backend's own status is passed through; transport failures become 502/504.
fn backend_status(err: &BackendError) -> StatusCode {
    match err {
        BackendError::Status { status, .. } => {
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
        }
        BackendError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        BackendError::Unavailable(_)
        | BackendError::Exited { .. }
        | BackendError::Malformed(_) => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed ({}): {}", status, self);
        }
        (status, self.to_string()).into_response()
    }
}
