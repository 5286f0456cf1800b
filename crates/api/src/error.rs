//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use topup::{ErrorKind, TopupError};

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad request from the client.
    #[error("{0}")]
    BadRequest(String),
    /// Saga or query error.
    #[error(transparent)]
    Topup(#[from] TopupError),
}

impl ApiError {
    /// Returns the HTTP status this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Topup(err) => match err.kind() {
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Publish => StatusCode::BAD_GATEWAY,
                ErrorKind::Persistence | ErrorKind::Rollback => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, %status, "request failed");
        }

        let body = match &self {
            ApiError::Topup(TopupError::PublishFailed { topup_id, .. }) => serde_json::json!({
                "error": self.to_string(),
                "topup_id": topup_id.as_i64(),
                "committed": true,
            }),
            _ => serde_json::json!({ "error": self.to_string() }),
        };
        (status, axum::Json(body)).into_response()
    }
}
