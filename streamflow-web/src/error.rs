//! API error responses

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use streamflow_core::TransferError;

/// Errors returned by API handlers, rendered as `{"error": "<message>"}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Missing query parameter: {name}")]
    MissingParameter { name: &'static str },

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

impl ApiError {
    /// HTTP status this error is answered with.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingParameter { .. } => StatusCode::BAD_REQUEST,
            ApiError::Transfer(e) => match e {
                TransferError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
                TransferError::TransferNotFound { .. }
                | TransferError::FileNotFound { .. }
                | TransferError::NotReady { .. } => StatusCode::NOT_FOUND,
                TransferError::MetadataTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                TransferError::UnsatisfiableRange { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
                TransferError::SwarmFailure(_) | TransferError::ReadFailure { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {self}");
        } else {
            tracing::debug!("Request rejected with {status}: {self}");
        }

        let mut response = (status, Json(json!({ "error": self.to_string() }))).into_response();
        if let ApiError::Transfer(TransferError::UnsatisfiableRange { length }) = self
            && let Ok(value) = HeaderValue::from_str(&format!("bytes */{length}"))
        {
            response.headers_mut().insert(header::CONTENT_RANGE, value);
        }
        response
    }
}
