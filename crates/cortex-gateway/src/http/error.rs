use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use cortex_core::CortexError;

/// Error wrapper that maps the workspace error taxonomy onto HTTP status
/// codes at the handler boundary.
pub struct ApiError(pub CortexError);

impl<E: Into<CortexError>> From<E> for ApiError {
    fn from(e: E) -> Self {
        ApiError(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CortexError::NotFound(_) => StatusCode::NOT_FOUND,
            CortexError::Conflict { .. } => StatusCode::CONFLICT,
            CortexError::Validation(_) => StatusCode::BAD_REQUEST,
            CortexError::SyncAuth { .. } => StatusCode::BAD_GATEWAY,
            CortexError::TransientNetwork(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "internal error");
        }
        let body = json!({
            "error": self.0.to_string(),
            "error_code": self.0.code(),
        });
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
