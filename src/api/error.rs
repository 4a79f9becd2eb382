//! Maps `EngineError` onto HTTP status codes at the REST boundary.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::EngineError;

pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
            EngineError::InvalidState { .. } | EngineError::BadInput { .. } => {
                StatusCode::BAD_REQUEST
            }
            EngineError::Store { .. }
            | EngineError::External { .. }
            | EngineError::ApprovalRejected { .. }
            | EngineError::ApprovalTimeout => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
