use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use listwatch_core::error::AppError;

use crate::dto::ErrorResponse;

/// Wrapper so we can implement `IntoResponse` for `AppError`.
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self.0 {
            AppError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            AppError::SerializationError(_) => (StatusCode::BAD_REQUEST, "serialization_error"),
            AppError::JobNotFound(_) => (StatusCode::NOT_FOUND, "invalid_id"),
            AppError::QueueClosed => (StatusCode::SERVICE_UNAVAILABLE, "queue_closed"),
            AppError::StoreError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_error"),
            AppError::ConfigError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            AppError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = ErrorResponse::new(error_type, self.0.to_string());
        (status, axum::Json(body)).into_response()
    }
}
