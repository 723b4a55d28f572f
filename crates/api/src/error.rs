//! API error type with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use checkout::CheckoutError;

/// Wraps `CheckoutError` for the HTTP boundary.
///
/// The error body carries the stable machine-readable code alongside
/// the human-readable message:
/// `{ "code": "CONFLICT", "error": "..." }`.
#[derive(Debug)]
pub struct ApiError(pub CheckoutError);

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.code() {
            "VALIDATION" => StatusCode::BAD_REQUEST,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "CONFLICT" => StatusCode::CONFLICT,
            "EXPIRED" => StatusCode::GONE,
            "SECURITY" => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "internal server error");
        }

        let body = serde_json::json!({
            "code": self.0.code(),
            "error": self.0.to_string(),
        });
        (status, axum::Json(body)).into_response()
    }
}
