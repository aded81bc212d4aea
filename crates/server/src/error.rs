//! API error envelope.
//!
//! Every failure leaves the server as `{code, message}` with a stable code.
//! Messages never carry warehouse URIs or model prompts.

use aegis_core::{AegisError, ErrorCode};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub struct ApiError(pub AegisError);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<AegisError> for ApiError {
    fn from(e: AegisError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let status = match code {
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::MissingReason => StatusCode::BAD_REQUEST,
            ErrorCode::InvalidTransition => StatusCode::CONFLICT,
            ErrorCode::DuplicateEnrollment => StatusCode::CONFLICT,
            ErrorCode::Unsupported => StatusCode::BAD_REQUEST,
            ErrorCode::Config => StatusCode::BAD_REQUEST,
            ErrorCode::Connectivity
            | ErrorCode::Permission
            | ErrorCode::RateLimited
            | ErrorCode::Timeout
            | ErrorCode::LlmUnavailable => StatusCode::BAD_GATEWAY,
            ErrorCode::Parse | ErrorCode::Storage | ErrorCode::Crypto => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = match status {
            // Internal failures are logged server-side; the caller gets the
            // category only.
            StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!(error = %self.0, "internal error");
                "internal error".to_string()
            }
            _ => self.0.to_string(),
        };

        (
            status,
            Json(json!({"code": code.as_str(), "message": message})),
        )
            .into_response()
    }
}
