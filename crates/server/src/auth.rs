//! Shared-secret header authentication.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::state::SharedState;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Reject requests that do not present the configured key. When no key is
/// configured, everything passes (local development).
pub async fn require_api_key(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    let expected = match &state.api_key {
        Some(expected) => expected,
        None => return next.run(request).await,
    };

    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    if presented == Some(expected.as_str()) {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"code": "unauthorized", "message": "missing or invalid API key"})),
        )
            .into_response()
    }
}
