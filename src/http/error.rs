//! Error-shaping helpers matching the propagation policy: upstream errors
//! pass through verbatim on the native endpoint, and get rewritten into
//! OpenAI's `{error: {message, type, code}}` shape on the compat endpoint.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

pub fn openai_error(status: StatusCode, message: impl Into<String>, kind: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "message": message.into(),
            "type": kind,
            "code": status.as_u16(),
        }
    });
    (status, Json(body)).into_response()
}

/// An upstream's own error body, returned as-is under its own status code,
/// used on the native `/v1/messages` endpoint.
pub fn upstream_verbatim(status: u16, body: String) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, body).into_response()
}

pub fn unknown_model(model_id: &str) -> Response {
    openai_error(
        StatusCode::BAD_REQUEST,
        format!("Unknown model: {}", model_id),
        "invalid_request_error",
    )
}

pub fn missing_credentials(message: impl Into<String>) -> Response {
    openai_error(StatusCode::UNAUTHORIZED, message, "authentication_error")
}

pub fn bad_request(message: impl Into<String>) -> Response {
    openai_error(StatusCode::BAD_REQUEST, message, "invalid_request_error")
}

pub fn internal_error() -> Response {
    openai_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal server error",
        "internal_error",
    )
}

pub fn from_auth_error(err: &crate::auth::AuthError) -> Response {
    use crate::auth::AuthError;
    match err {
        AuthError::Unauthenticated | AuthError::NoPendingLogin => {
            missing_credentials("not authenticated; run `max-gateway login` first")
        }
        AuthError::ReauthenticationRequired => {
            missing_credentials("long-lived token has expired; re-run setup")
        }
        AuthError::RefreshFailed(msg) | AuthError::ExchangeFailed(msg) => {
            missing_credentials(format!("credential refresh failed: {}", msg))
        }
    }
}
