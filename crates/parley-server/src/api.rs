//! HTTP error mapping and the health endpoint.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use parley_auth::{AuthError, CredentialError};
use serde_json::{json, Value};
use thiserror::Error;

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("upstream unavailable: {0}")]
    BadGateway(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, &str) {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "upstream_unavailable", msg),
            ApiError::InternalServerError(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, detail) = self.parts();
        let body = Json(json!({
            "error": error,
            "detail": detail,
        }));
        (status, body).into_response()
    }
}

impl From<CredentialError> for ApiError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Encoding(msg) => ApiError::InternalServerError(msg),
            CredentialError::Expired => ApiError::Unauthorized("Token expired".to_string()),
            _ => ApiError::Unauthorized("Invalid token".to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidAssertion(_) => {
                ApiError::Unauthorized("Invalid identity token".to_string())
            }
            AuthError::NotAllowlisted => ApiError::Forbidden("Email not authorized".to_string()),
            AuthError::Upstream(msg) => ApiError::BadGateway(msg),
            AuthError::InvalidKeyRing(msg) => ApiError::InternalServerError(msg),
            AuthError::Credential(inner) => inner.into(),
        }
    }
}

/// Handler for `GET /health`.
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "parley",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
