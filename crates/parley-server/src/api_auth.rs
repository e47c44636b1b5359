//! Credential issuance: `/auth/google`, `/auth/refresh` and `/auth/me`.

use crate::api::ApiError;
use crate::AppState;
use axum::{
    extract::{Extension, Json},
    http::{header, HeaderMap},
};
use parley_auth::{CredentialKind, Identity};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Request body for `POST /auth/google`.
#[derive(Debug, Deserialize)]
pub struct GoogleLoginRequest {
    pub google_id_token: String,
}

/// Request body for `POST /auth/refresh`.
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Response from `/auth/google` and `/auth/refresh`.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    /// Only set on initial login; refresh never issues a new refresh credential.
    pub refresh_token: Option<String>,
    pub token_type: String,
    /// Access credential lifetime in seconds.
    pub expires_in: u64,
}

/// Response from `GET /auth/me`.
#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub name: String,
    pub picture: Option<String>,
}

fn issue_access(state: &AppState, identity: &Identity) -> Result<String, ApiError> {
    Ok(state
        .codec
        .encode(identity, CredentialKind::Access, state.access_ttl)?)
}

/// Handler for `POST /auth/google`.
///
/// Exchanges a Google ID token for an access and refresh credential pair if
/// the verified e-mail is on the allowlist.
pub async fn google_login_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<GoogleLoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let assertion = payload.google_id_token.trim();
    if assertion.is_empty() {
        return Err(ApiError::BadRequest("google_id_token is required".to_string()));
    }

    let asserted = state.verifier.verify(assertion).await.map_err(|e| {
        tracing::warn!("identity assertion rejected: {}", e);
        ApiError::from(e)
    })?;

    if !state.allowlist.permits(&asserted.email) {
        tracing::warn!(subject = %asserted.email, "login refused: not on allowlist");
        return Err(ApiError::Forbidden("Email not authorized".to_string()));
    }

    let identity: Identity = asserted.into();
    let access_token = issue_access(&state, &identity)?;
    let refresh_token = state
        .codec
        .encode(&identity, CredentialKind::Refresh, state.refresh_ttl)?;

    tracing::info!(subject = %identity.subject, "credentials issued");
    Ok(Json(AuthResponse {
        access_token,
        refresh_token: Some(refresh_token),
        token_type: "bearer".to_string(),
        expires_in: state.access_ttl.as_secs(),
    }))
}

/// Handler for `POST /auth/refresh`.
pub async fn refresh_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let identity = state
        .codec
        .decode(payload.refresh_token.trim(), CredentialKind::Refresh)
        .map_err(|e| {
            tracing::warn!("refresh credential rejected: {}", e);
            ApiError::from(e)
        })?;

    let access_token = issue_access(&state, &identity)?;
    tracing::info!(subject = %identity.subject, "access credential refreshed");

    Ok(Json(AuthResponse {
        access_token,
        refresh_token: None,
        token_type: "bearer".to_string(),
        expires_in: state.access_ttl.as_secs(),
    }))
}

/// Handler for `GET /auth/me`.
///
/// Requires `Authorization: Bearer <access credential>`.
pub async fn me_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<UserResponse>, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthorized("Invalid authorization header".to_string()))?;

    let identity = state.codec.decode(token.trim(), CredentialKind::Access)?;
    Ok(Json(UserResponse {
        id: identity.subject.clone(),
        email: identity.subject,
        name: identity.name,
        picture: identity.picture,
    }))
}
