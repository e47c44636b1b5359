//! Parley server library logic.

pub mod api;
pub mod api_auth;
pub mod api_ws;
pub mod config;
pub mod handshake;
pub mod middleware;
pub mod session;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Extension, Router,
};
use config::Config;
use middleware::RateLimiter;
use parley_auth::{Allowlist, AssertionVerifier, AuthError, CredentialCodec, KeyRing, SigningKeyRing};
use parley_voice::Pipeline;
use session::SessionSettings;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Signs and verifies credentials against the shared key ring.
    pub codec: CredentialCodec,
    /// Identities allowed to obtain credentials.
    pub allowlist: Arc<Allowlist>,
    /// Third-party identity assertion verifier.
    pub verifier: Arc<dyn AssertionVerifier>,
    /// Pipeline stages handed to each new session.
    pub pipeline: Pipeline,
    /// Per-session limits.
    pub session: SessionSettings,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    /// Allowed browser origins; empty only in debug mode.
    pub cors_origins: Arc<Vec<String>>,
    pub debug: bool,
    /// Rate limiter state.
    pub rate_limiter: RateLimiter,
}

impl AppState {
    /// Builds the state from validated configuration and constructed services.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKeyRing`] if the configured secrets are unusable.
    pub fn from_config(
        config: &Config,
        verifier: Arc<dyn AssertionVerifier>,
        pipeline: Pipeline,
    ) -> Result<Self, AuthError> {
        let ring = SigningKeyRing::from_secrets(
            &config.auth.jwt_secret,
            config.auth.jwt_secret_previous.as_deref(),
        )?;
        Ok(Self {
            codec: CredentialCodec::new(KeyRing::new(ring)),
            allowlist: Arc::new(Allowlist::new(&config.auth.allowlist)),
            verifier,
            pipeline,
            session: SessionSettings::from(config),
            access_ttl: config.auth.access_ttl(),
            refresh_ttl: config.auth.refresh_ttl(),
            cors_origins: Arc::new(config.server.cors_origins.clone()),
            debug: config.server.debug,
            rate_limiter: RateLimiter::new(),
        })
    }

    /// The key ring behind [`codec`](Self::codec), for reloads and rotation.
    pub fn keys(&self) -> &KeyRing {
        self.codec.keys()
    }
}

/// Maximum request body size (64 KiB). Credential routes carry small JSON bodies.
const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if origins.is_empty() {
        tracing::warn!("no CORS origins configured, allowing any origin (debug mode)");
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring unparseable CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(allowed).allow_credentials(true)
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let cors = cors_layer(&state.cors_origins);

    Router::new()
        .route("/health", get(api::health))
        .route("/auth/google", post(api_auth::google_login_handler))
        .route("/auth/refresh", post(api_auth::refresh_handler))
        .route("/auth/me", get(api_auth::me_handler))
        .route("/ws/voice-chat", get(api_ws::ws_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(axum::middleware::from_fn(middleware::rate_limit_middleware))
        .layer(axum::middleware::from_fn(
            middleware::security_headers_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
