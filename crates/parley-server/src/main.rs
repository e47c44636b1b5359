//! Parley server binary.
//!
//! Starts an axum HTTP server with structured logging, builds the pipeline
//! services once, reloads signing secrets on SIGHUP and shuts down
//! gracefully on SIGTERM/SIGINT.

use parley_auth::{GoogleAssertionVerifier, KeyRing, SigningKeyRing};
use parley_server::config::{self, Config};
use parley_server::{app, AppState};
use parley_voice::{ClaudeResponder, Pipeline, SttService, TtsService};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("PARLEY_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

fn build_pipeline(config: &Config) -> Pipeline {
    if config.generation.api_key.is_empty() {
        tracing::warn!("generation.api_key is empty; every cycle will report generation_failed");
    }

    let responder = ClaudeResponder::new(config.generation.clone())
        .expect("failed to build the generation HTTP client");
    tracing::info!(model = responder.model(), "generation client ready");

    Pipeline::new(
        Arc::new(SttService::from_config(&config.stt)),
        Arc::new(responder),
        Arc::new(TtsService::from_config(&config.tts)),
    )
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let config_path = resolved_config_path.unwrap_or_else(|| "config.toml".to_string());

    // Load configuration
    let config = config::load_config(Some(&config_path))
        .expect("failed to load configuration; the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = %config_path,
        "resolved startup configuration path"
    );

    if let Err(e) = config.validate() {
        tracing::error!("refusing to start: {}", e);
        std::process::exit(1);
    }

    if config.auth.google_client_id.is_empty() {
        tracing::warn!("auth.google_client_id is empty; Google sign-in will fail");
    }

    let verifier = GoogleAssertionVerifier::new(config.auth.google_client_id.clone())
        .expect("failed to build the identity provider HTTP client");
    let pipeline = build_pipeline(&config);

    let state = AppState::from_config(&config, Arc::new(verifier), pipeline)
        .expect("invalid signing secrets");

    if state.allowlist.is_empty() {
        tracing::warn!("auth.allowlist is empty; nobody can sign in");
    } else {
        tracing::info!(entries = state.allowlist.len(), "allowlist loaded");
    }

    #[cfg(unix)]
    tokio::spawn(reload_on_sighup(state.keys().clone(), config_path.clone()));

    // Build application
    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, debug = config.server.debug, "starting parley server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address; is another process using this port?");

    // Serve with graceful shutdown
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("server error");

    tracing::info!("parley server shut down");
}

/// Re-reads the configured secrets and swaps the key ring in place.
///
/// Returns whether the new ring was installed.
fn reload_key_ring(keys: &KeyRing, config_path: &str) -> bool {
    let config = match config::load_config(Some(config_path)) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("key ring reload failed, keeping current ring: {}", e);
            return false;
        }
    };
    if let Err(e) = config.validate() {
        tracing::error!("key ring reload failed, keeping current ring: {}", e);
        return false;
    }

    match SigningKeyRing::from_secrets(
        &config.auth.jwt_secret,
        config.auth.jwt_secret_previous.as_deref(),
    ) {
        Ok(ring) => {
            let has_previous = ring.previous().is_some();
            keys.replace(ring);
            tracing::info!(has_previous, "signing key ring reloaded");
            true
        }
        Err(e) => {
            tracing::error!("key ring reload failed, keeping current ring: {}", e);
            false
        }
    }
}

#[cfg(unix)]
async fn reload_on_sighup(keys: KeyRing, config_path: String) {
    let mut hangup =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
            Ok(signal) => signal,
            Err(e) => {
                tracing::error!("failed to install SIGHUP handler, key reload disabled: {}", e);
                return;
            }
        };

    while hangup.recv().await.is_some() {
        tracing::info!("received SIGHUP, reloading signing secrets");
        reload_key_ring(&keys, &config_path);
    }
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
