//! Server configuration loading from file and environment variables.

use parley_voice::{GenerationConfig, SttConfig, TtsConfig};
use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Secrets shipped in sample configs. Starting with one of these is refused.
const PLACEHOLDER_SECRETS: &[&str] = &["CHANGE_ME", "REDACTED_JWT_PLACEHOLDER"];

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub stt: SttConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub tts: TtsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Debug mode relaxes the origin allowlist requirement and drops HSTS.
    #[serde(default)]
    pub debug: bool,

    /// Browser origins allowed for CORS and WebSocket connections.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// Credential signing and issuance settings.
#[derive(Clone, Deserialize)]
pub struct AuthConfig {
    /// Current HS256 signing secret.
    #[serde(default)]
    pub jwt_secret: String,

    /// Secret from before the last rotation, still accepted for verification.
    #[serde(default)]
    pub jwt_secret_previous: Option<String>,

    #[serde(default = "default_access_ttl")]
    pub access_token_ttl_secs: u64,

    #[serde(default = "default_refresh_ttl")]
    pub refresh_token_ttl_secs: u64,

    /// E-mail addresses permitted to obtain credentials.
    #[serde(default)]
    pub allowlist: Vec<String>,

    /// OAuth client id that Google ID tokens must be issued for.
    #[serde(default)]
    pub google_client_id: String,

    /// How long a new WebSocket may take to send its token.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
}

/// Per-session audio and conversation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Buffered duration that triggers a processing cycle.
    #[serde(default = "default_window_seconds")]
    pub window_seconds: f64,

    /// Sample rate of inbound PCM.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Maximum number of turns kept for generation context.
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,

    /// Outbound events buffered per connection before the session waits.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "parley_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    9000
}

fn default_access_ttl() -> u64 {
    60 * 60
}

fn default_refresh_ttl() -> u64 {
    30 * 24 * 60 * 60
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_window_seconds() -> f64 {
    parley_types::DEFAULT_WINDOW_SECONDS
}

fn default_sample_rate() -> u32 {
    parley_types::INPUT_SAMPLE_RATE
}

fn default_history_cap() -> usize {
    parley_types::DEFAULT_HISTORY_CAP
}

fn default_outbound_queue() -> usize {
    64
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            debug: false,
            cors_origins: Vec::new(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_secret_previous: None,
            access_token_ttl_secs: default_access_ttl(),
            refresh_token_ttl_secs: default_refresh_ttl(),
            allowlist: Vec::new(),
            google_client_id: String::new(),
            handshake_timeout_secs: default_handshake_timeout(),
        }
    }
}

impl AuthConfig {
    pub fn access_ttl(&self) -> Duration {
        Duration::from_secs(self.access_token_ttl_secs)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_token_ttl_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"[REDACTED]")
            .field(
                "jwt_secret_previous",
                &self.jwt_secret_previous.as_ref().map(|_| "[REDACTED]"),
            )
            .field("access_token_ttl_secs", &self.access_token_ttl_secs)
            .field("refresh_token_ttl_secs", &self.refresh_token_ttl_secs)
            .field("allowlist", &self.allowlist.len())
            .field("google_client_id", &self.google_client_id)
            .field("handshake_timeout_secs", &self.handshake_timeout_secs)
            .finish()
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            window_seconds: default_window_seconds(),
            sample_rate: default_sample_rate(),
            history_cap: default_history_cap(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(
        "auth.jwt_secret is not set; set PARLEY_JWT_SECRET or generate one with parley-rotate-secret"
    )]
    MissingSigningSecret,

    #[error("server.cors_origins is empty; set PARLEY_CORS_ORIGINS or enable server.debug")]
    MissingOrigins,

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Checks the conditions the server refuses to start without.
    ///
    /// # Errors
    ///
    /// Returns the first failing [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let secret = self.auth.jwt_secret.trim();
        if secret.is_empty() || PLACEHOLDER_SECRETS.contains(&secret) {
            return Err(ConfigError::MissingSigningSecret);
        }
        if self.server.cors_origins.is_empty() && !self.server.debug {
            return Err(ConfigError::MissingOrigins);
        }
        if !(self.session.window_seconds > 0.0 && self.session.window_seconds.is_finite()) {
            return Err(ConfigError::Invalid(
                "session.window_seconds must be positive".to_string(),
            ));
        }
        if self.session.sample_rate == 0 {
            return Err(ConfigError::Invalid(
                "session.sample_rate must be non-zero".to_string(),
            ));
        }
        if self.session.history_cap == 0 {
            return Err(ConfigError::Invalid(
                "session.history_cap must be non-zero".to_string(),
            ));
        }
        if self.session.outbound_queue == 0 {
            return Err(ConfigError::Invalid(
                "session.outbound_queue must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `PARLEY_HOST`, `PARLEY_PORT`, `PARLEY_DEBUG`
/// - `PARLEY_CORS_ORIGINS` (comma-separated)
/// - `PARLEY_JWT_SECRET`, `PARLEY_JWT_SECRET_PREVIOUS`
/// - `PARLEY_AUTH_ALLOWLIST` (comma-separated)
/// - `PARLEY_GOOGLE_CLIENT_ID`
/// - `PARLEY_LLM_API_KEY` overrides `generation.api_key`
/// - `PARLEY_LOG_LEVEL`, `PARLEY_LOG_JSON`
///
/// The result is not validated; call [`Config::validate`] before serving.
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Applies `PARLEY_*` overrides read through `lookup`.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(host) = lookup("PARLEY_HOST") {
        match host.parse() {
            Ok(parsed) => config.server.host = parsed,
            Err(_) => tracing::warn!(value = %host, "ignoring unparseable PARLEY_HOST"),
        }
    }
    if let Some(port) = lookup("PARLEY_PORT") {
        match port.parse() {
            Ok(parsed) => config.server.port = parsed,
            Err(_) => tracing::warn!(value = %port, "ignoring unparseable PARLEY_PORT"),
        }
    }
    if let Some(debug) = lookup("PARLEY_DEBUG") {
        config.server.debug = parse_flag(&debug);
    }
    if let Some(origins) = lookup("PARLEY_CORS_ORIGINS") {
        config.server.cors_origins = split_list(&origins);
    }
    if let Some(secret) = lookup("PARLEY_JWT_SECRET") {
        config.auth.jwt_secret = secret;
    }
    if let Some(previous) = lookup("PARLEY_JWT_SECRET_PREVIOUS") {
        config.auth.jwt_secret_previous = Some(previous).filter(|p| !p.trim().is_empty());
    }
    if let Some(allowlist) = lookup("PARLEY_AUTH_ALLOWLIST") {
        config.auth.allowlist = split_list(&allowlist);
    }
    if let Some(client_id) = lookup("PARLEY_GOOGLE_CLIENT_ID") {
        config.auth.google_client_id = client_id;
    }
    if let Some(api_key) = lookup("PARLEY_LLM_API_KEY") {
        config.generation.api_key = api_key;
    }
    if let Some(level) = lookup("PARLEY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("PARLEY_LOG_JSON") {
        config.logging.json = parse_flag(&json);
    }
}
