use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, HeaderName, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::AppState;

/// Length of a rate-limit window.
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Map size above which expired windows are evicted.
const RATE_LIMIT_EVICTION_THRESHOLD: usize = 10_000;

const PERMISSIONS_POLICY: HeaderName = HeaderName::from_static("permissions-policy");

/// Rate limiting key: one counter per client IP per route.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub route: &'static str,
    pub ip: IpAddr,
}

/// Requests per minute allowed on a rate-limited route, or `None` if unlimited.
pub fn route_limit(path: &str) -> Option<(&'static str, u32)> {
    match path {
        "/auth/google" => Some(("/auth/google", 10)),
        "/auth/refresh" => Some(("/auth/refresh", 20)),
        "/auth/me" => Some(("/auth/me", 30)),
        _ => None,
    }
}

/// In-memory rate limiter state.
///
/// Uses a simple fixed window counter.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    state: Arc<Mutex<HashMap<RateLimitKey, (u32, Instant)>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Counts a request against `key`.
    ///
    /// Returns `true` if allowed, `false` if limit exceeded.
    pub fn check(&self, key: RateLimitKey, limit: u32) -> bool {
        self.check_at(key, limit, Instant::now())
    }

    fn check_at(&self, key: RateLimitKey, limit: u32, now: Instant) -> bool {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                // A stale counter is acceptable; refusing every request is not.
                tracing::error!("rate limiter lock poisoned, recovering with stale state");
                poisoned.into_inner()
            }
        };

        // Evict only expired windows so active limits survive cleanup.
        if state.len() > RATE_LIMIT_EVICTION_THRESHOLD {
            state.retain(|_, (_, start)| now.duration_since(*start) <= RATE_LIMIT_WINDOW);
        }

        let (count, start) = state.entry(key).or_insert((0, now));

        if now.duration_since(*start) > RATE_LIMIT_WINDOW {
            *count = 1;
            *start = now;
            true
        } else {
            *count += 1;
            *count <= limit
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Rate limiting middleware for the credential routes.
pub async fn rate_limit_middleware(req: Request<Body>, next: Next) -> Response {
    let Some((route, limit)) = route_limit(req.uri().path()) else {
        return next.run(req).await;
    };

    let Some(state) = req.extensions().get::<Arc<AppState>>().cloned() else {
        tracing::error!("application state missing from request extensions");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    // Without ConnectInfo there is no key to count against; fail closed.
    let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>().copied()
    else {
        tracing::error!(route, "connect info missing, cannot rate limit");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    if !state.rate_limiter.check(RateLimitKey { route, ip: addr.ip() }, limit) {
        tracing::warn!(route, remote_addr = %addr, "rate limit exceeded");
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "error": "rate_limited",
                "detail": "Rate limit exceeded. Try again later."
            })),
        )
            .into_response();
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from_static("60"));
        return response;
    }

    next.run(req).await
}

/// Adds browser hardening headers to every response.
///
/// HSTS is sent unless the server runs in debug mode.
pub async fn security_headers_middleware(req: Request<Body>, next: Next) -> Response {
    let debug = req
        .extensions()
        .get::<Arc<AppState>>()
        .map(|state| state.debug)
        .unwrap_or(false);

    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        PERMISSIONS_POLICY,
        HeaderValue::from_static("microphone=(self)"),
    );
    if !debug {
        headers.insert(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        );
    }
    response
}
