//! Opening handshake of a voice session.
//!
//! The first frame after the upgrade must be `{"token": "<access credential>"}`.
//! Anything else closes the connection with a policy violation.

use axum::extract::ws::Message;
use futures_util::{Stream, StreamExt};
use parley_auth::{CredentialCodec, CredentialError, CredentialKind, Identity};
use parley_types::AuthHandshake;
use std::time::Duration;

/// Why a handshake did not produce an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeRejection {
    /// No frame arrived in time.
    Timeout,
    /// The first frame was not a handshake carrying a token.
    MissingToken,
    /// The token did not decode as a valid access credential.
    InvalidToken(CredentialError),
    /// The client went away first.
    Disconnected,
}

impl HandshakeRejection {
    /// Reason to put in the 1008 close frame, or `None` when nobody is listening.
    pub fn close_reason(&self) -> Option<&'static str> {
        match self {
            HandshakeRejection::Timeout => Some("authentication timeout"),
            HandshakeRejection::MissingToken => Some("missing token"),
            HandshakeRejection::InvalidToken(_) => Some("invalid token"),
            HandshakeRejection::Disconnected => None,
        }
    }
}

/// Waits for the first client frame and verifies it.
///
/// Transport pings that arrive before it are skipped; the whole wait is
/// bounded by `timeout`.
pub async fn authenticate<S>(
    frames: &mut S,
    codec: &CredentialCodec,
    timeout: Duration,
) -> Result<Identity, HandshakeRejection>
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let next = tokio::time::timeout_at(deadline, frames.next())
            .await
            .map_err(|_| HandshakeRejection::Timeout)?;

        match next {
            None | Some(Err(_)) | Some(Ok(Message::Close(_))) => {
                return Err(HandshakeRejection::Disconnected)
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
            Some(Ok(Message::Text(text))) => return verify(text.as_str(), codec),
            Some(Ok(Message::Binary(_))) => return Err(HandshakeRejection::MissingToken),
        }
    }
}

fn verify(text: &str, codec: &CredentialCodec) -> Result<Identity, HandshakeRejection> {
    let handshake: AuthHandshake =
        serde_json::from_str(text).map_err(|_| HandshakeRejection::MissingToken)?;
    let token = handshake.token.trim();
    if token.is_empty() {
        return Err(HandshakeRejection::MissingToken);
    }
    codec
        .decode(token, CredentialKind::Access)
        .map_err(HandshakeRejection::InvalidToken)
}
