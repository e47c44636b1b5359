//! WebSocket endpoint for voice sessions: `GET /ws/voice-chat`.

use crate::handshake;
use crate::session::{Inbound, Outbound, SessionError, VoiceSession};
use crate::AppState;
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
        ConnectInfo, Extension,
    },
    http::{header, HeaderMap},
    response::IntoResponse,
};
use futures_util::{stream::SplitSink, FutureExt, SinkExt, StreamExt};
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Returns whether a browser `Origin` may open a session.
///
/// An empty allowlist (debug mode) admits every origin.
pub fn origin_allowed(allowed: &[String], origin: Option<&str>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    origin.is_some_and(|origin| allowed.iter().any(|a| a == origin))
}

fn close_message(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: Utf8Bytes::from_static(reason),
    }))
}

/// WebSocket handler: `GET /ws/voice-chat`.
///
/// The upgrade is always accepted so that rejections can carry a close
/// code and reason the browser can read.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    if !origin_allowed(&state.cors_origins, origin.as_deref()) {
        tracing::warn!(
            remote_addr = %addr,
            origin = origin.as_deref().unwrap_or("<none>"),
            "websocket rejected: origin not allowed"
        );
        return ws.on_upgrade(|mut socket| async move {
            let _ = socket
                .send(close_message(close_code::POLICY, "origin not allowed"))
                .await;
        });
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

/// Drives one connection from handshake to close.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, addr: SocketAddr) {
    let session_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();

    let identity = match handshake::authenticate(
        &mut receiver,
        &state.codec,
        state.session.handshake_timeout,
    )
    .await
    {
        Ok(identity) => identity,
        Err(rejection) => {
            match rejection.close_reason() {
                Some(reason) => {
                    tracing::warn!(
                        %session_id,
                        remote_addr = %addr,
                        reason,
                        "websocket auth failed"
                    );
                    let _ = sender.send(close_message(close_code::POLICY, reason)).await;
                }
                None => {
                    tracing::debug!(%session_id, remote_addr = %addr, "client left during handshake");
                }
            }
            return;
        }
    };

    tracing::info!(
        %session_id,
        subject = %identity.subject,
        remote_addr = %addr,
        "websocket auth success"
    );

    // Bounded so a slow reader applies backpressure to the session instead of
    // growing memory.
    let (tx, rx) = mpsc::channel::<Outbound>(state.session.outbound_queue);
    let writer = tokio::spawn(write_outbound(sender, rx, session_id));

    let mut session = VoiceSession::new(
        session_id,
        identity,
        &state.session,
        state.pipeline.clone(),
        tx.clone(),
    );

    if let Some((code, reason)) = receive_loop(&mut receiver, &mut session).await {
        let _ = tx.send(Outbound::Close { code, reason }).await;
    }

    let subject = session.identity().subject.clone();
    drop(session);
    drop(tx);
    if let Err(e) = writer.await {
        tracing::error!(%session_id, "websocket writer task failed: {}", e);
    }
    tracing::info!(%session_id, %subject, "session closed");
}

/// Feeds frames to the session until the connection ends.
///
/// Returns the close frame to send, if any.
async fn receive_loop<S>(receiver: &mut S, session: &mut VoiceSession) -> Option<(u16, &'static str)>
where
    S: futures_util::Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let session_id = session.id();
    while let Some(next) = receiver.next().await {
        let message = match next {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(%session_id, "websocket transport error: {}", e);
                return None;
            }
        };

        let frame = match &message {
            Message::Binary(bytes) => Inbound::Audio(&bytes[..]),
            Message::Text(text) => Inbound::Control(text.as_str()),
            Message::Close(_) => {
                tracing::info!(%session_id, "client closed the session");
                return None;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        match AssertUnwindSafe(session.handle(frame)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(SessionError::Disconnected)) => return None,
            Ok(Err(e)) => {
                tracing::warn!(%session_id, "closing session: {}", e);
                return e.close_frame();
            }
            Err(_) => {
                tracing::error!(%session_id, "session handler panicked");
                return Some((close_code::ERROR, "internal error"));
            }
        }
    }
    None
}

/// Serializes outbound events onto the socket in the order they were queued.
async fn write_outbound(
    mut sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    session_id: Uuid,
) {
    while let Some(outbound) = rx.recv().await {
        let message = match outbound {
            Outbound::Event(event) => match serde_json::to_string(&event) {
                Ok(json) => Message::Text(json.into()),
                Err(e) => {
                    tracing::error!(%session_id, "failed to serialize server event: {}", e);
                    close_message(close_code::ERROR, "internal error")
                }
            },
            Outbound::Close { code, reason } => close_message(code, reason),
        };

        let closing = matches!(message, Message::Close(_));
        if sender.send(message).await.is_err() || closing {
            break;
        }
    }
}
