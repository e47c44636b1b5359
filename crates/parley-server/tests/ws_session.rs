//! End-to-end WebSocket session tests.
//!
//! The server is bound to an ephemeral port and driven with a real
//! WebSocket client. Pipeline stages are scripted fakes so each scenario
//! controls which stage fails.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parley_auth::{
    AssertedIdentity, AssertionVerifier, AuthError, CredentialKind, Identity, SigningSecret,
};
use parley_server::config::Config;
use parley_server::{app, AppState};
use parley_types::Turn;
use parley_voice::{Pipeline, Responder, Synthesizer, Transcriber, VoiceError};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// One second of 16 kHz 16-bit mono silence.
const ONE_SECOND: usize = 32_000;

const SECRET: &str = "ws-session-test-secret";

struct NoVerifier;

#[async_trait]
impl AssertionVerifier for NoVerifier {
    async fn verify(&self, _assertion: &str) -> Result<AssertedIdentity, AuthError> {
        Err(AuthError::InvalidAssertion("not used".to_string()))
    }
}

#[derive(Default)]
struct Stages {
    fail_stt: bool,
    fail_tts: bool,
    panic_stt: bool,
    stt_delay: Option<Duration>,
    stt_calls: AtomicUsize,
}

#[async_trait]
impl Transcriber for Stages {
    async fn transcribe(&self, _pcm: &[u8]) -> Result<String, VoiceError> {
        self.stt_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.stt_delay {
            tokio::time::sleep(delay).await;
        }
        if self.panic_stt {
            panic!("transcriber lost its model");
        }
        if self.fail_stt {
            Err(VoiceError::Stt("model missing".to_string()))
        } else {
            Ok("what time is it".to_string())
        }
    }
}

#[async_trait]
impl Responder for Stages {
    async fn generate(&self, text: &str, _history: &[Turn]) -> Result<String, VoiceError> {
        Ok(format!("You asked: {}", text))
    }
}

#[async_trait]
impl Synthesizer for Stages {
    async fn synthesize(&self, _text: &str) -> Result<Vec<u8>, VoiceError> {
        if self.fail_tts {
            Err(VoiceError::Tts("piper crashed".to_string()))
        } else {
            Ok(b"RIFF....WAVE".to_vec())
        }
    }
}

fn test_config(origins: &[&str]) -> Config {
    let mut config = Config::default();
    config.server.debug = origins.is_empty();
    config.server.cors_origins = origins.iter().map(|o| o.to_string()).collect();
    config.auth.jwt_secret = SECRET.to_string();
    config
}

async fn spawn_server(state: AppState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = app(state);
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

async fn setup(stages: Stages) -> (SocketAddr, AppState, Arc<Stages>) {
    setup_with(stages, test_config(&[])).await
}

async fn setup_with(stages: Stages, config: Config) -> (SocketAddr, AppState, Arc<Stages>) {
    let stages = Arc::new(stages);
    let pipeline = Pipeline::new(stages.clone(), stages.clone(), stages.clone());
    let mut state = AppState::from_config(&config, Arc::new(NoVerifier), pipeline).unwrap();
    state.session.handshake_timeout = Duration::from_millis(300);
    let addr = spawn_server(state.clone()).await;
    (addr, state, stages)
}

fn access_token(state: &AppState) -> String {
    state
        .codec
        .encode(
            &Identity::new("ada@example.com"),
            CredentialKind::Access,
            Duration::from_secs(300),
        )
        .unwrap()
}

async fn connect(addr: SocketAddr) -> WsStream {
    let (ws, _) = connect_async(format!("ws://{}/ws/voice-chat", addr))
        .await
        .expect("failed to connect");
    ws
}

async fn connect_authenticated(addr: SocketAddr, state: &AppState) -> WsStream {
    let mut ws = connect(addr).await;
    send_json(&mut ws, json!({ "token": access_token(state) })).await;
    ws
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

async fn send_audio(ws: &mut WsStream, bytes: usize) {
    ws.send(Message::Binary(vec![0u8; bytes].into())).await.unwrap();
}

async fn next_event(ws: &mut WsStream) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for an event")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected a text event, got {:?}", other),
        }
    }
}

async fn expect_close(ws: &mut WsStream) -> (u16, String) {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for close")
            .expect("stream ended without a close frame")
            .expect("websocket error");
        match msg {
            Message::Close(Some(frame)) => return (u16::from(frame.code), frame.reason.to_string()),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected a close frame, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_five_chunks_buffer_then_respond() {
    let (addr, state, _) = setup(Stages::default()).await;
    let mut ws = connect_authenticated(addr, &state).await;

    let mut buffered = Vec::new();
    for _ in 0..4 {
        send_audio(&mut ws, ONE_SECOND).await;
        let event = next_event(&mut ws).await;
        assert_eq!(event["type"], "buffering");
        assert_eq!(event["target_seconds"], 5.0);
        buffered.push(event["buffered_seconds"].as_f64().unwrap());
    }
    assert!(buffered.windows(2).all(|w| w[0] < w[1]));

    send_audio(&mut ws, ONE_SECOND).await;
    let transcription = next_event(&mut ws).await;
    assert_eq!(transcription["type"], "transcription");
    assert_eq!(transcription["text"], "what time is it");

    let response = next_event(&mut ws).await;
    assert_eq!(response["type"], "response");
    assert_eq!(response["text"], "You asked: what time is it");
    assert!(response["audio"].is_string());
    assert!(response["processing_time"].is_number());

    // Nothing else is pending: the next event is the answer to this ping.
    send_json(&mut ws, json!({"type": "ping"})).await;
    assert_eq!(next_event(&mut ws).await, json!({"type": "pong"}));
}

#[tokio::test]
async fn test_end_audio_on_empty_buffer_sends_info() {
    let (addr, state, stages) = setup(Stages::default()).await;
    let mut ws = connect_authenticated(addr, &state).await;

    send_json(&mut ws, json!({"type": "end_audio"})).await;
    assert_eq!(
        next_event(&mut ws).await,
        json!({"type": "info", "message": "No audio to process"})
    );
    assert_eq!(stages.stt_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_end_audio_flushes_partial_buffer() {
    let (addr, state, _) = setup(Stages::default()).await;
    let mut ws = connect_authenticated(addr, &state).await;

    send_audio(&mut ws, ONE_SECOND / 2).await;
    assert_eq!(next_event(&mut ws).await["type"], "buffering");

    send_json(&mut ws, json!({"type": "end_audio"})).await;
    assert_eq!(next_event(&mut ws).await["type"], "transcription");
    assert_eq!(next_event(&mut ws).await["type"], "response");
}

#[tokio::test]
async fn test_transcription_failure_keeps_session_open() {
    let (addr, state, _) = setup(Stages {
        fail_stt: true,
        ..Stages::default()
    })
    .await;
    let mut ws = connect_authenticated(addr, &state).await;

    send_audio(&mut ws, 5 * ONE_SECOND).await;
    assert_eq!(
        next_event(&mut ws).await,
        json!({
            "type": "error",
            "code": "transcription_failed",
            "message": "Failed to transcribe audio"
        })
    );

    // Buffer was cleared: one more second only buffers.
    send_audio(&mut ws, ONE_SECOND).await;
    let event = next_event(&mut ws).await;
    assert_eq!(event["type"], "buffering");
    assert_eq!(event["buffered_seconds"], 1.0);
}

#[tokio::test]
async fn test_synthesis_failure_degrades_to_text_only() {
    let (addr, state, _) = setup(Stages {
        fail_tts: true,
        ..Stages::default()
    })
    .await;
    let mut ws = connect_authenticated(addr, &state).await;

    send_audio(&mut ws, 5 * ONE_SECOND).await;
    assert_eq!(next_event(&mut ws).await["type"], "transcription");

    let response = next_event(&mut ws).await;
    assert_eq!(response["type"], "response");
    assert_eq!(response["text"], "You asked: what time is it");
    assert!(response["audio"].is_null());
}

#[tokio::test]
async fn test_frames_during_cycle_are_queued_in_order() {
    let (addr, state, _) = setup(Stages {
        stt_delay: Some(Duration::from_millis(200)),
        ..Stages::default()
    })
    .await;
    let mut ws = connect_authenticated(addr, &state).await;

    send_audio(&mut ws, 5 * ONE_SECOND).await;
    send_json(&mut ws, json!({"type": "ping"})).await;

    assert_eq!(next_event(&mut ws).await["type"], "transcription");
    assert_eq!(next_event(&mut ws).await["type"], "response");
    assert_eq!(next_event(&mut ws).await["type"], "pong");
}

#[tokio::test]
async fn test_panicking_stage_closes_with_server_error() {
    let (addr, state, _) = setup(Stages {
        panic_stt: true,
        ..Stages::default()
    })
    .await;
    let mut ws = connect_authenticated(addr, &state).await;

    send_json(&mut ws, json!({"type": "ping"})).await;
    assert_eq!(next_event(&mut ws).await, json!({"type": "pong"}));

    send_audio(&mut ws, 5 * ONE_SECOND).await;
    assert_eq!(
        expect_close(&mut ws).await,
        (1011, "internal error".to_string())
    );
}

#[tokio::test]
async fn test_malformed_control_frame_closes_with_policy_violation() {
    let (addr, state, _) = setup(Stages::default()).await;
    let mut ws = connect_authenticated(addr, &state).await;

    send_json(&mut ws, json!({"type": "rewind"})).await;
    assert_eq!(
        expect_close(&mut ws).await,
        (1008, "malformed control frame".to_string())
    );
}

#[tokio::test]
async fn test_handshake_rejections() {
    let (addr, state, _) = setup(Stages::default()).await;

    // Not a credential at all.
    let mut ws = connect(addr).await;
    send_json(&mut ws, json!({"token": "not-a-jwt"})).await;
    assert_eq!(expect_close(&mut ws).await, (1008, "invalid token".to_string()));

    // Missing token field.
    let mut ws = connect(addr).await;
    send_json(&mut ws, json!({"type": "ping"})).await;
    assert_eq!(expect_close(&mut ws).await, (1008, "missing token".to_string()));

    // Audio before auth.
    let mut ws = connect(addr).await;
    send_audio(&mut ws, 64).await;
    assert_eq!(expect_close(&mut ws).await, (1008, "missing token".to_string()));

    // A refresh credential is the wrong kind.
    let refresh = state
        .codec
        .encode(
            &Identity::new("ada@example.com"),
            CredentialKind::Refresh,
            Duration::from_secs(300),
        )
        .unwrap();
    let mut ws = connect(addr).await;
    send_json(&mut ws, json!({ "token": refresh })).await;
    assert_eq!(expect_close(&mut ws).await, (1008, "invalid token".to_string()));

    // Expired access credential.
    let expired = state
        .codec
        .encode_at(
            &Identity::new("ada@example.com"),
            CredentialKind::Access,
            Duration::from_secs(60),
            1_000_000,
        )
        .unwrap();
    let mut ws = connect(addr).await;
    send_json(&mut ws, json!({ "token": expired })).await;
    assert_eq!(expect_close(&mut ws).await, (1008, "invalid token".to_string()));
}

#[tokio::test]
async fn test_silent_client_times_out() {
    let (addr, _, _) = setup(Stages::default()).await;
    let mut ws = connect(addr).await;

    assert_eq!(
        expect_close(&mut ws).await,
        (1008, "authentication timeout".to_string())
    );
}

#[tokio::test]
async fn test_disallowed_origin_is_closed() {
    let config = test_config(&["https://app.example"]);
    let (addr, state, _) = setup_with(Stages::default(), config).await;

    let mut request = format!("ws://{}/ws/voice-chat", addr)
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("Origin", "https://evil.example".parse().unwrap());
    let (mut ws, _) = connect_async(request).await.unwrap();
    assert_eq!(
        expect_close(&mut ws).await,
        (1008, "origin not allowed".to_string())
    );

    // The listed origin gets through to the handshake.
    let mut request = format!("ws://{}/ws/voice-chat", addr)
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("Origin", "https://app.example".parse().unwrap());
    let (mut ws, _) = connect_async(request).await.unwrap();
    send_json(&mut ws, json!({ "token": access_token(&state) })).await;
    send_json(&mut ws, json!({"type": "ping"})).await;
    assert_eq!(next_event(&mut ws).await, json!({"type": "pong"}));
}

#[tokio::test]
async fn test_token_from_previous_secret_survives_rotation() {
    let (addr, state, _) = setup(Stages::default()).await;
    let old_token = access_token(&state);

    state
        .keys()
        .rotate(SigningSecret::new("the-next-secret").unwrap());

    let mut ws = connect(addr).await;
    send_json(&mut ws, json!({ "token": old_token })).await;
    send_json(&mut ws, json!({"type": "ping"})).await;
    assert_eq!(next_event(&mut ws).await, json!({"type": "pong"}));

    // Once retired, the old secret no longer verifies.
    state.keys().retire_previous();
    let mut ws = connect(addr).await;
    send_json(&mut ws, json!({ "token": old_token })).await;
    assert_eq!(expect_close(&mut ws).await, (1008, "invalid token".to_string()));
}
