//! Per-connection voice session state machine.
//!
//! A [`VoiceSession`] exists only once the handshake has produced an
//! identity, so it starts `Active`. It owns the accumulator and history for
//! its connection and is driven one frame at a time by the receive loop in
//! [`crate::api_ws`]. A processing cycle runs inside [`VoiceSession::handle`],
//! so no further frame is read until it finishes; frames sent meanwhile wait
//! in the transport and are handled in order afterwards.

use crate::config::Config;
use axum::extract::ws::close_code;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use parley_auth::Identity;
use parley_types::{ClientControl, ErrorCode, ServerEvent};
use parley_voice::{AudioAccumulator, ConversationHistory, Pipeline};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

const TRANSCRIPTION_FAILED_MESSAGE: &str = "Failed to transcribe audio";
const GENERATION_FAILED_MESSAGE: &str = "Failed to generate a response";
const NOTHING_BUFFERED_MESSAGE: &str = "No audio to process";

/// Session limits derived from configuration.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub window_seconds: f64,
    pub sample_rate: u32,
    pub history_cap: usize,
    pub outbound_queue: usize,
    pub handshake_timeout: Duration,
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            window_seconds: config.session.window_seconds,
            sample_rate: config.session.sample_rate,
            history_cap: config.session.history_cap,
            outbound_queue: config.session.outbound_queue,
            handshake_timeout: config.auth.handshake_timeout(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// A frame from the client once the session is active.
#[derive(Debug, Clone, Copy)]
pub enum Inbound<'a> {
    /// Raw PCM audio.
    Audio(&'a [u8]),
    /// A JSON control message.
    Control(&'a str),
}

/// What the writer task puts on the wire.
#[derive(Debug, Clone)]
pub enum Outbound {
    Event(ServerEvent),
    Close { code: u16, reason: &'static str },
}

/// Conditions that end a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("malformed control frame: {0}")]
    MalformedControl(String),

    #[error("outbound channel closed")]
    Disconnected,
}

impl SessionError {
    /// Close code and reason to send, if the peer can still be told.
    pub fn close_frame(&self) -> Option<(u16, &'static str)> {
        match self {
            SessionError::MalformedControl(_) => {
                Some((close_code::POLICY, "malformed control frame"))
            }
            SessionError::Disconnected => None,
        }
    }
}

/// The active state of one authenticated connection.
pub struct VoiceSession {
    id: Uuid,
    identity: Identity,
    accumulator: AudioAccumulator,
    history: ConversationHistory,
    pipeline: Pipeline,
    outbound: mpsc::Sender<Outbound>,
}

impl VoiceSession {
    pub fn new(
        id: Uuid,
        identity: Identity,
        settings: &SessionSettings,
        pipeline: Pipeline,
        outbound: mpsc::Sender<Outbound>,
    ) -> Self {
        Self {
            id,
            identity,
            accumulator: AudioAccumulator::new(settings.window_seconds, settings.sample_rate),
            history: ConversationHistory::new(settings.history_cap),
            pipeline,
            outbound,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn buffered_bytes(&self) -> usize {
        self.accumulator.total_bytes()
    }

    /// Routes one inbound frame.
    ///
    /// # Errors
    ///
    /// [`SessionError::MalformedControl`] for a control frame that is not
    /// valid JSON or has an unknown `type`; [`SessionError::Disconnected`]
    /// once the writer has gone away.
    pub async fn handle(&mut self, frame: Inbound<'_>) -> Result<(), SessionError> {
        match frame {
            Inbound::Audio(chunk) => self.on_audio(chunk).await,
            Inbound::Control(text) => {
                let control: ClientControl = serde_json::from_str(text)
                    .map_err(|e| SessionError::MalformedControl(e.to_string()))?;
                self.on_control(control).await
            }
        }
    }

    async fn on_audio(&mut self, chunk: &[u8]) -> Result<(), SessionError> {
        if chunk.is_empty() {
            return Ok(());
        }

        tracing::debug!(session_id = %self.id, bytes = chunk.len(), "audio chunk received");
        if self.accumulator.add_chunk(chunk.to_vec()) {
            self.run_cycle().await
        } else {
            self.emit(ServerEvent::Buffering {
                buffered_seconds: self.accumulator.buffered_seconds(),
                target_seconds: self.accumulator.target_seconds(),
            })
            .await
        }
    }

    async fn on_control(&mut self, control: ClientControl) -> Result<(), SessionError> {
        match control {
            ClientControl::EndAudio if self.accumulator.is_empty() => {
                self.emit(ServerEvent::Info {
                    message: NOTHING_BUFFERED_MESSAGE.to_string(),
                })
                .await
            }
            ClientControl::EndAudio => self.run_cycle().await,
            ClientControl::Ping => self.emit(ServerEvent::Pong).await,
        }
    }

    /// Drains the buffer and runs transcribe, generate and synthesize.
    ///
    /// Emits exactly one terminal event. The buffer is empty afterwards
    /// whatever the outcome.
    async fn run_cycle(&mut self) -> Result<(), SessionError> {
        let started = Instant::now();
        let pcm = self.accumulator.drain();
        tracing::info!(
            session_id = %self.id,
            subject = %self.identity.subject,
            bytes = pcm.len(),
            "processing cycle started"
        );

        let heard = match self.pipeline.transcriber.transcribe(&pcm).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "transcription failed");
                return self
                    .emit_error(ErrorCode::TranscriptionFailed, TRANSCRIPTION_FAILED_MESSAGE)
                    .await;
            }
        };
        self.emit(ServerEvent::Transcription {
            text: heard.clone(),
        })
        .await?;

        let context = self.history.to_vec();
        let reply = match self.pipeline.responder.generate(&heard, &context).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "generation failed");
                return self
                    .emit_error(ErrorCode::GenerationFailed, GENERATION_FAILED_MESSAGE)
                    .await;
            }
        };
        self.history.push_exchange(heard, reply.clone());

        let response = match self.pipeline.synthesizer.synthesize(&reply).await {
            Ok(wav) => ServerEvent::Response {
                text: reply,
                audio: Some(STANDARD.encode(wav)),
                processing_time: Some(round_to_hundredths(started.elapsed())),
            },
            Err(e) => {
                tracing::warn!(
                    session_id = %self.id,
                    error = %e,
                    "synthesis failed, replying with text only"
                );
                ServerEvent::Response {
                    text: reply,
                    audio: None,
                    processing_time: None,
                }
            }
        };

        tracing::info!(
            session_id = %self.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "processing cycle finished"
        );
        self.emit(response).await
    }

    async fn emit_error(&self, code: ErrorCode, message: &str) -> Result<(), SessionError> {
        tracing::debug!(session_id = %self.id, code = code.as_str(), "reporting cycle failure");
        self.emit(ServerEvent::Error {
            code,
            message: message.to_string(),
        })
        .await
    }

    async fn emit(&self, event: ServerEvent) -> Result<(), SessionError> {
        self.outbound
            .send(Outbound::Event(event))
            .await
            .map_err(|_| SessionError::Disconnected)
    }
}

fn round_to_hundredths(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parley_types::{Role, Turn};
    use parley_voice::{Responder, Synthesizer, Transcriber, VoiceError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// One second of 16 kHz 16-bit mono.
    const ONE_SECOND: usize = 32_000;

    #[derive(Default)]
    struct FakeStt {
        fail: bool,
        calls: AtomicUsize,
        seen_bytes: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl Transcriber for FakeStt {
        async fn transcribe(&self, pcm: &[u8]) -> Result<String, VoiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_bytes.lock().unwrap().push(pcm.len());
            if self.fail {
                Err(VoiceError::Stt("engine crashed".to_string()))
            } else {
                Ok("hello there".to_string())
            }
        }
    }

    #[derive(Default)]
    struct FakeLlm {
        fail: bool,
        calls: AtomicUsize,
        contexts: Mutex<Vec<Vec<Turn>>>,
    }

    #[async_trait]
    impl Responder for FakeLlm {
        async fn generate(&self, text: &str, history: &[Turn]) -> Result<String, VoiceError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.contexts.lock().unwrap().push(history.to_vec());
            if self.fail {
                Err(VoiceError::Generation("quota exhausted".to_string()))
            } else {
                Ok(format!("reply {} to {}", n, text))
            }
        }
    }

    #[derive(Default)]
    struct FakeTts {
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Synthesizer for FakeTts {
        async fn synthesize(&self, _text: &str) -> Result<Vec<u8>, VoiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(VoiceError::Tts("voice missing".to_string()))
            } else {
                Ok(b"RIFFfake".to_vec())
            }
        }
    }

    struct Harness {
        session: VoiceSession,
        events: mpsc::Receiver<Outbound>,
        stt: Arc<FakeStt>,
        llm: Arc<FakeLlm>,
        tts: Arc<FakeTts>,
    }

    impl Harness {
        fn new(stt: FakeStt, llm: FakeLlm, tts: FakeTts) -> Self {
            Self::with_settings(stt, llm, tts, SessionSettings::default())
        }

        fn with_settings(stt: FakeStt, llm: FakeLlm, tts: FakeTts, settings: SessionSettings) -> Self {
            let stt = Arc::new(stt);
            let llm = Arc::new(llm);
            let tts = Arc::new(tts);
            let pipeline = Pipeline::new(stt.clone(), llm.clone(), tts.clone());
            let (tx, rx) = mpsc::channel(64);
            let session = VoiceSession::new(
                Uuid::new_v4(),
                Identity::new("ada@example.com"),
                &settings,
                pipeline,
                tx,
            );
            Self {
                session,
                events: rx,
                stt,
                llm,
                tts,
            }
        }

        fn drain_events(&mut self) -> Vec<ServerEvent> {
            let mut out = Vec::new();
            while let Ok(outbound) = self.events.try_recv() {
                match outbound {
                    Outbound::Event(event) => out.push(event),
                    Outbound::Close { .. } => panic!("session never closes on its own"),
                }
            }
            out
        }
    }

    #[tokio::test]
    async fn five_seconds_of_audio_buffers_then_resolves_once() {
        let mut h = Harness::new(FakeStt::default(), FakeLlm::default(), FakeTts::default());
        let chunk = vec![0u8; ONE_SECOND];

        for _ in 0..5 {
            h.session.handle(Inbound::Audio(&chunk)).await.unwrap();
        }

        let events = h.drain_events();
        let buffered: Vec<f64> = events
            .iter()
            .filter_map(|e| match e {
                ServerEvent::Buffering {
                    buffered_seconds,
                    target_seconds,
                } => {
                    assert_eq!(*target_seconds, 5.0);
                    Some(*buffered_seconds)
                }
                _ => None,
            })
            .collect();
        assert_eq!(buffered, vec![1.0, 2.0, 3.0, 4.0]);

        let terminal: Vec<&ServerEvent> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
        match terminal[0] {
            ServerEvent::Response {
                text,
                audio,
                processing_time,
            } => {
                assert_eq!(text, "reply 0 to hello there");
                assert_eq!(audio.as_deref(), Some(STANDARD.encode(b"RIFFfake").as_str()));
                assert!(processing_time.is_some());
            }
            other => panic!("expected response, got {:?}", other),
        }
        assert_eq!(*h.stt.seen_bytes.lock().unwrap(), vec![5 * ONE_SECOND]);
        assert_eq!(h.session.buffered_bytes(), 0);
    }

    #[tokio::test]
    async fn transcription_is_sent_before_the_terminal_event() {
        let mut h = Harness::new(FakeStt::default(), FakeLlm::default(), FakeTts::default());
        h.session.handle(Inbound::Audio(&[1u8; 640])).await.unwrap();
        h.session
            .handle(Inbound::Control(r#"{"type":"end_audio"}"#))
            .await
            .unwrap();

        let events = h.drain_events();
        assert!(matches!(events[0], ServerEvent::Buffering { .. }));
        assert_eq!(
            events[1],
            ServerEvent::Transcription {
                text: "hello there".to_string()
            }
        );
        assert!(matches!(events[2], ServerEvent::Response { .. }));
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn end_audio_with_empty_buffer_is_a_no_op() {
        let mut h = Harness::new(FakeStt::default(), FakeLlm::default(), FakeTts::default());

        h.session
            .handle(Inbound::Control(r#"{"type":"end_audio"}"#))
            .await
            .unwrap();

        assert_eq!(
            h.drain_events(),
            vec![ServerEvent::Info {
                message: "No audio to process".to_string()
            }]
        );
        assert_eq!(h.stt.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transcription_failure_reports_and_keeps_session_usable() {
        let mut h = Harness::new(
            FakeStt {
                fail: true,
                ..FakeStt::default()
            },
            FakeLlm::default(),
            FakeTts::default(),
        );
        let chunk = vec![0u8; 5 * ONE_SECOND];

        h.session.handle(Inbound::Audio(&chunk)).await.unwrap();
        assert_eq!(
            h.drain_events(),
            vec![ServerEvent::Error {
                code: ErrorCode::TranscriptionFailed,
                message: "Failed to transcribe audio".to_string()
            }]
        );
        assert_eq!(h.session.buffered_bytes(), 0);
        assert_eq!(h.llm.calls.load(Ordering::SeqCst), 0);

        // The session keeps accepting audio.
        h.session.handle(Inbound::Audio(&[0u8; 3200])).await.unwrap();
        assert!(matches!(
            h.drain_events().as_slice(),
            [ServerEvent::Buffering { .. }]
        ));
    }

    #[tokio::test]
    async fn generation_failure_skips_synthesis_and_history() {
        let mut h = Harness::new(
            FakeStt::default(),
            FakeLlm {
                fail: true,
                ..FakeLlm::default()
            },
            FakeTts::default(),
        );

        h.session
            .handle(Inbound::Audio(&vec![0u8; 5 * ONE_SECOND]))
            .await
            .unwrap();

        let events = h.drain_events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ServerEvent::Transcription { .. }));
        assert_eq!(
            events[1],
            ServerEvent::Error {
                code: ErrorCode::GenerationFailed,
                message: "Failed to generate a response".to_string()
            }
        );
        assert_eq!(h.tts.calls.load(Ordering::SeqCst), 0);
        assert!(h.session.history().is_empty());
    }

    #[tokio::test]
    async fn synthesis_failure_degrades_to_text() {
        let mut h = Harness::new(
            FakeStt::default(),
            FakeLlm::default(),
            FakeTts {
                fail: true,
                ..FakeTts::default()
            },
        );

        h.session
            .handle(Inbound::Audio(&vec![0u8; 5 * ONE_SECOND]))
            .await
            .unwrap();

        let events = h.drain_events();
        let terminal: Vec<&ServerEvent> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(
            terminal,
            vec![&ServerEvent::Response {
                text: "reply 0 to hello there".to_string(),
                audio: None,
                processing_time: None,
            }]
        );
        assert_eq!(h.session.history().len(), 2);
    }

    #[tokio::test]
    async fn ping_is_answered_without_touching_the_buffer() {
        let mut h = Harness::new(FakeStt::default(), FakeLlm::default(), FakeTts::default());
        h.session.handle(Inbound::Audio(&[0u8; 3200])).await.unwrap();
        h.drain_events();

        h.session
            .handle(Inbound::Control(r#"{"type":"ping"}"#))
            .await
            .unwrap();

        assert_eq!(h.drain_events(), vec![ServerEvent::Pong]);
        assert_eq!(h.session.buffered_bytes(), 3200);
    }

    #[tokio::test]
    async fn malformed_or_unknown_control_frames_are_violations() {
        let mut h = Harness::new(FakeStt::default(), FakeLlm::default(), FakeTts::default());

        for frame in ["not json", r#"{"type":"reset"}"#, r#"{"token":"abc"}"#] {
            let err = h.session.handle(Inbound::Control(frame)).await.unwrap_err();
            assert!(matches!(err, SessionError::MalformedControl(_)));
            assert_eq!(
                err.close_frame(),
                Some((close_code::POLICY, "malformed control frame"))
            );
        }
        assert!(h.drain_events().is_empty());
    }

    #[tokio::test]
    async fn empty_binary_frames_are_ignored() {
        let mut h = Harness::new(FakeStt::default(), FakeLlm::default(), FakeTts::default());
        h.session.handle(Inbound::Audio(&[])).await.unwrap();
        assert!(h.drain_events().is_empty());
    }

    #[tokio::test]
    async fn history_stays_capped_and_keeps_latest_turns() {
        let settings = SessionSettings {
            history_cap: 4,
            ..SessionSettings::default()
        };
        let mut h = Harness::with_settings(
            FakeStt::default(),
            FakeLlm::default(),
            FakeTts::default(),
            settings,
        );
        let chunk = vec![0u8; 5 * ONE_SECOND];

        for _ in 0..5 {
            h.session.handle(Inbound::Audio(&chunk)).await.unwrap();
            assert!(h.session.history().len() <= 4);
        }

        let turns = h.session.history().to_vec();
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(turns[1].content, "reply 3 to hello there");
        assert_eq!(turns[3].content, "reply 4 to hello there");

        // The responder saw the capped history on the last cycle.
        let contexts = h.llm.contexts.lock().unwrap();
        assert_eq!(contexts.last().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn closed_writer_surfaces_as_disconnect() {
        let mut h = Harness::new(FakeStt::default(), FakeLlm::default(), FakeTts::default());
        h.events.close();

        let err = h
            .session
            .handle(Inbound::Control(r#"{"type":"ping"}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Disconnected));
        assert_eq!(err.close_frame(), None);
    }

    #[test]
    fn processing_time_is_rounded_to_two_decimals() {
        assert_eq!(round_to_hundredths(Duration::from_millis(1234)), 1.23);
        assert_eq!(round_to_hundredths(Duration::from_millis(1236)), 1.24);
    }
}
