//! WebSocket frame types for a voice session.
//!
//! Inbound binary frames carry raw PCM and have no type here. Inbound text
//! frames are either the opening [`AuthHandshake`] or a [`ClientControl`]
//! message; everything the server sends is a [`ServerEvent`].

use serde::{Deserialize, Serialize};

/// The first message a client sends after the connection is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthHandshake {
    /// Access credential issued by `/auth/google` or `/auth/refresh`.
    pub token: String,
}

/// Structured control frames accepted once a session is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientControl {
    /// Process whatever audio is buffered, even short of the window.
    EndAudio,
    /// Liveness probe, answered with [`ServerEvent::Pong`].
    Ping,
}

/// Error codes carried by [`ServerEvent::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    TranscriptionFailed,
    GenerationFailed,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TranscriptionFailed => "transcription_failed",
            Self::GenerationFailed => "generation_failed",
        }
    }
}

/// Events sent from the server to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Audio was buffered but the window has not been reached yet.
    Buffering {
        buffered_seconds: f64,
        target_seconds: f64,
    },
    /// What the transcription stage heard. Sent before generation runs.
    Transcription { text: String },
    /// Terminal success. `audio` is base64 WAV, or `null` when synthesis
    /// failed and the reply degrades to text only.
    Response {
        text: String,
        audio: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        processing_time: Option<f64>,
    },
    /// Terminal failure of a processing cycle.
    Error { code: ErrorCode, message: String },
    Pong,
    Info { message: String },
}

impl ServerEvent {
    /// Returns `true` for the events that close out a processing cycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Response { .. } | Self::Error { .. })
    }
}
