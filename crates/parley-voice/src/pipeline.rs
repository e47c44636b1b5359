//! Contracts for the three remote stages of a processing cycle.
//!
//! Each stage is invoked at most once per cycle and never retried by the
//! caller. Timeouts, if any, belong to the implementation.

use crate::error::VoiceError;
use async_trait::async_trait;
use parley_types::Turn;
use std::fmt;
use std::sync::Arc;

/// Speech-to-text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribes 16 kHz mono s16le PCM.
    async fn transcribe(&self, pcm: &[u8]) -> Result<String, VoiceError>;
}

/// Text generation.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Produces a reply to `text` given prior turns, oldest first.
    async fn generate(&self, text: &str, history: &[Turn]) -> Result<String, VoiceError>;
}

/// Text-to-speech.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Returns an encoded audio file (WAV) for `text`.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoiceError>;
}

/// The stage set handed to each session when it starts.
///
/// Services are built once at startup; cloning only bumps reference counts.
#[derive(Clone)]
pub struct Pipeline {
    pub transcriber: Arc<dyn Transcriber>,
    pub responder: Arc<dyn Responder>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

impl Pipeline {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        responder: Arc<dyn Responder>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        Self {
            transcriber,
            responder,
            synthesizer,
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline").finish_non_exhaustive()
    }
}
