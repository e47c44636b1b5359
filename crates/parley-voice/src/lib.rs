//! Voice pipeline for Parley sessions.
//!
//! Buffers streamed PCM until a duration window is reached, then drives
//! three independently fallible stages in a fixed order: speech-to-text,
//! text generation, and text-to-speech. The stages are trait objects so the
//! session orchestrator can be handed real services in production and
//! scripted fakes in tests.
//!
//! The concrete collaborators shell out to local engines (whisper.cpp for
//! STT, Piper for TTS) and call the Anthropic Messages API for generation.

pub mod accumulator;
pub mod config;
pub mod error;
pub mod generation;
pub mod history;
pub mod pipeline;
pub mod stt;
pub mod tts;
pub mod wav;

pub use accumulator::AudioAccumulator;
pub use config::{GenerationConfig, SttConfig, TtsConfig};
pub use error::VoiceError;
pub use generation::ClaudeResponder;
pub use history::ConversationHistory;
pub use pipeline::{Pipeline, Responder, Synthesizer, Transcriber};
pub use stt::SttService;
pub use tts::TtsService;
