use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("STT error: {0}")]
    Stt(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
