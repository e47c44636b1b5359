use serde::{Deserialize, Serialize};
use std::fmt;

/// Anthropic Messages API endpoint.
pub const DEFAULT_GENERATION_API_URL: &str = "https://api.anthropic.com/v1/messages";

fn default_stt_binary() -> String {
    "whisper-cli".to_string()
}

fn default_stt_model() -> String {
    "models/ggml-base.en.bin".to_string()
}

fn default_tts_binary() -> String {
    "piper".to_string()
}

fn default_tts_model() -> String {
    "voices/en_US-lessac-medium.onnx".to_string()
}

fn default_tts_sample_rate() -> u32 {
    22_050
}

fn default_api_url() -> String {
    DEFAULT_GENERATION_API_URL.to_string()
}

fn default_model() -> String {
    "claude-opus-4-5".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

/// whisper.cpp CLI settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    #[serde(default = "default_stt_binary")]
    pub binary_path: String,
    #[serde(default = "default_stt_model")]
    pub model_path: String,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            binary_path: default_stt_binary(),
            model_path: default_stt_model(),
        }
    }
}

/// Piper CLI settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "default_tts_binary")]
    pub binary_path: String,
    #[serde(default = "default_tts_model")]
    pub model_path: String,
    /// Model config; Piper infers `<model>.json` when unset.
    #[serde(default)]
    pub config_path: Option<String>,
    /// Output sample rate of the voice model.
    #[serde(default = "default_tts_sample_rate")]
    pub sample_rate: u32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            binary_path: default_tts_binary(),
            model_path: default_tts_model(),
            config_path: None,
            sample_rate: default_tts_sample_rate(),
        }
    }
}

/// Text generation API settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: String::new(),
            model: default_model(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}
