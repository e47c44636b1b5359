use crate::config::TtsConfig;
use crate::error::VoiceError;
use crate::pipeline::Synthesizer;
use crate::wav::pcm16_to_wav;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Replies longer than this many characters are truncated before synthesis.
const MAX_TTS_INPUT_CHARS: usize = 1000;

/// Timeout for TTS process execution.
const TTS_TIMEOUT: Duration = Duration::from_secs(60);

/// Service for generating speech from text with Piper.
#[derive(Debug, Clone)]
pub struct TtsService {
    model_path: PathBuf,
    config_path: Option<PathBuf>,
    piper_binary: PathBuf,
    sample_rate: u32,
}

impl TtsService {
    /// Creates a `TtsService` for a Piper voice model producing `sample_rate` Hz audio.
    pub fn new(
        model_path: impl AsRef<Path>,
        piper_binary: impl AsRef<Path>,
        sample_rate: u32,
    ) -> Self {
        Self {
            model_path: model_path.as_ref().to_path_buf(),
            config_path: None,
            piper_binary: piper_binary.as_ref().to_path_buf(),
            sample_rate,
        }
    }

    pub fn from_config(config: &TtsConfig) -> Self {
        let mut service = Self::new(&config.model_path, &config.binary_path, config.sample_rate);
        service.config_path = config.config_path.as_ref().map(PathBuf::from);
        service
    }

    /// Synthesizes speech and returns a mono 16-bit WAV file.
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoiceError> {
        let text = prepare_text(text)?;

        if !self.model_path.exists() {
            return Err(VoiceError::Tts(format!(
                "Model file not found: {:?}",
                self.model_path
            )));
        }

        let mut command = Command::new(&self.piper_binary);
        command
            .arg("--model")
            .arg(&self.model_path)
            .arg("--output_raw")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(config) = &self.config_path {
            command.arg("--config").arg(config);
        }

        let mut child = command
            .spawn()
            .map_err(|e| VoiceError::Tts(format!("Failed to spawn piper: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VoiceError::Tts("Failed to open stdin".to_string()))?;

        // Spawn a task to write to stdin to avoid deadlock if output buffer fills up
        let write_task = tokio::spawn(async move {
            stdin.write_all(text.as_bytes()).await?;
            stdin.shutdown().await
        });

        let output = tokio::time::timeout(TTS_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| {
                VoiceError::Tts(format!(
                    "TTS process timed out after {} seconds",
                    TTS_TIMEOUT.as_secs()
                ))
            })?
            .map_err(|e| VoiceError::Tts(format!("Failed to wait for piper: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Tts(format!("Piper failed: {}", stderr)));
        }

        match write_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(VoiceError::Tts(format!(
                    "Failed to write to piper stdin: {}",
                    e
                )))
            }
            Err(e) => return Err(VoiceError::Tts(format!("Stdin task failed: {}", e))),
        }

        if output.stdout.is_empty() {
            return Err(VoiceError::Tts("Piper produced no audio".to_string()));
        }

        let wav = pcm16_to_wav(&output.stdout, self.sample_rate)
            .map_err(|e| VoiceError::Tts(format!("Failed to frame audio as WAV: {}", e)))?;
        tracing::debug!(bytes = wav.len(), "synthesis complete");
        Ok(wav)
    }
}

/// Trims the reply and caps it at [`MAX_TTS_INPUT_CHARS`] characters.
fn prepare_text(text: &str) -> Result<String, VoiceError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(VoiceError::Tts("text is empty".to_string()));
    }

    if text.chars().count() > MAX_TTS_INPUT_CHARS {
        tracing::warn!(limit = MAX_TTS_INPUT_CHARS, "reply truncated for synthesis");
        return Ok(text.chars().take(MAX_TTS_INPUT_CHARS).collect());
    }
    Ok(text.to_string())
}

#[async_trait]
impl Synthesizer for TtsService {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoiceError> {
        TtsService::synthesize(self, text).await
    }
}
