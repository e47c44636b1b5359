use crate::config::SttConfig;
use crate::error::VoiceError;
use crate::pipeline::Transcriber;
use crate::wav::pcm16_to_wav;
use async_trait::async_trait;
use parley_types::INPUT_SAMPLE_RATE;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Maximum audio input size for STT (10 MiB). Prevents OOM from oversized payloads.
const MAX_STT_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// Timeout for STT process execution.
const STT_TIMEOUT: Duration = Duration::from_secs(120);

/// Transcribes session audio with the whisper.cpp CLI.
#[derive(Debug, Clone)]
pub struct SttService {
    model_path: PathBuf,
    binary_path: PathBuf,
}

impl SttService {
    pub fn new(model_path: impl Into<PathBuf>, binary_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            binary_path: binary_path.into(),
        }
    }

    pub fn from_config(config: &SttConfig) -> Self {
        Self::new(&config.model_path, &config.binary_path)
    }

    pub async fn transcribe(&self, pcm: &[u8]) -> Result<String, VoiceError> {
        if pcm.is_empty() {
            return Err(VoiceError::Stt("audio data is empty".to_string()));
        }
        if pcm.len() > MAX_STT_INPUT_BYTES {
            return Err(VoiceError::Stt(format!(
                "audio data exceeds maximum size: {} bytes (limit: {} bytes)",
                pcm.len(),
                MAX_STT_INPUT_BYTES
            )));
        }

        let wav = pcm16_to_wav(pcm, INPUT_SAMPLE_RATE)
            .map_err(|e| VoiceError::Stt(format!("Failed to frame audio as WAV: {}", e)))?;

        // -f - reads the WAV from stdin; -nt drops timestamps, -np drops progress output.
        let mut command = Command::new(&self.binary_path);
        command
            .arg("-m")
            .arg(&self.model_path)
            .arg("-f")
            .arg("-")
            .arg("-nt")
            .arg("-np")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| VoiceError::Stt(format!("Failed to spawn STT binary: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VoiceError::Stt("Failed to open stdin".to_string()))?;

        // Write from a separate task so a full stdout pipe cannot deadlock us.
        let write_task = tokio::spawn(async move {
            stdin.write_all(&wav).await?;
            stdin.shutdown().await
        });

        let output = tokio::time::timeout(STT_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| {
                VoiceError::Stt(format!(
                    "STT process timed out after {} seconds",
                    STT_TIMEOUT.as_secs()
                ))
            })?
            .map_err(|e| VoiceError::Stt(format!("Failed to read stdout: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Stt(format!("STT binary failed: {}", stderr)));
        }

        match write_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(VoiceError::Stt(format!("Failed to write to stdin: {}", e))),
            Err(e) => return Err(VoiceError::Stt(format!("Stdin task failed: {}", e))),
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        tracing::debug!(chars = text.len(), "transcription complete");
        Ok(text)
    }
}

#[async_trait]
impl Transcriber for SttService {
    async fn transcribe(&self, pcm: &[u8]) -> Result<String, VoiceError> {
        SttService::transcribe(self, pcm).await
    }
}
