//! Duration-windowed buffer for streamed PCM.

use parley_types::{DEFAULT_WINDOW_SECONDS, INPUT_BYTES_PER_SAMPLE, INPUT_SAMPLE_RATE};

/// Accumulates raw PCM chunks until a target duration is buffered.
///
/// Duration is always computed from the byte total and the input byte rate,
/// never tracked separately, so variable chunk sizes cannot make it drift.
/// The owning session is the only writer.
#[derive(Debug, Clone)]
pub struct AudioAccumulator {
    chunks: Vec<Vec<u8>>,
    total_bytes: usize,
    window_seconds: f64,
    bytes_per_second: u32,
    target_bytes: usize,
}

impl AudioAccumulator {
    /// Creates an accumulator for 16-bit mono PCM at `sample_rate`.
    pub fn new(window_seconds: f64, sample_rate: u32) -> Self {
        Self::with_format(window_seconds, sample_rate, INPUT_BYTES_PER_SAMPLE)
    }

    pub fn with_format(window_seconds: f64, sample_rate: u32, bytes_per_sample: u32) -> Self {
        let bytes_per_second = sample_rate.saturating_mul(bytes_per_sample);
        let target_bytes = (window_seconds * f64::from(bytes_per_second)).ceil().max(0.0) as usize;
        Self {
            chunks: Vec::new(),
            total_bytes: 0,
            window_seconds,
            bytes_per_second,
            target_bytes,
        }
    }

    /// Appends a chunk and reports whether the window is now full.
    pub fn add_chunk(&mut self, chunk: impl Into<Vec<u8>>) -> bool {
        let chunk = chunk.into();
        if !chunk.is_empty() {
            self.total_bytes += chunk.len();
            self.chunks.push(chunk);
        }
        self.is_ready()
    }

    pub fn is_ready(&self) -> bool {
        self.total_bytes > 0 && self.total_bytes >= self.target_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.total_bytes == 0
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn buffered_seconds(&self) -> f64 {
        if self.bytes_per_second == 0 {
            return 0.0;
        }
        self.total_bytes as f64 / f64::from(self.bytes_per_second)
    }

    pub fn target_seconds(&self) -> f64 {
        self.window_seconds
    }

    /// Returns every buffered byte in arrival order and resets the buffer.
    pub fn drain(&mut self) -> Vec<u8> {
        let mut audio = Vec::with_capacity(self.total_bytes);
        for chunk in self.chunks.drain(..) {
            audio.extend_from_slice(&chunk);
        }
        self.total_bytes = 0;
        audio
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.total_bytes = 0;
    }
}

impl Default for AudioAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SECONDS, INPUT_SAMPLE_RATE)
    }
}
