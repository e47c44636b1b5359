//! Shared types for the Parley voice session protocol.
//!
//! This crate holds the types that cross crate boundaries: the WebSocket
//! handshake and control frames, the outbound session events, the error
//! codes reported to clients, and the conversation turns handed to the
//! text-generation stage.
//!
//! No crate in the workspace depends on anything *except* `parley-types` for
//! cross-cutting type definitions. This keeps the dependency graph clean and
//! prevents circular dependencies.

pub mod conversation;
pub mod protocol;

pub use conversation::{Role, Turn};
pub use protocol::{AuthHandshake, ClientControl, ErrorCode, ServerEvent};

/// Sample rate of inbound session audio (16 kHz).
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Bytes per sample of inbound session audio (16-bit signed PCM).
pub const INPUT_BYTES_PER_SAMPLE: u32 = 2;

/// Default accumulator window in seconds.
pub const DEFAULT_WINDOW_SECONDS: f64 = 5.0;

/// Default maximum number of entries kept in a session's conversation history.
pub const DEFAULT_HISTORY_CAP: usize = 20;
