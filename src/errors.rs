//! Domain error types for voxserve.
//!
//! Typed errors at module boundaries replace string-encoded errors and let
//! the orchestrator decide recovery scope by pattern matching: frame-level
//! violations keep the session alive, repeated adapter failures tear it down.

use std::fmt;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Wire-level errors
// ---------------------------------------------------------------------------

/// Violations of the client wire protocol.
///
/// These are always recoverable: the offending frame is reported back to the
/// client as an `error` frame and the session continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("audio frame alignment violation: {0} bytes is shorter than the 8 byte header")]
    HeaderTooShort(usize),

    #[error("audio frame alignment violation: pcm body of {0} bytes is not a whole number of 16-bit samples")]
    BodyMisaligned(usize),

    #[error("audio frame has reserved status bits set: {0:#010x}")]
    ReservedBits(u32),

    #[error("malformed command frame: {0}")]
    BadCommand(String),
}

// ---------------------------------------------------------------------------
// Adapter errors
// ---------------------------------------------------------------------------

/// Which external streaming subsystem produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    Asr,
    Llm,
    Tts,
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterKind::Asr => write!(f, "asr"),
            AdapterKind::Llm => write!(f, "llm"),
            AdapterKind::Tts => write!(f, "tts"),
        }
    }
}

/// Errors surfaced by ASR/LLM/TTS adapters.
///
/// A single occurrence is transient (the current turn is cancelled, the
/// session survives). The orchestrator counts consecutive failures per
/// adapter kind and escalates to session teardown past a threshold.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("{kind} adapter unavailable: {message}")]
    Unavailable { kind: AdapterKind, message: String },

    #[error("{kind} stream failed: {message}")]
    Stream { kind: AdapterKind, message: String },

    #[error("{kind} request cancelled")]
    Cancelled { kind: AdapterKind },
}

impl AdapterError {
    /// The adapter kind this error originated from.
    pub fn kind(&self) -> AdapterKind {
        match self {
            AdapterError::Unavailable { kind, .. }
            | AdapterError::Stream { kind, .. }
            | AdapterError::Cancelled { kind } => *kind,
        }
    }

    /// Shorthand for a stream failure.
    pub fn stream(kind: AdapterKind, message: impl Into<String>) -> Self {
        AdapterError::Stream {
            kind,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Session-fatal errors
// ---------------------------------------------------------------------------

/// Conditions that end the whole session (never the process).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("client channel write failed: {0}")]
    ChannelWrite(String),

    #[error("client cannot keep up with outbound audio")]
    ClientStalled,

    #[error("{kind} adapter failed repeatedly")]
    AdapterFatal { kind: AdapterKind },
}
