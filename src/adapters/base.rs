//! Base adapter interfaces.
//!
//! The orchestrator consumes exactly three capability sets: a push-stream
//! speech recognizer, a cancellable token generator, and a cancellable
//! synthesizer. Implementations own their transport; the core only sees
//! channels.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::AdapterError;

// ---------------------------------------------------------------------------
// Conversation types
// ---------------------------------------------------------------------------

/// Speaker role in the conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message of the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// ASR
// ---------------------------------------------------------------------------

/// Audio stream parameters handed to the recognizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
}

impl AudioSpec {
    /// The contract for inbound client audio: 16 kHz, 16-bit, mono.
    pub const fn inbound() -> Self {
        Self {
            sample_rate: 16_000,
            bits_per_sample: 16,
            channels: 1,
        }
    }
}

/// Recognition events emitted by an open ASR stream.
///
/// For each utterance, zero or more `Partial` hypotheses are followed by one
/// `Final`. The stream restarts across utterances on the same handle.
#[derive(Debug, Clone)]
pub enum AsrEvent {
    Partial(String),
    Final(String),
    Error(AdapterError),
}

/// Handle to an open recognition stream.
///
/// PCM bodies (headers already stripped) go into `audio_tx`; recognition
/// events come out of `events`. Dropping `audio_tx` closes the stream and
/// releases adapter resources.
pub struct AsrHandle {
    pub audio_tx: mpsc::Sender<Vec<u8>>,
    pub events: mpsc::Receiver<AsrEvent>,
}

/// Push-stream speech recognizer.
#[async_trait]
pub trait AsrAdapter: Send + Sync {
    /// Open a recognition stream for one session.
    async fn open(
        &self,
        session_id: &str,
        language: &str,
        spec: AudioSpec,
    ) -> Result<AsrHandle, AdapterError>;
}

// ---------------------------------------------------------------------------
// LLM
// ---------------------------------------------------------------------------

/// A chunk of a streaming generation.
#[derive(Debug, Clone)]
pub enum LlmChunk {
    Token(String),
    Done,
    Error(AdapterError),
}

/// Handle to one streaming generation.
pub struct LlmStream {
    pub rx: mpsc::Receiver<LlmChunk>,
}

/// Cancellable streaming text generator.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Start a generation for the finalized user text.
    ///
    /// `history` holds prior turns only (the current user text is the
    /// prompt). The adapter must stop emitting within a bounded grace window
    /// once `cancel` fires; the core treats cancelled generations as
    /// abandoned.
    async fn generate(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
        user_text: &str,
        cancel: CancellationToken,
    ) -> Result<LlmStream, AdapterError>;
}

// ---------------------------------------------------------------------------
// TTS
// ---------------------------------------------------------------------------

/// A chunk of a streaming synthesis.
#[derive(Debug, Clone)]
pub enum TtsChunk {
    /// Raw PCM, s16le mono at [`TtsAdapter::output_sample_rate`].
    Pcm(Vec<u8>),
    Done,
    Error(AdapterError),
}

/// Handle to one streaming synthesis.
pub struct TtsStream {
    pub rx: mpsc::Receiver<TtsChunk>,
}

/// Cancellable streaming speech synthesizer.
#[async_trait]
pub trait TtsAdapter: Send + Sync {
    /// Synthesize one speakable segment.
    async fn synthesize(
        &self,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<TtsStream, AdapterError>;

    /// Output sample rate of the PCM chunks (nominally 24 kHz).
    fn output_sample_rate(&self) -> u32 {
        24_000
    }
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// The three adapters a session is wired to.
#[derive(Clone)]
pub struct AdapterSet {
    pub asr: Arc<dyn AsrAdapter>,
    pub llm: Arc<dyn LlmAdapter>,
    pub tts: Arc<dyn TtsAdapter>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_constructors() {
        let m = ChatMessage::user("hi");
        assert_eq!(m.role, Role::User);
        let m = ChatMessage::assistant("hello");
        assert_eq!(m.role, Role::Assistant);
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), r#""user""#);
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            r#""assistant""#
        );
    }

    #[test]
    fn test_inbound_audio_spec() {
        let spec = AudioSpec::inbound();
        assert_eq!(spec.sample_rate, 16_000);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.channels, 1);
    }
}
