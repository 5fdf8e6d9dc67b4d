//! Streaming adapter interfaces for the three external subsystems
//! (speech recognition, language model, speech synthesis) and the
//! deterministic scripted implementations used by tests and demo mode.

pub mod base;
pub mod scripted;

pub use base::{
    AdapterSet, AsrAdapter, AsrEvent, AsrHandle, AudioSpec, ChatMessage, LlmAdapter, LlmChunk,
    LlmStream, Role, TtsAdapter, TtsChunk, TtsStream,
};
