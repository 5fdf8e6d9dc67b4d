//! voxserve — a real-time, full-duplex speech-to-speech conversation server.
//!
//! One WebSocket per client: inbound microphone audio is recognized
//! continuously, finalized utterances drive a streaming LLM, and the
//! response is synthesized and streamed back on the same socket, with
//! natural barge-in throughout.

pub mod adapters;
pub mod config;
pub mod errors;
pub mod protocol;
pub mod server;
pub mod session;
