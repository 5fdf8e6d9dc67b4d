//! Client wire protocol: JSON control frames and the binary audio codec.

pub mod audio;
pub mod frames;

pub use audio::{InboundAudioFrame, StatusFlags, AUDIO_HEADER_LEN};
pub use frames::{AudioEncoding, ClientCommand, LlmStatusKind, ServerFrame, StatusKind};
