//! Mailbox events for the session state machine.
//!
//! Every mutation of session state flows through these: the inbound demux,
//! the ASR pump, the outbound scheduler, and the per-turn task all post here
//! instead of touching state directly.

use crate::errors::{AdapterError, FrameError};
use crate::protocol::ClientCommand;

/// Which per-turn deadline expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnDeadline {
    LlmFirstToken,
    TtsFirstChunk,
    Turn,
}

impl TurnDeadline {
    /// Human-readable message for the `error` frame.
    pub fn describe(self, ms: u64) -> String {
        match self {
            TurnDeadline::LlmFirstToken => format!("llm timeout: no token within {ms} ms"),
            TurnDeadline::TtsFirstChunk => format!("tts timeout: no audio within {ms} ms"),
            TurnDeadline::Turn => format!("turn timeout: exceeded {ms} ms"),
        }
    }
}

/// Events delivered to the state machine driver.
///
/// Turn-scoped variants carry the turn id and epoch they were produced
/// under; the driver drops any event whose epoch is stale.
#[derive(Debug)]
pub enum SessionEvent {
    /// Parsed client text command.
    Command(ClientCommand),
    /// Malformed client frame (text or binary), reported and survived.
    ProtocolError(FrameError),

    /// Interim recognition hypothesis.
    AsrPartial(String),
    /// Confirmed utterance; terminal event of a recognition.
    AsrFinal(String),
    /// The recognition stream failed.
    AsrFailed(AdapterError),

    /// One token fragment arrived from the generator.
    LlmToken {
        turn_id: u64,
        epoch: u64,
        delta: String,
    },
    /// The token stream ended naturally; `text` is the full response.
    LlmFinished {
        turn_id: u64,
        epoch: u64,
        text: String,
    },
    /// The generation failed mid-turn.
    LlmFailed {
        turn_id: u64,
        epoch: u64,
        error: AdapterError,
    },

    /// First PCM chunk of the turn was enqueued (after `tts_start`).
    SpeakingStarted { turn_id: u64, epoch: u64 },
    /// All segments of the turn were processed.
    SpeakingFinished {
        turn_id: u64,
        epoch: u64,
        segments_spoken: u32,
        segments_failed: u32,
    },

    /// The barge-in gate detected user speech during playback.
    BargeIn,
    /// A per-turn deadline expired.
    DeadlineExceeded {
        turn_id: u64,
        epoch: u64,
        deadline: TurnDeadline,
    },

    /// The client socket closed or failed; tear the session down.
    ClientGone,
    /// An outbound PCM send stalled past the configured bound.
    OutboundStalled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_messages() {
        assert!(TurnDeadline::LlmFirstToken
            .describe(5000)
            .contains("llm timeout"));
        assert!(TurnDeadline::TtsFirstChunk
            .describe(3000)
            .contains("tts timeout"));
        assert!(TurnDeadline::Turn.describe(60_000).contains("60000"));
    }
}
