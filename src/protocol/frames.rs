//! JSON text frames exchanged with the client.
//!
//! Client frames carry a `command` tag, server frames a `type` tag. The codec
//! is stateless: parse, validate, hand off. Binary frames are handled in
//! [`super::audio`].

use serde::{Deserialize, Serialize};

use crate::errors::FrameError;

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

/// Commands a client may send as text frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ClientCommand {
    Start,
    Stop,
    Reset,
    Interrupt,
    ClearQueues,
}

impl ClientCommand {
    /// Parse a client text frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        serde_json::from_str(text).map_err(|e| FrameError::BadCommand(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

/// Session status values carried by `status` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Listening,
    Stopped,
    Idle,
    Error,
}

/// LLM pipeline status values carried by `llm_status` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmStatusKind {
    Processing,
}

/// Audio encoding announced in `tts_start` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    Pcm,
}

/// The complete catalog of server-originated text frames.
///
/// Every frame carries `session_id`; turn-scoped frames also carry `turn_id`.
/// Binary PCM is sent as raw WebSocket binary frames, delimited by
/// `tts_start` / `tts_end` / `tts_stop`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Status {
        session_id: String,
        status: StatusKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    PartialTranscript {
        session_id: String,
        turn_id: u64,
        content: String,
    },
    FinalTranscript {
        session_id: String,
        turn_id: u64,
        content: String,
    },
    LlmStatus {
        session_id: String,
        turn_id: u64,
        status: LlmStatusKind,
    },
    /// Accumulated assistant text; the final frame of a turn has
    /// `is_complete = true` and carries the full response.
    LlmResponse {
        session_id: String,
        turn_id: u64,
        content: String,
        is_complete: bool,
    },
    TtsStart {
        session_id: String,
        turn_id: u64,
        format: AudioEncoding,
    },
    TtsEnd {
        session_id: String,
        turn_id: u64,
    },
    TtsStop {
        session_id: String,
        turn_id: u64,
    },
    InterruptAcknowledged {
        session_id: String,
    },
    StopAcknowledged {
        session_id: String,
        queues_cleared: bool,
    },
    Error {
        session_id: String,
        message: String,
    },
}

impl ServerFrame {
    /// Serialize to the JSON wire representation.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// The session this frame belongs to.
    pub fn session_id(&self) -> &str {
        match self {
            ServerFrame::Status { session_id, .. }
            | ServerFrame::PartialTranscript { session_id, .. }
            | ServerFrame::FinalTranscript { session_id, .. }
            | ServerFrame::LlmStatus { session_id, .. }
            | ServerFrame::LlmResponse { session_id, .. }
            | ServerFrame::TtsStart { session_id, .. }
            | ServerFrame::TtsEnd { session_id, .. }
            | ServerFrame::TtsStop { session_id, .. }
            | ServerFrame::InterruptAcknowledged { session_id }
            | ServerFrame::StopAcknowledged { session_id, .. }
            | ServerFrame::Error { session_id, .. } => session_id,
        }
    }

    /// The turn this frame belongs to, if it is turn-scoped.
    pub fn turn_id(&self) -> Option<u64> {
        match self {
            ServerFrame::PartialTranscript { turn_id, .. }
            | ServerFrame::FinalTranscript { turn_id, .. }
            | ServerFrame::LlmStatus { turn_id, .. }
            | ServerFrame::LlmResponse { turn_id, .. }
            | ServerFrame::TtsStart { turn_id, .. }
            | ServerFrame::TtsEnd { turn_id, .. }
            | ServerFrame::TtsStop { turn_id, .. } => Some(*turn_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_commands() {
        assert_eq!(
            ClientCommand::parse(r#"{"command":"start"}"#).unwrap(),
            ClientCommand::Start
        );
        assert_eq!(
            ClientCommand::parse(r#"{"command":"clear_queues"}"#).unwrap(),
            ClientCommand::ClearQueues
        );
    }

    #[test]
    fn test_parse_unknown_command() {
        let err = ClientCommand::parse(r#"{"command":"dance"}"#).unwrap_err();
        assert!(matches!(err, FrameError::BadCommand(_)));
    }

    #[test]
    fn test_parse_missing_tag() {
        let err = ClientCommand::parse(r#"{"type":"start"}"#).unwrap_err();
        assert!(matches!(err, FrameError::BadCommand(_)));
    }

    #[test]
    fn test_parse_non_json() {
        assert!(ClientCommand::parse("not json").is_err());
    }

    #[test]
    fn test_server_frame_tags() {
        let f = ServerFrame::TtsStart {
            session_id: "s1".into(),
            turn_id: 3,
            format: AudioEncoding::Pcm,
        };
        let json = f.to_json().unwrap();
        assert!(json.contains(r#""type":"tts_start""#));
        assert!(json.contains(r#""format":"pcm""#));
    }

    #[test]
    fn test_status_message_omitted_when_none() {
        let f = ServerFrame::Status {
            session_id: "s1".into(),
            status: StatusKind::Listening,
            message: None,
        };
        let json = f.to_json().unwrap();
        assert!(!json.contains("message"));
        assert!(json.contains(r#""status":"listening""#));
    }

    #[test]
    fn test_round_trip_all_variants() {
        let frames = vec![
            ServerFrame::Status {
                session_id: "s".into(),
                status: StatusKind::Stopped,
                message: Some("bye".into()),
            },
            ServerFrame::PartialTranscript {
                session_id: "s".into(),
                turn_id: 1,
                content: "hel".into(),
            },
            ServerFrame::FinalTranscript {
                session_id: "s".into(),
                turn_id: 1,
                content: "hello".into(),
            },
            ServerFrame::LlmStatus {
                session_id: "s".into(),
                turn_id: 1,
                status: LlmStatusKind::Processing,
            },
            ServerFrame::LlmResponse {
                session_id: "s".into(),
                turn_id: 1,
                content: "Hi there.".into(),
                is_complete: true,
            },
            ServerFrame::TtsStart {
                session_id: "s".into(),
                turn_id: 1,
                format: AudioEncoding::Pcm,
            },
            ServerFrame::TtsEnd {
                session_id: "s".into(),
                turn_id: 1,
            },
            ServerFrame::TtsStop {
                session_id: "s".into(),
                turn_id: 1,
            },
            ServerFrame::InterruptAcknowledged {
                session_id: "s".into(),
            },
            ServerFrame::StopAcknowledged {
                session_id: "s".into(),
                queues_cleared: true,
            },
            ServerFrame::Error {
                session_id: "s".into(),
                message: "oops".into(),
            },
        ];
        for f in frames {
            let json = f.to_json().unwrap();
            let back: ServerFrame = serde_json::from_str(&json).unwrap();
            assert_eq!(back, f);
        }
    }

    #[test]
    fn test_turn_id_accessor() {
        let f = ServerFrame::InterruptAcknowledged {
            session_id: "s".into(),
        };
        assert_eq!(f.turn_id(), None);
        let f = ServerFrame::TtsEnd {
            session_id: "s".into(),
            turn_id: 7,
        };
        assert_eq!(f.turn_id(), Some(7));
        assert_eq!(f.session_id(), "s");
    }
}
