// Wire codec tests: JSON frame round-trips, binary audio frame round-trips,
// and malformed-frame classification.

use serde_json::json;

use voxserve::errors::FrameError;
use voxserve::protocol::{
    AudioEncoding, ClientCommand, InboundAudioFrame, LlmStatusKind, ServerFrame, StatusFlags,
    StatusKind,
};

// ─────────────────────────────────────────────────────────────
// Client commands
// ─────────────────────────────────────────────────────────────

#[test]
fn every_client_command_parses() {
    let cases = [
        ("start", ClientCommand::Start),
        ("stop", ClientCommand::Stop),
        ("reset", ClientCommand::Reset),
        ("interrupt", ClientCommand::Interrupt),
        ("clear_queues", ClientCommand::ClearQueues),
    ];
    for (name, expected) in cases {
        let text = json!({ "command": name }).to_string();
        assert_eq!(ClientCommand::parse(&text).unwrap(), expected, "{name}");
    }
}

#[test]
fn unknown_command_is_a_protocol_error() {
    let err = ClientCommand::parse(r#"{"command":"sing"}"#).unwrap_err();
    assert!(matches!(err, FrameError::BadCommand(_)));
}

#[test]
fn extra_fields_are_tolerated() {
    let text = r#"{"command":"start","client":"web","version":3}"#;
    assert_eq!(ClientCommand::parse(text).unwrap(), ClientCommand::Start);
}

// ─────────────────────────────────────────────────────────────
// Server frames
// ─────────────────────────────────────────────────────────────

#[test]
fn server_frames_round_trip() {
    let frames = [
        ServerFrame::Status {
            session_id: "s1".into(),
            status: StatusKind::Listening,
            message: None,
        },
        ServerFrame::PartialTranscript {
            session_id: "s1".into(),
            turn_id: 2,
            content: "hel".into(),
        },
        ServerFrame::FinalTranscript {
            session_id: "s1".into(),
            turn_id: 2,
            content: "hello".into(),
        },
        ServerFrame::LlmStatus {
            session_id: "s1".into(),
            turn_id: 2,
            status: LlmStatusKind::Processing,
        },
        ServerFrame::LlmResponse {
            session_id: "s1".into(),
            turn_id: 2,
            content: "Hi there.".into(),
            is_complete: false,
        },
        ServerFrame::TtsStart {
            session_id: "s1".into(),
            turn_id: 2,
            format: AudioEncoding::Pcm,
        },
        ServerFrame::TtsEnd {
            session_id: "s1".into(),
            turn_id: 2,
        },
        ServerFrame::TtsStop {
            session_id: "s1".into(),
            turn_id: 2,
        },
        ServerFrame::InterruptAcknowledged {
            session_id: "s1".into(),
        },
        ServerFrame::StopAcknowledged {
            session_id: "s1".into(),
            queues_cleared: true,
        },
        ServerFrame::Error {
            session_id: "s1".into(),
            message: "audio frame alignment violation".into(),
        },
    ];
    for frame in frames {
        let json = frame.to_json().unwrap();
        let back: ServerFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame, "{json}");
    }
}

#[test]
fn frame_json_uses_wire_field_names() {
    let frame = ServerFrame::LlmResponse {
        session_id: "s1".into(),
        turn_id: 1,
        content: "Hi".into(),
        is_complete: true,
    };
    let v: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
    assert_eq!(v["type"], "llm_response");
    assert_eq!(v["session_id"], "s1");
    assert_eq!(v["turn_id"], 1);
    assert_eq!(v["is_complete"], true);
}

#[test]
fn stop_acknowledged_carries_queues_cleared() {
    let frame = ServerFrame::StopAcknowledged {
        session_id: "s1".into(),
        queues_cleared: true,
    };
    let v: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
    assert_eq!(v["type"], "stop_acknowledged");
    assert_eq!(v["queues_cleared"], true);
}

// ─────────────────────────────────────────────────────────────
// Binary audio frames
// ─────────────────────────────────────────────────────────────

fn encode(timestamp_ms: u32, flags: u32, samples: &[i16]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&timestamp_ms.to_le_bytes());
    data.extend_from_slice(&flags.to_le_bytes());
    for s in samples {
        data.extend_from_slice(&s.to_le_bytes());
    }
    data
}

#[test]
fn inbound_audio_round_trips() {
    let cases = [
        Vec::new(),
        vec![0i16],
        vec![1, -1, 32_000, -32_000],
        vec![7; 320],
    ];
    for samples in cases {
        let data = encode(42, StatusFlags::FIRST_CHUNK | 0x80, &samples);
        let frame = InboundAudioFrame::decode(&data).unwrap();
        assert_eq!(frame.encode(), data);
        assert_eq!(frame.sample_count(), samples.len());
    }
}

#[test]
fn five_byte_frame_is_an_alignment_error() {
    let err = InboundAudioFrame::decode(&[1, 2, 3, 4, 5]).unwrap_err();
    assert!(err.to_string().contains("alignment"), "{err}");
}

#[test]
fn odd_body_is_an_alignment_error() {
    let mut data = encode(0, 0, &[1, 2]);
    data.push(0xff);
    let err = InboundAudioFrame::decode(&data).unwrap_err();
    assert!(matches!(err, FrameError::BodyMisaligned(5)));
}

#[test]
fn reserved_flag_bits_are_rejected() {
    let data = encode(0, 1 << 20, &[1, 2]);
    assert!(matches!(
        InboundAudioFrame::decode(&data).unwrap_err(),
        FrameError::ReservedBits(_)
    ));
}

#[test]
fn status_flags_decompose() {
    let flags = StatusFlags(StatusFlags::SILENCE_HINT | 0xc8);
    assert_eq!(flags.energy_byte(), 200);
    assert!(flags.silence_hint());
    assert!(!flags.first_chunk());
}
