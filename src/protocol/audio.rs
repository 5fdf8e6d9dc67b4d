//! Binary audio frame codec for the client->server direction.
//!
//! Layout: `[u32 LE timestamp_ms][u32 LE status_flags][i16 LE * N pcm]`,
//! 16 kHz mono. Server->client audio is headerless raw PCM and needs no
//! codec of its own.

use crate::errors::FrameError;

/// Byte length of the inbound frame header.
pub const AUDIO_HEADER_LEN: usize = 8;

// ---------------------------------------------------------------------------
// Status flags
// ---------------------------------------------------------------------------

/// Status flag word of an inbound audio frame.
///
/// Bits 0..7 carry a coarse client-side energy estimate (0-255), bit 8 a
/// silence hint, bit 9 marks the first chunk of a capture stream. Bits 10..31
/// are reserved and must be zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusFlags(pub u32);

impl StatusFlags {
    pub const SILENCE_HINT: u32 = 1 << 8;
    pub const FIRST_CHUNK: u32 = 1 << 9;
    pub const RESERVED_MASK: u32 = !0x3ff;

    /// Coarse energy byte reported by the client (0-255).
    pub fn energy_byte(self) -> u8 {
        (self.0 & 0xff) as u8
    }

    /// Client believes this frame is silence.
    pub fn silence_hint(self) -> bool {
        self.0 & Self::SILENCE_HINT != 0
    }

    /// First frame of a fresh capture stream.
    pub fn first_chunk(self) -> bool {
        self.0 & Self::FIRST_CHUNK != 0
    }

    fn reserved_bits(self) -> u32 {
        self.0 & Self::RESERVED_MASK
    }
}

// ---------------------------------------------------------------------------
// Inbound frame
// ---------------------------------------------------------------------------

/// A decoded client audio frame: header fields plus the raw PCM body
/// (signed 16-bit little-endian, mono).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundAudioFrame {
    pub timestamp_ms: u32,
    pub flags: StatusFlags,
    pub pcm: Vec<u8>,
}

impl InboundAudioFrame {
    /// Decode a binary frame, validating alignment and reserved bits.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < AUDIO_HEADER_LEN {
            return Err(FrameError::HeaderTooShort(data.len()));
        }
        let body = &data[AUDIO_HEADER_LEN..];
        if body.len() % 2 != 0 {
            return Err(FrameError::BodyMisaligned(body.len()));
        }

        let timestamp_ms = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let flags = StatusFlags(u32::from_le_bytes([data[4], data[5], data[6], data[7]]));
        if flags.reserved_bits() != 0 {
            return Err(FrameError::ReservedBits(flags.reserved_bits()));
        }

        Ok(Self {
            timestamp_ms,
            flags,
            pcm: body.to_vec(),
        })
    }

    /// Encode back to the wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(AUDIO_HEADER_LEN + self.pcm.len());
        out.extend_from_slice(&self.timestamp_ms.to_le_bytes());
        out.extend_from_slice(&self.flags.0.to_le_bytes());
        out.extend_from_slice(&self.pcm);
        out
    }

    /// Number of 16-bit samples in the body.
    pub fn sample_count(&self) -> usize {
        self.pcm.len() / 2
    }

    /// Mean absolute sample amplitude normalized to `0.0..=1.0`, computed
    /// over at most `max_samples` samples from the start of the body.
    pub fn mean_energy(&self, max_samples: usize) -> f32 {
        let take = self.sample_count().min(max_samples);
        if take == 0 {
            return 0.0;
        }
        let sum: u64 = self
            .pcm
            .chunks_exact(2)
            .take(take)
            .map(|c| i16::from_le_bytes([c[0], c[1]]).unsigned_abs() as u64)
            .sum();
        (sum as f32 / take as f32) / 32768.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_bytes(flags: u32, samples: &[i16]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&1234u32.to_le_bytes());
        data.extend_from_slice(&flags.to_le_bytes());
        for s in samples {
            data.extend_from_slice(&s.to_le_bytes());
        }
        data
    }

    #[test]
    fn test_decode_valid_frame() {
        let data = frame_bytes(0x2ff, &[100, -100, 0]);
        let frame = InboundAudioFrame::decode(&data).unwrap();
        assert_eq!(frame.timestamp_ms, 1234);
        assert_eq!(frame.flags.energy_byte(), 255);
        assert!(!frame.flags.silence_hint());
        assert!(frame.flags.first_chunk());
        assert_eq!(frame.sample_count(), 3);
    }

    #[test]
    fn test_decode_too_short() {
        let err = InboundAudioFrame::decode(&[0u8; 5]).unwrap_err();
        assert_eq!(err, FrameError::HeaderTooShort(5));
    }

    #[test]
    fn test_decode_header_only_frame() {
        // A zero-sample frame is valid; it just carries no audio.
        let frame = InboundAudioFrame::decode(&[0u8; 8]).unwrap();
        assert_eq!(frame.sample_count(), 0);
        assert_eq!(frame.mean_energy(50), 0.0);
    }

    #[test]
    fn test_decode_misaligned_body() {
        let err = InboundAudioFrame::decode(&[0u8; 11]).unwrap_err();
        assert_eq!(err, FrameError::BodyMisaligned(3));
    }

    #[test]
    fn test_decode_reserved_bits() {
        let data = frame_bytes(1 << 12, &[1, 2]);
        let err = InboundAudioFrame::decode(&data).unwrap_err();
        assert!(matches!(err, FrameError::ReservedBits(_)));
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let frame = InboundAudioFrame {
            timestamp_ms: 99,
            flags: StatusFlags(StatusFlags::SILENCE_HINT | 0x40),
            pcm: vec![1, 0, 2, 0, 3, 0],
        };
        let back = InboundAudioFrame::decode(&frame.encode()).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn test_mean_energy_silence() {
        let data = frame_bytes(0, &[0, 0, 0, 0]);
        let frame = InboundAudioFrame::decode(&data).unwrap();
        assert_eq!(frame.mean_energy(50), 0.0);
    }

    #[test]
    fn test_mean_energy_loud() {
        let data = frame_bytes(0, &[16384; 20]);
        let frame = InboundAudioFrame::decode(&data).unwrap();
        let e = frame.mean_energy(50);
        assert!((e - 0.5).abs() < 0.01, "energy {e}");
    }

    #[test]
    fn test_mean_energy_bounded_probe() {
        // Loud prefix, silent tail: probe only looks at the prefix.
        let mut samples = vec![16384i16; 10];
        samples.extend_from_slice(&[0; 90]);
        let data = frame_bytes(0, &samples);
        let frame = InboundAudioFrame::decode(&data).unwrap();
        assert!(frame.mean_energy(10) > 0.4);
        assert!(frame.mean_energy(100) < 0.1);
    }
}
