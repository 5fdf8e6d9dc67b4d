//! Configuration schema for voxserve.
//!
//! All structs use `#[serde(rename_all = "camelCase")]` so that the JSON
//! config file can use camelCase keys while Rust code uses snake_case fields.
//! Every field has a default: an absent or empty config file yields a working
//! server.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub barge_in: BargeInConfig,
    pub timeouts: TimeoutConfig,
    pub llm: LlmConfig,
    pub segmenter: SegmenterConfig,
    pub queues: QueueConfig,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

// ---------------------------------------------------------------------------
// Audio
// ---------------------------------------------------------------------------

/// Audio stream parameters on both directions of the socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioConfig {
    /// Client microphone audio: fixed by the wire contract.
    pub inbound_sample_rate: u32,
    /// Synthesized audio sent back to the client.
    pub outbound_sample_rate: u32,
    /// Recognition language passed to the ASR adapter.
    pub language: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            inbound_sample_rate: 16_000,
            outbound_sample_rate: 24_000,
            language: "en-US".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Barge-in
// ---------------------------------------------------------------------------

/// Voice-activity gate that arbitrates barge-in during playback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BargeInConfig {
    /// Normalized mean-amplitude threshold (0.0-1.0).
    pub energy_threshold: f32,
    /// Consecutive above-threshold frames required to fire.
    pub min_voice_frames: u32,
    /// Samples probed per frame when computing energy.
    pub max_probe_samples: usize,
}

impl Default for BargeInConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.05,
            min_voice_frames: 2,
            max_probe_samples: 50,
        }
    }
}

// ---------------------------------------------------------------------------
// Timeouts
// ---------------------------------------------------------------------------

/// Deadlines and liveness bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeoutConfig {
    /// Deadline for the first LLM token of a turn.
    pub llm_first_token_ms: u64,
    /// Deadline for the first PCM chunk of a TTS segment.
    pub tts_first_chunk_ms: u64,
    /// Overall per-turn deadline.
    pub turn_deadline_ms: u64,
    /// Sessions with no inbound frames for this long are torn down.
    pub idle_session_secs: u64,
    /// How long an outbound PCM send may block before the client is
    /// considered too slow and the session is torn down.
    pub pcm_send_stall_ms: u64,
    /// Idle-session sweep period.
    pub reaper_interval_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            llm_first_token_ms: 5_000,
            tts_first_chunk_ms: 3_000,
            turn_deadline_ms: 60_000,
            idle_session_secs: 600,
            pcm_send_stall_ms: 200,
            reaper_interval_secs: 60,
        }
    }
}

impl TimeoutConfig {
    pub fn llm_first_token(&self) -> Duration {
        Duration::from_millis(self.llm_first_token_ms)
    }

    pub fn tts_first_chunk(&self) -> Duration {
        Duration::from_millis(self.tts_first_chunk_ms)
    }

    pub fn turn_deadline(&self) -> Duration {
        Duration::from_millis(self.turn_deadline_ms)
    }

    pub fn idle_session(&self) -> Duration {
        Duration::from_secs(self.idle_session_secs)
    }

    pub fn pcm_send_stall(&self) -> Duration {
        Duration::from_millis(self.pcm_send_stall_ms)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }
}

// ---------------------------------------------------------------------------
// LLM
// ---------------------------------------------------------------------------

/// Generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmConfig {
    pub system_prompt: String,
    /// History window sent with each generation (messages, not turns).
    pub max_history_messages: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a voice assistant. Keep replies short, natural, and speakable."
                .to_string(),
            max_history_messages: 20,
        }
    }
}

// ---------------------------------------------------------------------------
// Segmenter
// ---------------------------------------------------------------------------

/// Sentence segmentation bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SegmenterConfig {
    /// Hard flush bound when no sentence boundary appears.
    pub max_segment_chars: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            max_segment_chars: 180,
        }
    }
}

// ---------------------------------------------------------------------------
// Queues
// ---------------------------------------------------------------------------

/// Bounded queue capacities between session tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueConfig {
    /// State machine mailbox.
    pub mailbox: usize,
    /// Speakable segments awaiting synthesis.
    pub segments: usize,
    /// Frames and PCM chunks awaiting the socket writer.
    pub outbound: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            mailbox: 64,
            segments: 16,
            outbound: 128,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_complete() {
        let cfg = Config::default();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.audio.inbound_sample_rate, 16_000);
        assert_eq!(cfg.audio.outbound_sample_rate, 24_000);
        assert_eq!(cfg.barge_in.min_voice_frames, 2);
        assert_eq!(cfg.timeouts.llm_first_token(), Duration::from_secs(5));
        assert_eq!(cfg.segmenter.max_segment_chars, 180);
        assert!(cfg.queues.outbound > 0);
    }

    #[test]
    fn test_empty_json_parses_to_defaults() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.timeouts.idle_session_secs, 600);
    }

    #[test]
    fn test_camel_case_keys() {
        let json = r#"{
            "server": {"host": "0.0.0.0", "port": 9000},
            "bargeIn": {"energyThreshold": 0.1},
            "timeouts": {"llmFirstTokenMs": 1000}
        }"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert!((cfg.barge_in.energy_threshold - 0.1).abs() < f32::EPSILON);
        assert_eq!(cfg.timeouts.llm_first_token_ms, 1000);
        // Untouched sections keep their defaults.
        assert_eq!(cfg.timeouts.turn_deadline_ms, 60_000);
    }

    #[test]
    fn test_round_trip() {
        let cfg = Config::default();
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("pcmSendStallMs"));
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.server.port, cfg.server.port);
    }
}
