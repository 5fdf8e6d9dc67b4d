//! Barge-in gate: detects user speech during assistant playback.
//!
//! Evaluates inbound audio frames while a turn is being generated or spoken.
//! Fires once sustained energy above the threshold is seen, which the demux
//! converts into an internal interrupt event. Energy is computed from the
//! PCM body over a bounded sample prefix; the client's silence-hint bit
//! vetoes a frame outright.

use crate::config::schema::BargeInConfig;
use crate::protocol::InboundAudioFrame;

/// Dwell-counting energy gate.
#[derive(Debug)]
pub struct BargeInGate {
    energy_threshold: f32,
    min_voice_frames: u32,
    max_probe_samples: usize,
    consecutive: u32,
}

impl BargeInGate {
    pub fn new(config: &BargeInConfig) -> Self {
        Self {
            energy_threshold: config.energy_threshold,
            min_voice_frames: config.min_voice_frames.max(1),
            max_probe_samples: config.max_probe_samples.max(1),
            consecutive: 0,
        }
    }

    /// Feed one inbound frame; returns `true` when barge-in fires.
    ///
    /// The dwell counter resets on the first-chunk flag (a fresh capture
    /// stream), on a silence hint, and on any frame below the threshold.
    pub fn observe(&mut self, frame: &InboundAudioFrame) -> bool {
        if frame.flags.first_chunk() {
            self.consecutive = 0;
        }
        if frame.flags.silence_hint() {
            self.consecutive = 0;
            return false;
        }

        let energy = frame.mean_energy(self.max_probe_samples);
        if energy > self.energy_threshold {
            self.consecutive += 1;
        } else {
            self.consecutive = 0;
        }

        if self.consecutive >= self.min_voice_frames {
            self.consecutive = 0;
            return true;
        }
        false
    }

    /// Reset the dwell counter (after an interrupt fired elsewhere).
    pub fn reset(&mut self) {
        self.consecutive = 0;
    }
}
