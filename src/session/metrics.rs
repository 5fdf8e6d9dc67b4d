//! Per-session intake and delivery counters.
//!
//! Reported via `tracing` periodically while audio flows and once at
//! teardown. Counters are atomics so the demux, scheduler, and driver can
//! all bump them without coordination.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one session's lifetime.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    pub frames_in: AtomicU64,
    pub bytes_in: AtomicU64,
    pub malformed_frames: AtomicU64,
    pub stale_dropped: AtomicU64,
    pub pcm_chunks_out: AtomicU64,
    pub pcm_bytes_out: AtomicU64,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_inbound(&self, bytes: usize) {
        self.frames_in.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_drop(&self) {
        self.stale_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pcm_out(&self, bytes: usize) {
        self.pcm_chunks_out.fetch_add(1, Ordering::Relaxed);
        self.pcm_bytes_out.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Log a summary line for this session.
    pub fn log_summary(&self, session_id: &str) {
        tracing::info!(
            session_id,
            frames_in = self.frames_in.load(Ordering::Relaxed),
            bytes_in = self.bytes_in.load(Ordering::Relaxed),
            malformed = self.malformed_frames.load(Ordering::Relaxed),
            stale_dropped = self.stale_dropped.load(Ordering::Relaxed),
            pcm_chunks_out = self.pcm_chunks_out.load(Ordering::Relaxed),
            pcm_bytes_out = self.pcm_bytes_out.load(Ordering::Relaxed),
            "session audio summary"
        );
    }
}
