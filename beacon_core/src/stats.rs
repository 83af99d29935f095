//! Running counters shared by the reader and processing threads.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::types::LinkState;

/// Point-in-time statistics of a pipeline.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Frames or records decoded, valid or not
    pub frames_total: u64,
    /// Frames with a good checksum, complete records and link events
    pub frames_valid: u64,
    /// Decoded but never delivered to a filter
    pub frames_dropped: u64,
    /// Percentage of decoded frames that were not valid
    pub error_rate: f64,
    /// Bytes and chunks that reached the decoder
    pub bytes_received: u64,
    pub chunks_received: u64,
    /// Chunks lost to a full reader queue
    pub chunks_dropped: u64,
    pub angle_jumps_rejected: u64,
    pub active_targets: usize,
    pub link_state: LinkState,
}

/// Lock-free counters. Every method takes `&self`.
#[derive(Debug, Default)]
pub struct StatsCounters {
    frames_total: AtomicU64,
    frames_valid: AtomicU64,
    frames_dropped: AtomicU64,
    bytes_received: AtomicU64,
    chunks_received: AtomicU64,
    chunks_dropped: AtomicU64,
    angle_jumps_rejected: AtomicU64,
}

impl StatsCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_chunk(&self, bytes: usize) {
        self.chunks_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_chunk_dropped(&self) {
        self.chunks_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame(&self, valid: bool) {
        self.frames_total.fetch_add(1, Ordering::Relaxed);
        if valid {
            self.frames_valid.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_angle_jump(&self) {
        self.angle_jumps_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chunks_dropped(&self) -> u64 {
        self.chunks_dropped.load(Ordering::Relaxed)
    }

    /// Combine the counters with state owned by the pipeline.
    pub fn snapshot(&self, active_targets: usize, link_state: LinkState) -> PipelineStats {
        let frames_total = self.frames_total.load(Ordering::Relaxed);
        let frames_valid = self.frames_valid.load(Ordering::Relaxed);
        PipelineStats {
            frames_total,
            frames_valid,
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            error_rate: error_rate(frames_total, frames_valid),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            angle_jumps_rejected: self.angle_jumps_rejected.load(Ordering::Relaxed),
            active_targets,
            link_state,
        }
    }

    pub fn reset(&self) {
        for c in [
            &self.frames_total,
            &self.frames_valid,
            &self.frames_dropped,
            &self.bytes_received,
            &self.chunks_received,
            &self.chunks_dropped,
            &self.angle_jumps_rejected,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }
}

/// Invalid share of decoded frames, in percent. 0 when nothing was decoded.
pub fn error_rate(total: u64, valid: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    total.saturating_sub(valid) as f64 / total as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn error_rate_is_a_percentage() {
        assert_eq!(error_rate(0, 0), 0.0);
        assert_abs_diff_eq!(error_rate(4, 3), 25.0, epsilon = 1e-12);
        assert_abs_diff_eq!(error_rate(10, 10), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn snapshot_reflects_counters() {
        let c = StatsCounters::new();
        c.record_chunk(33);
        c.record_chunk(10);
        c.record_chunk_dropped();
        c.record_frame(true);
        c.record_frame(false);
        c.record_frame_dropped();
        c.record_angle_jump();

        let s = c.snapshot(2, LinkState::Connected);
        assert_eq!(s.bytes_received, 43);
        assert_eq!(s.chunks_received, 2);
        assert_eq!(s.chunks_dropped, 1);
        assert_eq!(s.frames_total, 2);
        assert_eq!(s.frames_valid, 1);
        assert_eq!(s.frames_dropped, 1);
        assert_eq!(s.angle_jumps_rejected, 1);
        assert_abs_diff_eq!(s.error_rate, 50.0, epsilon = 1e-12);
        assert_eq!(s.active_targets, 2);

        c.reset();
        assert_eq!(c.snapshot(0, LinkState::Unknown), PipelineStats::default());
    }
}
