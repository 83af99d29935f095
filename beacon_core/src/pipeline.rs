//! Pipeline orchestrator: raw bytes in, published results out.
//!
//! # Processing steps per chunk
//! 1. Count the chunk and decode it with the configured wire format
//! 2. Discard checksum-gated frames, abandoned records and unusable readings
//! 3. Feed each usable [`Measurement`] to its tag's filter, in arrival order
//! 4. Publish the filtered result (projected when a pose is known)
//! 5. Every `cleanup_interval_sec`, evict tags that went silent

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uwb_protocol::{DecodedEvent, DecoderConfig, RawChunk, StreamDecoder};

use crate::filter_bank::{FilterBank, FilterBankConfig};
use crate::history::{Snapshot, HISTORY_LEN};
use crate::polar_kf::FilterSnapshot;
use crate::publish::{PipelineHandle, SnapshotStore};
use crate::stats::{PipelineStats, StatsCounters};
use crate::transform::TransformError;
use crate::types::{
    FilterStatus, FilteredPosition, GlobalBeaconPosition, Measurement, RobotPose, TagId,
};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub decoder: DecoderConfig,
    pub filter_bank: FilterBankConfig,
    /// Snapshots kept for nearest-by-timestamp lookups
    pub history_len: usize,
    /// Period of the lost-target sweep (s)
    pub cleanup_interval_sec: f64,
    /// EMA weight of new global positions (1.0 = no smoothing)
    pub global_smoothing_alpha: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            decoder: DecoderConfig::default(),
            filter_bank: FilterBankConfig::default(),
            history_len: HISTORY_LEN,
            cleanup_interval_sec: 2.0,
            global_smoothing_alpha: 1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// What one chunk produced.
#[derive(Clone, Debug, Default)]
pub struct PipelineOutput {
    /// Published snapshots, in processing order
    pub results: Vec<Snapshot>,
    /// Link-loss readings seen in this chunk (never filtered)
    pub disconnects: Vec<Measurement>,
    /// Frames or records dropped before the filter
    pub discarded: usize,
    /// Tags evicted by the sweep that ran after this chunk, if any
    pub evicted: Vec<TagId>,
    /// Wall-clock time of processing
    pub total_time_us: u64,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Decoder + filter bank + published results. Single-threaded; see
/// [`crate::runtime`] for the threaded service around it.
pub struct Pipeline {
    pub config: PipelineConfig,
    decoder: StreamDecoder,
    bank: FilterBank,
    store: Arc<SnapshotStore>,
    last_cleanup: Option<f64>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let decoder = StreamDecoder::new(config.decoder.clone());
        let bank = FilterBank::new(config.filter_bank.clone());
        let store = Arc::new(SnapshotStore::new(
            config.history_len,
            config.global_smoothing_alpha,
        ));
        Self {
            config,
            decoder,
            bank,
            store,
            last_cleanup: None,
        }
    }

    /// Read side shared with other threads.
    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle::new(Arc::clone(&self.store))
    }

    /// Counters shared with the reader thread.
    pub fn shared_counters(&self) -> Arc<StatsCounters> {
        self.store.shared_counters()
    }

    /// Process bytes that arrived just now.
    pub fn submit_bytes(&mut self, bytes: &[u8]) -> PipelineOutput {
        self.submit_chunk(RawChunk::now(bytes.to_vec()))
    }

    /// Process one chunk. Readings are timestamped with `chunk.arrived_at`.
    pub fn submit_chunk(&mut self, chunk: RawChunk) -> PipelineOutput {
        let start = Instant::now();
        let mut out = PipelineOutput::default();
        let store = Arc::clone(&self.store);
        let counters = store.counters();
        counters.record_chunk(chunk.bytes.len());

        for event in self.decoder.decode(&chunk) {
            match event {
                DecodedEvent::Measurement {
                    measurement,
                    checksum_ok,
                } => {
                    counters.record_frame(checksum_ok);
                    if !measurement.is_usable() {
                        counters.record_frame_dropped();
                        out.discarded += 1;
                        continue;
                    }
                    if let Some(snapshot) = self.filter(&measurement) {
                        out.results.push(snapshot);
                    }
                }
                DecodedEvent::Disconnected(m) => {
                    counters.record_frame(true);
                    out.disconnects.push(m);
                }
                DecodedEvent::Discarded(err) => {
                    tracing::debug!(%err, "frame discarded");
                    counters.record_frame(false);
                    counters.record_frame_dropped();
                    out.discarded += 1;
                }
            }
        }

        out.evicted = self.maintain(chunk.arrived_at);
        self.store
            .set_status(self.bank.len(), self.decoder.link_state());
        out.total_time_us = start.elapsed().as_micros() as u64;
        out
    }

    fn filter(&mut self, m: &Measurement) -> Option<Snapshot> {
        match self
            .bank
            .filter_measurement(m.tag_id, m.distance_m, m.angle_deg, m.timestamp)
        {
            Ok(position) => {
                if position.status == FilterStatus::RejectedAngleJump {
                    self.store.counters().record_angle_jump();
                }
                Some(self.store.publish(position))
            }
            Err(err) => {
                tracing::warn!(%err, tag = %m.tag_id, "measurement not filtered");
                self.store.counters().record_frame_dropped();
                None
            }
        }
    }

    /// Run the lost-target sweep if `cleanup_interval_sec` has passed since
    /// the previous one. Returns the evicted tags.
    pub fn maintain(&mut self, now: f64) -> Vec<TagId> {
        match self.last_cleanup {
            None => {
                self.last_cleanup = Some(now);
                Vec::new()
            }
            Some(last) if now - last >= self.config.cleanup_interval_sec => {
                self.last_cleanup = Some(now);
                self.evict(now)
            }
            Some(_) => Vec::new(),
        }
    }

    /// Sweep lost targets immediately.
    pub fn evict(&mut self, now: f64) -> Vec<TagId> {
        let lost = self.bank.remove_lost_targets(now);
        self.store.evict(&lost);
        self.store
            .set_status(self.bank.len(), self.decoder.link_state());
        lost
    }

    pub fn submit_pose(&self, pose: RobotPose) -> Result<(), TransformError> {
        self.store.submit_pose(pose)
    }

    pub fn submit_pose_json(&self, value: &Value) -> Result<(), TransformError> {
        self.store.submit_pose_json(value)
    }

    pub fn latest(&self, tag_id: TagId) -> Option<FilteredPosition> {
        self.store.latest(tag_id)
    }

    pub fn latest_global(&self, tag_id: TagId) -> Option<GlobalBeaconPosition> {
        self.store.latest_global(tag_id)
    }

    pub fn nearest_by_timestamp(&self, ts: f64) -> Option<Snapshot> {
        self.store.nearest_by_timestamp(ts)
    }

    pub fn filter_state(&self, tag_id: TagId) -> Option<FilterSnapshot> {
        self.bank.get_filter_state(tag_id)
    }

    pub fn targets(&self) -> Vec<(TagId, FilterSnapshot)> {
        self.bank.get_all_targets()
    }

    pub fn stats(&self) -> PipelineStats {
        self.store.stats()
    }

    /// Clear filters, decoder buffers, published results and counters.
    pub fn reset(&mut self) {
        self.bank.reset();
        self.decoder.reset();
        self.store.reset();
        self.last_cleanup = None;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use uwb_protocol::binary::{AnchorInfo, BinaryFrame, TagInfo};
    use uwb_protocol::{ChecksumPolicy, LinkState, WireFormat};

    fn ascii_record(seq: u32, cm: u32, az: i32) -> String {
        format!(
            "Custom DS-TWR Responder SEQ NUM {seq}\nRSSI: -70dBm, SNR: 9dB\n\
             Peer AAA1, Distance {cm}cm, PDoA Azimuth {az} Elevation 0\n"
        )
    }

    fn binary_frame(tag_id: u8, distance_mm: i32, angle_centideg: i16) -> Vec<u8> {
        let anchor = AnchorInfo {
            role: 1,
            anchor_id: 0,
            local_time: 0,
            system_time: 0,
            voltage_mv: 3_300,
        };
        let tag = TagInfo {
            tag_id,
            distance_mm,
            angle_centideg,
            fp_db: -80,
            rx_db: -79,
        };
        BinaryFrame::new(1, anchor, tag).encode().to_vec()
    }

    fn binary_pipeline(policy: ChecksumPolicy) -> Pipeline {
        Pipeline::new(PipelineConfig {
            decoder: DecoderConfig {
                format: WireFormat::Binary,
                checksum_policy: policy,
                ..Default::default()
            },
            ..Default::default()
        })
    }

    #[test]
    fn ascii_stream_produces_local_and_global_results() {
        let mut p = Pipeline::new(PipelineConfig::default());
        p.submit_pose(RobotPose::new(1.0, 1.0, 0.0)).unwrap();

        let out = p.submit_chunk(RawChunk::new(ascii_record(1, 500, 0).into_bytes(), 10.0));
        assert_eq!(out.results.len(), 1);

        let local = p.latest(TagId(1)).unwrap();
        assert_eq!(local.status, FilterStatus::Initialized);
        assert_abs_diff_eq!(local.x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(local.y, 5.0, epsilon = 1e-12);

        let global = p.latest_global(TagId(1)).unwrap();
        assert_abs_diff_eq!(global.x, 6.0, epsilon = 1e-12);
        assert_abs_diff_eq!(global.y, 1.0, epsilon = 1e-12);

        let stats = p.stats();
        assert_eq!(stats.frames_total, 1);
        assert_eq!(stats.frames_valid, 1);
        assert_eq!(stats.active_targets, 1);
        assert_eq!(stats.link_state, LinkState::Connected);
    }

    #[test]
    fn disconnect_is_not_filtered() {
        let mut p = Pipeline::new(PipelineConfig::default());
        let out = p.submit_chunk(RawChunk::new(b"UWB RX fail\n".to_vec(), 1.0));
        assert_eq!(out.disconnects.len(), 1);
        assert!(out.results.is_empty());
        assert!(p.targets().is_empty());
        assert_eq!(p.stats().link_state, LinkState::Disconnected);
    }

    #[test]
    fn checksum_failures_are_gated_and_counted() {
        let mut good = binary_frame(2, 3_000, 0);
        let mut bad = binary_frame(2, 3_100, 0);
        bad[32] = bad[32].wrapping_add(1);
        good.extend_from_slice(&bad);

        let mut p = binary_pipeline(ChecksumPolicy::Enforce);
        let out = p.submit_chunk(RawChunk::new(good.clone(), 0.0));
        assert_eq!(out.results.len(), 1);
        assert_eq!(out.discarded, 1);
        let s = p.stats();
        assert_eq!((s.frames_total, s.frames_valid, s.frames_dropped), (2, 1, 1));
        assert_abs_diff_eq!(s.error_rate, 50.0, epsilon = 1e-12);
        assert_eq!(s.bytes_received, 66);

        let mut p = binary_pipeline(ChecksumPolicy::Ignore);
        let out = p.submit_chunk(RawChunk::new(good, 0.0));
        assert_eq!(out.results.len(), 2);
        assert_eq!(p.stats().frames_valid, 1);
    }

    #[test]
    fn zero_distance_frames_are_dropped() {
        let mut p = binary_pipeline(ChecksumPolicy::Enforce);
        let out = p.submit_chunk(RawChunk::new(binary_frame(1, 0, 0), 0.0));
        assert!(out.results.is_empty());
        assert_eq!(p.stats().frames_dropped, 1);
    }

    #[test]
    fn angle_jumps_are_counted() {
        let mut p = Pipeline::new(PipelineConfig::default());
        let mut t = 0.0;
        for seq in 0..10 {
            p.submit_chunk(RawChunk::new(ascii_record(seq, 300, 30).into_bytes(), t));
            t += 0.1;
        }
        let out = p.submit_chunk(RawChunk::new(ascii_record(10, 300, -150).into_bytes(), t));
        assert_eq!(out.results[0].local.status, FilterStatus::RejectedAngleJump);
        assert_eq!(p.stats().angle_jumps_rejected, 1);
    }

    #[test]
    fn silent_tags_are_evicted_by_the_sweep() {
        let mut p = binary_pipeline(ChecksumPolicy::Enforce);
        p.submit_pose(RobotPose::default()).unwrap();
        p.submit_chunk(RawChunk::new(binary_frame(1, 2_000, 0), 0.0));
        p.submit_chunk(RawChunk::new(binary_frame(2, 2_000, 0), 1.5));

        // Sweep runs at t = 2.5 (interval 2 s since t = 0); tag 1 idle 2.5 s.
        let out = p.submit_chunk(RawChunk::new(binary_frame(2, 2_000, 0), 2.5));
        assert_eq!(out.evicted, vec![TagId(1)]);
        assert!(p.latest(TagId(1)).is_none());
        assert!(p.latest_global(TagId(1)).is_none());
        assert!(p.filter_state(TagId(1)).is_none());
        assert!(p.filter_state(TagId(2)).is_some());
        assert_eq!(p.stats().active_targets, 1);
    }

    #[test]
    fn nearest_snapshot_lookup() {
        let mut p = binary_pipeline(ChecksumPolicy::Enforce);
        for (i, d) in [1_000, 1_100, 1_200].iter().enumerate() {
            p.submit_chunk(RawChunk::new(binary_frame(1, *d, 0), i as f64 * 0.1));
        }
        let s = p.nearest_by_timestamp(0.12).unwrap();
        assert_abs_diff_eq!(s.timestamp(), 0.1, epsilon = 1e-12);
    }

    #[test]
    fn config_from_partial_json() {
        let cfg: PipelineConfig = serde_json::from_str(
            r#"{"decoder": {"format": "binary"}, "filter_bank": {"filter": {"max_human_speed": 3.0}}}"#,
        )
        .unwrap();
        assert_eq!(cfg.decoder.format, WireFormat::Binary);
        assert_eq!(cfg.filter_bank.filter.max_human_speed, 3.0);
        assert_eq!(cfg.filter_bank.filter.stale_reset_sec, 0.8);
        assert_eq!(cfg.filter_bank.target_lost_timeout, 2.0);
        assert_eq!(cfg.history_len, 200);
    }

    #[test]
    fn reset_clears_everything() {
        let mut p = binary_pipeline(ChecksumPolicy::Enforce);
        p.submit_chunk(RawChunk::new(binary_frame(1, 2_000, 0), 0.0));
        p.reset();
        assert!(p.latest(TagId(1)).is_none());
        assert!(p.targets().is_empty());
        assert_eq!(p.stats(), PipelineStats::default());
    }
}
