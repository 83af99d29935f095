//! Byte captures: what an anchor sent, when, and where the robot was.
//!
//! A capture is replayed through the same [`Pipeline`] used live, with the
//! recorded arrival times as the clock.

use std::io::{BufReader, BufWriter};
use std::path::Path;

use beacon_core::{Pipeline, PipelineConfig, PipelineStats, RobotPose, Snapshot};
use serde::{Deserialize, Serialize};
use uwb_protocol::{RawChunk, TagId, WireFormat};

use crate::anchor_sim::TruthSample;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoseSample {
    pub time: f64,
    pub pose: RobotPose,
}

/// A recorded (or simulated) serial session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Capture {
    pub format: WireFormat,
    /// Serial reads in arrival order
    pub chunks: Vec<RawChunk>,
    /// Robot poses in time order
    #[serde(default)]
    pub poses: Vec<PoseSample>,
    /// Ground truth, present for simulated captures
    #[serde(default)]
    pub truth: Vec<TruthSample>,
}

impl Capture {
    pub fn new(format: WireFormat) -> Self {
        Self {
            format,
            chunks: Vec::new(),
            poses: Vec::new(),
            truth: Vec::new(),
        }
    }

    pub fn total_bytes(&self) -> usize {
        self.chunks.iter().map(|c| c.bytes.len()).sum()
    }
}

/// Save a capture to a JSON file.
pub fn save_capture(capture: &Capture, path: &Path) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, capture)?;
    Ok(())
}

/// Load a capture from a JSON file.
pub fn load_capture(path: &Path) -> anyhow::Result<Capture> {
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    let capture: Capture = serde_json::from_reader(reader)?;
    Ok(capture)
}

/// Everything a replay produced.
#[derive(Clone, Debug)]
pub struct ReplayOutcome {
    pub snapshots: Vec<Snapshot>,
    pub evicted: Vec<TagId>,
    pub stats: PipelineStats,
}

/// Feed `capture` through a fresh pipeline. Poses are submitted as soon as
/// the replay clock reaches them. The capture's own wire format overrides
/// the one in `config`.
pub fn replay_capture(capture: &Capture, mut config: PipelineConfig) -> anyhow::Result<ReplayOutcome> {
    config.decoder.format = capture.format;
    let mut pipeline = Pipeline::new(config);
    let mut snapshots = Vec::new();
    let mut evicted = Vec::new();
    let mut poses = capture.poses.iter().peekable();

    for chunk in &capture.chunks {
        while let Some(sample) = poses.next_if(|p| p.time <= chunk.arrived_at) {
            pipeline.submit_pose(sample.pose)?;
        }
        let out = pipeline.submit_chunk(chunk.clone());
        snapshots.extend(out.results);
        evicted.extend(out.evicted);
    }

    Ok(ReplayOutcome {
        snapshots,
        evicted,
        stats: pipeline.stats(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const RECORD: &str = "Custom DS-TWR Responder SEQ NUM 7\nRSSI: -70dBm, SNR: 9dB\n\
                          Peer AAA1, Distance 500cm, PDoA Azimuth 0\n";

    fn ascii_capture() -> Capture {
        let mut capture = Capture::new(WireFormat::Ascii);
        capture.chunks.push(RawChunk::new(RECORD.as_bytes()[..30].to_vec(), 1.0));
        capture.chunks.push(RawChunk::new(RECORD.as_bytes()[30..].to_vec(), 1.0));
        capture.poses.push(PoseSample {
            time: 0.5,
            pose: RobotPose::new(1.0, 1.0, 0.0),
        });
        capture
    }

    #[test]
    fn replay_projects_with_recorded_pose() {
        let outcome = replay_capture(&ascii_capture(), PipelineConfig::default()).unwrap();
        assert_eq!(outcome.snapshots.len(), 1);

        let g = outcome.snapshots[0].global.as_ref().unwrap();
        assert_abs_diff_eq!(g.x, 6.0, epsilon = 1e-9);
        assert_abs_diff_eq!(g.y, 1.0, epsilon = 1e-9);
        assert_eq!(outcome.stats.chunks_received, 2);
        assert_eq!(outcome.stats.frames_valid, 1);
    }

    #[test]
    fn capture_survives_a_file_round_trip() {
        let path = std::env::temp_dir().join(format!("beacon-capture-{}.json", std::process::id()));
        let capture = ascii_capture();
        save_capture(&capture, &path).unwrap();
        let loaded = load_capture(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.format, WireFormat::Ascii);
        assert_eq!(loaded.chunks, capture.chunks);
        assert_eq!(loaded.poses, capture.poses);
        assert_eq!(loaded.total_bytes(), RECORD.len());
    }

    #[test]
    fn missing_optional_sections_default_to_empty() {
        let json = r#"{"format": "binary", "chunks": [{"bytes": [85], "arrived_at": 2.0}]}"#;
        let capture: Capture = serde_json::from_str(json).unwrap();
        assert_eq!(capture.format, WireFormat::Binary);
        assert!(capture.poses.is_empty());
        assert!(capture.truth.is_empty());
    }
}
