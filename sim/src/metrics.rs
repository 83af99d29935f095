//! Tracking metrics against simulator ground truth: RMSE in both frames and
//! how often the bearing gate fired.

use std::collections::BTreeMap;

use beacon_core::{FilterStatus, Snapshot};
use serde::{Deserialize, Serialize};
use uwb_protocol::TagId;

use crate::anchor_sim::TruthSample;

/// Truth lookup by tag and scan time.
#[derive(Clone, Debug, Default)]
pub struct TruthIndex {
    by_tag: BTreeMap<TagId, Vec<TruthSample>>,
}

impl TruthIndex {
    pub fn new(samples: &[TruthSample]) -> Self {
        let mut by_tag: BTreeMap<TagId, Vec<TruthSample>> = BTreeMap::new();
        for s in samples {
            by_tag.entry(s.tag_id).or_default().push(s.clone());
        }
        for v in by_tag.values_mut() {
            v.sort_by(|a, b| a.time.total_cmp(&b.time));
        }
        Self { by_tag }
    }

    /// Sample of `tag` taken at `time` (within a microsecond).
    pub fn at(&self, tag: TagId, time: f64) -> Option<&TruthSample> {
        let samples = self.by_tag.get(&tag)?;
        let i = samples.partition_point(|s| s.time < time - 1e-6);
        samples.get(i).filter(|s| (s.time - time).abs() <= 1e-6)
    }

    pub fn tags(&self) -> impl Iterator<Item = TagId> + '_ {
        self.by_tag.keys().copied()
    }
}

/// Accumulated metric statistics.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TrackingMetrics {
    /// Results matched to a truth sample
    pub n_matched: u64,
    /// Results with no truth at their timestamp
    pub n_unmatched: u64,
    /// Matched results that also had a map projection
    pub n_global: u64,
    pub sum_sq_local_err: f64,
    pub sum_sq_global_err: f64,
    pub angle_jumps_rejected: u64,
}

impl TrackingMetrics {
    /// Root-mean-square anchor-frame position error (m).
    pub fn rmse_local(&self) -> f64 {
        if self.n_matched == 0 {
            return 0.0;
        }
        (self.sum_sq_local_err / self.n_matched as f64).sqrt()
    }

    /// Root-mean-square map-frame position error (m).
    pub fn rmse_global(&self) -> f64 {
        if self.n_global == 0 {
            return 0.0;
        }
        (self.sum_sq_global_err / self.n_global as f64).sqrt()
    }

    pub fn accumulate(&mut self, snapshot: &Snapshot, truth: &TruthIndex) {
        let local = &snapshot.local;
        if local.status == FilterStatus::RejectedAngleJump {
            self.angle_jumps_rejected += 1;
        }
        let Some(gt) = truth.at(local.tag_id, local.timestamp) else {
            self.n_unmatched += 1;
            return;
        };

        let dx = local.x - gt.local[0];
        let dy = local.y - gt.local[1];
        self.sum_sq_local_err += dx * dx + dy * dy;
        self.n_matched += 1;

        if let Some(global) = &snapshot.global {
            let dx = global.x - gt.global[0];
            let dy = global.y - gt.global[1];
            self.sum_sq_global_err += dx * dx + dy * dy;
            self.n_global += 1;
        }
    }

    /// Score a whole run.
    pub fn evaluate(snapshots: &[Snapshot], truth: &[TruthSample]) -> Self {
        let index = TruthIndex::new(truth);
        let mut metrics = Self::default();
        for s in snapshots {
            metrics.accumulate(s, &index);
        }
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use beacon_core::{FilteredPosition, GlobalBeaconPosition};

    fn truth(tag: u32, time: f64, x: f64, y: f64) -> TruthSample {
        TruthSample {
            tag_id: TagId(tag),
            time,
            global: [x + 10.0, y],
            local: [x, y],
        }
    }

    fn snapshot(tag: u32, time: f64, x: f64, y: f64, status: FilterStatus) -> Snapshot {
        Snapshot {
            local: FilteredPosition {
                tag_id: TagId(tag),
                x,
                y,
                distance: x.hypot(y),
                angle: 0.0,
                vx: 0.0,
                vy: 0.0,
                confidence: 0.5,
                status,
                timestamp: time,
            },
            global: Some(GlobalBeaconPosition {
                tag_id: TagId(tag),
                x: x + 10.0,
                y,
                confidence: 0.5,
                heading: None,
                timestamp: time,
            }),
        }
    }

    #[test]
    fn truth_lookup_is_exact_in_time() {
        let index = TruthIndex::new(&[truth(1, 0.2, 0.0, 1.0), truth(1, 0.1, 0.0, 2.0)]);
        assert_eq!(index.at(TagId(1), 0.1).map(|s| s.local[1]), Some(2.0));
        assert!(index.at(TagId(1), 0.15).is_none());
        assert!(index.at(TagId(2), 0.1).is_none());
        assert_eq!(index.tags().collect::<Vec<_>>(), vec![TagId(1)]);
    }

    #[test]
    fn rmse_over_matched_results() {
        let truth = [truth(1, 0.0, 0.0, 3.0), truth(1, 0.1, 0.0, 3.0)];
        let snaps = [
            snapshot(1, 0.0, 0.3, 3.0, FilterStatus::Initialized),
            snapshot(1, 0.1, 0.0, 3.4, FilterStatus::RejectedAngleJump),
            snapshot(1, 0.5, 9.0, 9.0, FilterStatus::Filtered),
        ];
        let m = TrackingMetrics::evaluate(&snaps, &truth);
        assert_eq!((m.n_matched, m.n_unmatched, m.n_global), (2, 1, 2));
        assert_abs_diff_eq!(m.rmse_local(), ((0.09 + 0.16) / 2.0f64).sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(m.rmse_global(), m.rmse_local(), epsilon = 1e-12);
        assert_eq!(m.angle_jumps_rejected, 1);
    }

    #[test]
    fn empty_run_scores_zero() {
        let m = TrackingMetrics::evaluate(&[], &[]);
        assert_eq!(m.rmse_local(), 0.0);
        assert_eq!(m.rmse_global(), 0.0);
    }
}
