//! Published results, behind their own lock.
//!
//! The processing thread writes here after each filter step; consumers read
//! through a cloneable [`PipelineHandle`]. Nothing in this module touches
//! filter state, so readers never contend with the filter bank.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::history::{Snapshot, SnapshotHistory};
use crate::stats::{PipelineStats, StatsCounters};
use crate::transform::{transform_position, validate_robot_pose, TransformError};
use crate::types::{FilteredPosition, GlobalBeaconPosition, LinkState, RobotPose, TagId};

#[derive(Debug)]
struct StoreInner {
    latest: BTreeMap<TagId, FilteredPosition>,
    latest_global: BTreeMap<TagId, GlobalBeaconPosition>,
    pose: Option<RobotPose>,
    history: SnapshotHistory,
    active_targets: usize,
    link_state: LinkState,
}

/// Latest result per tag, their map projections and the snapshot history.
#[derive(Debug)]
pub struct SnapshotStore {
    inner: RwLock<StoreInner>,
    counters: Arc<StatsCounters>,
    /// EMA weight of a new global position; 1.0 disables smoothing.
    smoothing_alpha: f64,
}

impl SnapshotStore {
    pub fn new(history_len: usize, smoothing_alpha: f64) -> Self {
        let smoothing_alpha = if smoothing_alpha > 0.0 && smoothing_alpha <= 1.0 {
            smoothing_alpha
        } else {
            1.0
        };
        Self {
            inner: RwLock::new(StoreInner {
                latest: BTreeMap::new(),
                latest_global: BTreeMap::new(),
                pose: None,
                history: SnapshotHistory::new(history_len),
                active_targets: 0,
                link_state: LinkState::Unknown,
            }),
            counters: Arc::new(StatsCounters::new()),
            smoothing_alpha,
        }
    }

    pub fn counters(&self) -> &StatsCounters {
        &self.counters
    }

    /// Counters for threads that hold no reference to the store.
    pub fn shared_counters(&self) -> Arc<StatsCounters> {
        Arc::clone(&self.counters)
    }

    fn smooth(&self, prev: Option<&GlobalBeaconPosition>, mut next: GlobalBeaconPosition) -> GlobalBeaconPosition {
        if let Some(prev) = prev {
            let a = self.smoothing_alpha;
            next.x = a * next.x + (1.0 - a) * prev.x;
            next.y = a * next.y + (1.0 - a) * prev.y;
        }
        next
    }

    /// Store a new local result, project it with the current pose and
    /// append it to the history.
    pub fn publish(&self, local: FilteredPosition) -> Snapshot {
        let mut inner = self.inner.write();
        let pose = inner.pose;
        let global = match pose {
            Some(pose) => match transform_position(&local, &pose) {
                Ok(g) => {
                    let g = self.smooth(inner.latest_global.get(&local.tag_id), g);
                    inner.latest_global.insert(local.tag_id, g.clone());
                    Some(g)
                }
                Err(err) => {
                    tracing::warn!(%err, tag = %local.tag_id, "projection skipped");
                    None
                }
            },
            None => None,
        };
        inner.latest.insert(local.tag_id, local.clone());
        let snapshot = Snapshot { local, global };
        inner.history.push(snapshot.clone());
        snapshot
    }

    /// Accept a new robot pose and re-project every tag's latest result.
    /// An invalid pose is refused and the previous projections are kept.
    pub fn submit_pose(&self, pose: RobotPose) -> Result<(), TransformError> {
        if let Err(err) = pose.validate() {
            tracing::warn!(%err, "robot pose rejected");
            return Err(err);
        }
        let mut inner = self.inner.write();
        inner.pose = Some(pose);
        let locals: Vec<FilteredPosition> = inner.latest.values().cloned().collect();
        for local in locals {
            if let Ok(g) = transform_position(&local, &pose) {
                let g = self.smooth(inner.latest_global.get(&local.tag_id), g);
                inner.latest_global.insert(local.tag_id, g);
            }
        }
        Ok(())
    }

    /// [`submit_pose`](Self::submit_pose) for a pose decoded from JSON.
    pub fn submit_pose_json(&self, value: &Value) -> Result<(), TransformError> {
        match validate_robot_pose(value) {
            Ok(pose) => self.submit_pose(pose),
            Err(err) => {
                tracing::warn!(%err, "robot pose rejected");
                Err(err)
            }
        }
    }

    /// Forget evicted tags.
    pub fn evict(&self, tags: &[TagId]) {
        if tags.is_empty() {
            return;
        }
        let mut inner = self.inner.write();
        for tag in tags {
            inner.latest.remove(tag);
            inner.latest_global.remove(tag);
        }
    }

    pub fn set_status(&self, active_targets: usize, link_state: LinkState) {
        let mut inner = self.inner.write();
        inner.active_targets = active_targets;
        inner.link_state = link_state;
    }

    pub fn pose(&self) -> Option<RobotPose> {
        self.inner.read().pose
    }

    pub fn latest(&self, tag_id: TagId) -> Option<FilteredPosition> {
        self.inner.read().latest.get(&tag_id).cloned()
    }

    pub fn latest_global(&self, tag_id: TagId) -> Option<GlobalBeaconPosition> {
        self.inner.read().latest_global.get(&tag_id).cloned()
    }

    pub fn all_latest(&self) -> Vec<FilteredPosition> {
        self.inner.read().latest.values().cloned().collect()
    }

    pub fn nearest_by_timestamp(&self, ts: f64) -> Option<Snapshot> {
        self.inner.read().history.nearest_by_timestamp(ts).cloned()
    }

    pub fn stats(&self) -> PipelineStats {
        let inner = self.inner.read();
        self.counters.snapshot(inner.active_targets, inner.link_state)
    }

    /// Drop every published result and counter. The pose is kept.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.latest.clear();
        inner.latest_global.clear();
        inner.history.clear();
        inner.active_targets = 0;
        inner.link_state = LinkState::Unknown;
        self.counters.reset();
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cheap, cloneable read side of a pipeline. Also the entry point for
/// robot poses.
#[derive(Clone, Debug)]
pub struct PipelineHandle {
    store: Arc<SnapshotStore>,
}

impl PipelineHandle {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self { store }
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

    pub fn all_latest(&self) -> Vec<FilteredPosition> {
        self.store.all_latest()
    }

    pub fn nearest_by_timestamp(&self, ts: f64) -> Option<Snapshot> {
        self.store.nearest_by_timestamp(ts)
    }

    pub fn stats(&self) -> PipelineStats {
        self.store.stats()
    }
}
