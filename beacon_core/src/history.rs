//! Bounded history of published results for time-aligned lookups.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::types::{FilteredPosition, GlobalBeaconPosition};

/// Default number of snapshots kept.
pub const HISTORY_LEN: usize = 200;

/// One published result: the local estimate and, when a pose was known,
/// its map projection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub local: FilteredPosition,
    pub global: Option<GlobalBeaconPosition>,
}

impl Snapshot {
    pub fn timestamp(&self) -> f64 {
        self.local.timestamp
    }
}

/// Ring buffer of the most recent snapshots across all tags, oldest first.
#[derive(Clone, Debug)]
pub struct SnapshotHistory {
    capacity: usize,
    entries: VecDeque<Snapshot>,
}

impl Default for SnapshotHistory {
    fn default() -> Self {
        Self::new(HISTORY_LEN)
    }
}

impl SnapshotHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a snapshot, evicting the oldest once full.
    pub fn push(&mut self, snapshot: Snapshot) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(snapshot);
    }

    /// Snapshot whose timestamp is closest to `ts`. Ties go to the older one.
    pub fn nearest_by_timestamp(&self, ts: f64) -> Option<&Snapshot> {
        let mut best: Option<(&Snapshot, f64)> = None;
        for s in &self.entries {
            let gap = (s.timestamp() - ts).abs();
            if best.map_or(true, |(_, g)| gap < g) {
                best = Some((s, gap));
            }
        }
        best.map(|(s, _)| s)
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
