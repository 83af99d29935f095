//! One [`PolarKalmanFilter`] per tag.
//!
//! # Lifecycle
//! - **Creation**: lazily, on the first measurement of an unknown tag.
//! - **Deletion**: only through [`FilterBank::remove_lost_targets`], once a
//!   tag has been silent for longer than `target_lost_timeout`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::polar_kf::{FilterError, FilterSnapshot, PolarKalmanFilter, PolarKfConfig};
use crate::types::{FilteredPosition, TagId};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterBankConfig {
    /// Parameters for every per-tag filter
    pub filter: PolarKfConfig,
    /// Idle time after which a tag's filter is dropped (s)
    pub target_lost_timeout: f64,
}

impl Default for FilterBankConfig {
    fn default() -> Self {
        Self {
            filter: PolarKfConfig::default(),
            target_lost_timeout: 2.0,
        }
    }
}

#[derive(Clone, Debug)]
struct TrackedTag {
    filter: PolarKalmanFilter,
    last_seen: f64,
}

/// Owns the filters of every tag currently in view.
#[derive(Clone, Debug, Default)]
pub struct FilterBank {
    pub config: FilterBankConfig,
    tags: BTreeMap<TagId, TrackedTag>,
}

impl FilterBank {
    pub fn new(config: FilterBankConfig) -> Self {
        Self {
            config,
            tags: BTreeMap::new(),
        }
    }

    /// Route a measurement to the tag's filter, creating it if needed.
    pub fn filter_measurement(
        &mut self,
        tag_id: TagId,
        distance: f64,
        angle_deg: f64,
        timestamp: f64,
    ) -> Result<FilteredPosition, FilterError> {
        if let Some(tracked) = self.tags.get_mut(&tag_id) {
            let status = tracked
                .filter
                .filter_measurement(distance, angle_deg, timestamp)?;
            tracked.last_seen = timestamp;
            return Ok(tracked.filter.position(tag_id, status, timestamp));
        }

        // A new tag is only registered once its first reading is accepted.
        let mut filter = PolarKalmanFilter::new(self.config.filter.clone());
        let status = filter.filter_measurement(distance, angle_deg, timestamp)?;
        let position = filter.position(tag_id, status, timestamp);
        tracing::info!(tag = %tag_id, "tracking new tag");
        self.tags.insert(
            tag_id,
            TrackedTag {
                filter,
                last_seen: timestamp,
            },
        );
        Ok(position)
    }

    /// Drop filters idle for longer than `target_lost_timeout` at `now`.
    /// Returns the ids that were removed.
    pub fn remove_lost_targets(&mut self, now: f64) -> Vec<TagId> {
        let timeout = self.config.target_lost_timeout;
        let lost: Vec<TagId> = self
            .tags
            .iter()
            .filter(|(_, t)| now - t.last_seen > timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in &lost {
            self.tags.remove(id);
            tracing::info!(tag = %id, timeout, "tag lost, filter removed");
        }
        lost
    }

    pub fn get_filter_state(&self, tag_id: TagId) -> Option<FilterSnapshot> {
        self.tags.get(&tag_id).map(|t| t.filter.get_current_state())
    }

    /// Snapshots of every live filter, ordered by tag id.
    pub fn get_all_targets(&self) -> Vec<(TagId, FilterSnapshot)> {
        self.tags
            .iter()
            .map(|(id, t)| (*id, t.filter.get_current_state()))
            .collect()
    }

    pub fn contains(&self, tag_id: TagId) -> bool {
        self.tags.contains_key(&tag_id)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Drop every filter.
    pub fn reset(&mut self) {
        self.tags.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FilterStatus;
    use approx::assert_abs_diff_eq;

    #[test]
    fn creates_filters_lazily() {
        let mut bank = FilterBank::new(FilterBankConfig::default());
        assert!(bank.is_empty());

        let p = bank.filter_measurement(TagId(1), 5.0, 0.0, 0.0).unwrap();
        assert_eq!(p.status, FilterStatus::Initialized);
        assert_abs_diff_eq!(p.x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p.y, 5.0, epsilon = 1e-12);

        bank.filter_measurement(TagId(2), 1.0, 45.0, 0.0).unwrap();
        let p = bank.filter_measurement(TagId(1), 5.0, 0.0, 0.1).unwrap();
        assert_eq!(p.status, FilterStatus::Filtered);
        assert_eq!(bank.len(), 2);
    }

    #[test]
    fn tags_are_filtered_independently() {
        let mut bank = FilterBank::new(FilterBankConfig::default());
        bank.filter_measurement(TagId(1), 2.0, 10.0, 0.0).unwrap();
        bank.filter_measurement(TagId(2), 8.0, -60.0, 0.0).unwrap();
        bank.filter_measurement(TagId(1), 2.0, 10.0, 0.1).unwrap();

        let s1 = bank.get_filter_state(TagId(1)).unwrap();
        let s2 = bank.get_filter_state(TagId(2)).unwrap();
        assert_eq!(s1.update_count, 1);
        assert_eq!(s2.update_count, 0);
        assert_abs_diff_eq!(s2.distance, 8.0, epsilon = 1e-12);
    }

    #[test]
    fn evicts_after_timeout() {
        let mut bank = FilterBank::new(FilterBankConfig::default());
        bank.filter_measurement(TagId(1), 3.0, 0.0, 10.0).unwrap();
        bank.filter_measurement(TagId(2), 3.0, 0.0, 11.5).unwrap();

        assert!(bank.remove_lost_targets(12.0).is_empty());
        assert_eq!(bank.remove_lost_targets(12.0 + 1e-6), vec![TagId(1)]);
        assert!(!bank.contains(TagId(1)));
        assert!(bank.contains(TagId(2)));

        // A returning tag starts over.
        let p = bank.filter_measurement(TagId(1), 3.0, 0.0, 20.0).unwrap();
        assert_eq!(p.status, FilterStatus::Initialized);
    }

    #[test]
    fn rejected_samples_keep_tag_alive() {
        let mut bank = FilterBank::new(FilterBankConfig::default());
        bank.filter_measurement(TagId(1), 3.0, 30.0, 0.0).unwrap();
        let p = bank.filter_measurement(TagId(1), 3.0, -150.0, 0.1).unwrap();
        assert_eq!(p.status, FilterStatus::RejectedAngleJump);
        assert!(bank.remove_lost_targets(2.05).is_empty());
    }

    #[test]
    fn all_targets_and_reset() {
        let mut bank = FilterBank::new(FilterBankConfig::default());
        for id in [3, 1, 2] {
            bank.filter_measurement(TagId(id), 1.0, 0.0, 0.0).unwrap();
        }
        let ids: Vec<TagId> = bank.get_all_targets().iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![TagId(1), TagId(2), TagId(3)]);

        bank.reset();
        assert!(bank.get_all_targets().is_empty());
        assert!(bank.get_filter_state(TagId(1)).is_none());
    }

    #[test]
    fn failed_first_reading_does_not_register_tag() {
        let mut bank = FilterBank::new(FilterBankConfig::default());
        let err = bank.filter_measurement(TagId(4), f64::NAN, 0.0, 0.0);
        assert!(matches!(err, Err(FilterError::NonFiniteMeasurement { .. })));
        assert!(bank.is_empty());
        assert!(bank.get_all_targets().is_empty());

        // Errors on a live tag leave it in place.
        bank.filter_measurement(TagId(4), 2.0, 0.0, 0.1).unwrap();
        assert!(bank.filter_measurement(TagId(4), 2.0, f64::INFINITY, 0.2).is_err());
        assert_eq!(bank.len(), 1);
    }
}
