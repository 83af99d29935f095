//! Result types produced by the tracking core.

use serde::{Deserialize, Serialize};
use std::fmt;

pub use uwb_protocol::{LinkState, Measurement, TagId};

/// Outcome of feeding one measurement to a filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterStatus {
    /// First sample for this tag; state was seeded from it.
    Initialized,
    /// Measurement accepted and fused.
    Filtered,
    /// Bearing jumped too far too fast; only the prediction was kept.
    RejectedAngleJump,
    /// Update skipped (singular innovation covariance); prediction kept.
    Predicted,
}

impl fmt::Display for FilterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FilterStatus::Initialized => "initialized",
            FilterStatus::Filtered => "filtered",
            FilterStatus::RejectedAngleJump => "rejected_angle_jump",
            FilterStatus::Predicted => "predicted",
        };
        f.write_str(s)
    }
}

/// Filtered position of a tag in the anchor frame.
///
/// Anchor frame: `y` forward, `x` to the right. Angles are positive toward
/// the left, so `x = -d·sin θ`, `y = d·cos θ`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilteredPosition {
    pub tag_id: TagId,
    pub x: f64,
    pub y: f64,
    /// Filtered range (m)
    pub distance: f64,
    /// Filtered bearing (deg, in (-180, 180])
    pub angle: f64,
    pub vx: f64,
    pub vy: f64,
    pub confidence: f64,
    pub status: FilterStatus,
    pub timestamp: f64,
}

impl FilteredPosition {
    pub fn speed(&self) -> f64 {
        self.vx.hypot(self.vy)
    }
}

/// Pose of the robot carrying the anchor, in the map frame.
///
/// `yaw` is in radians, counter-clockwise from the map +X axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RobotPose {
    pub x: f64,
    pub y: f64,
    pub yaw: f64,
    #[serde(default)]
    pub z: f64,
    #[serde(default)]
    pub pitch: f64,
    #[serde(default)]
    pub roll: f64,
}

impl RobotPose {
    pub fn new(x: f64, y: f64, yaw: f64) -> Self {
        Self {
            x,
            y,
            yaw,
            ..Self::default()
        }
    }
}

/// Tag position projected into the map frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GlobalBeaconPosition {
    pub tag_id: TagId,
    pub x: f64,
    pub y: f64,
    pub confidence: f64,
    /// Direction of travel in the map frame (rad), when the tag is moving.
    pub heading: Option<f64>,
    pub timestamp: f64,
}
