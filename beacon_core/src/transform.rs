//! Anchor-local → map-global projection.
//!
//! # Frames
//! - **Anchor frame**: `x` to the right, `y` forward, as produced by the
//!   filter. The anchor sits at the robot origin facing the robot's front.
//! - **Map frame**: right-handed, robot pose `(x, y, yaw)` with `yaw` in
//!   radians counter-clockwise from map +X.
//!
//! With forward `f = (cos ψ, sin ψ)` and right `r = (sin ψ, −cos ψ)`:
//!
//! ```text
//! x_g = x_r + x_l·sin ψ + y_l·cos ψ
//! y_g = y_r − x_l·cos ψ + y_l·sin ψ
//! ```

use std::f64::consts::{PI, TAU};

use serde_json::Value;
use thiserror::Error;

use crate::types::{FilteredPosition, GlobalBeaconPosition, RobotPose};

/// Below this local speed (m/s) no heading is reported.
pub const MIN_HEADING_SPEED: f64 = 1e-6;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("invalid robot pose: {0}")]
    InvalidPose(String),
}

// ---------------------------------------------------------------------------
// Pose validation
// ---------------------------------------------------------------------------

fn number_field(obj: &serde_json::Map<String, Value>, key: &str) -> Result<f64, TransformError> {
    let value = obj
        .get(key)
        .ok_or_else(|| TransformError::InvalidPose(format!("missing field `{key}`")))?;
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|v| v.is_finite())
        .ok_or_else(|| TransformError::InvalidPose(format!("field `{key}` is not a number: {value}")))
}

fn optional_number_field(
    obj: &serde_json::Map<String, Value>,
    key: &str,
) -> Result<f64, TransformError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(0.0),
        Some(_) => number_field(obj, key),
    }
}

/// Check a pose received as loosely typed JSON and decode it.
///
/// `x`, `y` and `yaw` must be present and numeric (numbers or numeric
/// strings); `z`, `pitch`, `roll` default to 0.
pub fn validate_robot_pose(value: &Value) -> Result<RobotPose, TransformError> {
    let obj = value
        .as_object()
        .ok_or_else(|| TransformError::InvalidPose(format!("expected an object, got {value}")))?;
    Ok(RobotPose {
        x: number_field(obj, "x")?,
        y: number_field(obj, "y")?,
        yaw: number_field(obj, "yaw")?,
        z: optional_number_field(obj, "z")?,
        pitch: optional_number_field(obj, "pitch")?,
        roll: optional_number_field(obj, "roll")?,
    })
}

impl RobotPose {
    pub fn from_json(value: &Value) -> Result<Self, TransformError> {
        validate_robot_pose(value)
    }

    /// A typed pose is valid when the planar components are finite.
    pub fn validate(&self) -> Result<(), TransformError> {
        for (name, v) in [("x", self.x), ("y", self.y), ("yaw", self.yaw)] {
            if !v.is_finite() {
                return Err(TransformError::InvalidPose(format!("`{name}` is not finite: {v}")));
            }
        }
        Ok(())
    }

    /// Yaw in radians. Magnitudes beyond 2π can only be degrees.
    pub fn yaw_radians(&self) -> f64 {
        if self.yaw.abs() > TAU {
            self.yaw.to_radians()
        } else {
            self.yaw
        }
    }
}

// ---------------------------------------------------------------------------
// Transforms
// ---------------------------------------------------------------------------

/// Project an anchor-frame point into the map frame.
pub fn to_global(local_x: f64, local_y: f64, pose: &RobotPose) -> Result<(f64, f64), TransformError> {
    pose.validate()?;
    let (sin, cos) = pose.yaw_radians().sin_cos();
    Ok((
        pose.x + local_x * sin + local_y * cos,
        pose.y - local_x * cos + local_y * sin,
    ))
}

/// Rotate a local heading by the robot yaw and normalise into [-π, π].
pub fn transform_heading(local_heading: f64, robot_yaw: f64) -> f64 {
    let mut heading = local_heading + robot_yaw;
    if !heading.is_finite() {
        return heading;
    }
    while heading > PI {
        heading -= TAU;
    }
    while heading < -PI {
        heading += TAU;
    }
    heading
}

/// Direction of travel in the anchor frame, measured from forward and
/// positive to the left. `None` when the tag is (nearly) still.
pub fn local_heading(vx: f64, vy: f64) -> Option<f64> {
    if vx.hypot(vy) > MIN_HEADING_SPEED {
        Some((-vx).atan2(vy))
    } else {
        None
    }
}

/// Project a filtered result, heading included, into the map frame.
pub fn transform_position(
    local: &FilteredPosition,
    pose: &RobotPose,
) -> Result<GlobalBeaconPosition, TransformError> {
    let (x, y) = to_global(local.x, local.y, pose)?;
    let heading = local_heading(local.vx, local.vy)
        .map(|h| transform_heading(h, pose.yaw_radians()));
    Ok(GlobalBeaconPosition {
        tag_id: local.tag_id,
        x,
        y,
        confidence: local.confidence,
        heading,
        timestamp: local.timestamp,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
