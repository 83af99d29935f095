//! Ground-truth motion for simulated beacons and for the robot carrying the
//! anchor.
//!
//! Beacons walk in the map frame with state `[px, py, vx, vy]`. The robot
//! drives a unicycle path and exposes its pose at every step.

use beacon_core::{transform_heading, RobotPose};
use serde::{Deserialize, Serialize};
use uwb_protocol::TagId;

/// How a beacon moves between steps.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum MotionSpec {
    /// Standing still.
    Stationary,
    /// Straight line at the current velocity.
    ConstantVelocity,
    /// Constant speed, turning at `omega` (rad/s, positive to the left).
    ConstantTurn { omega: f64 },
    /// Switch motion at given times. Sorted by start time; the active spec
    /// is the last one whose start is `<= t`.
    Segmented {
        segments: Vec<(f64, Box<MotionSpec>)>,
    },
}

/// A beacon carried by a walking person.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Walker {
    pub tag_id: TagId,
    /// True state [px, py, vx, vy] in the map frame
    pub state: [f64; 4],
    pub motion: MotionSpec,
    /// No readings before this time
    pub appear_at: Option<f64>,
    /// No readings from this time on
    pub disappear_at: Option<f64>,
}

impl Walker {
    pub fn new(tag_id: u32, pos: [f64; 2], vel: [f64; 2], motion: MotionSpec) -> Self {
        Self {
            tag_id: TagId(tag_id),
            state: [pos[0], pos[1], vel[0], vel[1]],
            motion,
            appear_at: None,
            disappear_at: None,
        }
    }

    /// Propagate the true state by `dt` seconds.
    pub fn step(&mut self, t: f64, dt: f64) {
        let motion = self.motion.clone();
        propagate(&mut self.state, &motion, t, dt);
    }

    pub fn is_active(&self, t: f64) -> bool {
        if self.appear_at.is_some_and(|appear| t < appear) {
            return false;
        }
        if self.disappear_at.is_some_and(|gone| t >= gone) {
            return false;
        }
        true
    }

    pub fn position(&self) -> (f64, f64) {
        (self.state[0], self.state[1])
    }
}

fn propagate(s: &mut [f64; 4], motion: &MotionSpec, t: f64, dt: f64) {
    match motion {
        MotionSpec::Stationary => {
            s[2] = 0.0;
            s[3] = 0.0;
        }
        MotionSpec::ConstantVelocity => {
            s[0] += s[2] * dt;
            s[1] += s[3] * dt;
        }
        MotionSpec::ConstantTurn { omega } => {
            let v = s[2].hypot(s[3]);
            let heading = s[3].atan2(s[2]);
            let new_heading = heading + omega * dt;
            s[0] += v * heading.cos() * dt;
            s[1] += v * heading.sin() * dt;
            s[2] = v * new_heading.cos();
            s[3] = v * new_heading.sin();
        }
        MotionSpec::Segmented { segments } => {
            match segments.iter().filter(|(start, _)| *start <= t).last() {
                Some((_, spec)) => propagate(s, spec, t, dt),
                None => {
                    s[0] += s[2] * dt;
                    s[1] += s[3] * dt;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Robot
// ---------------------------------------------------------------------------

/// Unicycle robot: forward `speed` (m/s) and `yaw_rate` (rad/s).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RobotPath {
    pub pose: RobotPose,
    pub speed: f64,
    pub yaw_rate: f64,
}

impl RobotPath {
    pub fn parked(x: f64, y: f64, yaw: f64) -> Self {
        Self {
            pose: RobotPose::new(x, y, yaw),
            speed: 0.0,
            yaw_rate: 0.0,
        }
    }

    /// Advance by `dt`. Yaw stays within [-π, π] so it is never mistaken
    /// for degrees downstream.
    pub fn step(&mut self, dt: f64) {
        let (sin, cos) = self.pose.yaw.sin_cos();
        self.pose.x += self.speed * cos * dt;
        self.pose.y += self.speed * sin * dt;
        self.pose.yaw = transform_heading(self.pose.yaw, self.yaw_rate * dt);
    }
}
