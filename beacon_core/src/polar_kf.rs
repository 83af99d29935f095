//! Single-target Kalman filter in the anchor's native (range, bearing) space.
//!
//! ## State vector
//! x = [d, θ, ḓ, θ̇]ᵀ  (m, deg, m/s, deg/s)
//!
//! ## CV transition model
//! F = I₄ + dt · [[0₂ I₂]; [0₂ 0₂]]
//!
//! ## Noise
//! Q = q · diag(1, 1, 2, 2), R = r · I₂. Both are constant per step.
//!
//! Filtering in polar space keeps the noise model faithful to the sensor and
//! makes the ±180° wrap a one-line fix on the innovation.
//!
//! Two safeguards sit on top of the textbook filter:
//! - **Angle-jump gate**: AOA front ends occasionally report the mirror
//!   bearing. A raw bearing that moves more than `angle_jump_threshold_deg`
//!   within `stale_reset_sec` of the last accepted one is rejected.
//! - **Speed clamp**: a tag carried by a person cannot exceed
//!   `max_human_speed`; faster velocity estimates are scaled down and
//!   penalise the confidence.

use nalgebra::{Matrix2, Matrix2x4, Matrix4, Vector2, Vector4};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{FilterStatus, FilteredPosition, TagId};

/// 4-state polar vector: [distance, angle, v_distance, v_angle]
pub type PolarState = Vector4<f64>;

/// 4×4 state covariance
pub type PolarCov = Matrix4<f64>;

const INITIAL_COVARIANCE: f64 = 10.0;
const INITIAL_CONFIDENCE: f64 = 0.5;
const PREDICT_CONFIDENCE_DECAY: f64 = 0.98;
const REJECT_CONFIDENCE_DECAY: f64 = 0.95;
/// Innovation scales used to normalise the confidence error term.
const DISTANCE_ERROR_SCALE_M: f64 = 1.0;
const ANGLE_ERROR_SCALE_DEG: f64 = 30.0;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Error, PartialEq)]
pub enum FilterError {
    /// S = H·P·Hᵀ + R could not be inverted.
    #[error("innovation covariance is singular (det = {det})")]
    SingularInnovation { det: f64 },

    #[error("measurement is not finite: distance {distance}, angle {angle}")]
    NonFiniteMeasurement { distance: f64, angle: f64 },
}

// ---------------------------------------------------------------------------
// Angle helpers
// ---------------------------------------------------------------------------

/// Wrap an angle in degrees into (-180, 180].
///
/// Values already in range are returned untouched, so wrapping twice never
/// moves an angle.
pub fn wrap_angle_deg(angle: f64) -> f64 {
    if angle > -180.0 && angle <= 180.0 {
        return angle;
    }
    let r = angle.rem_euclid(360.0);
    if r > 180.0 {
        r - 360.0
    } else {
        r
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PolarKfConfig {
    /// Diagonal process noise (velocity terms are doubled).
    pub process_noise: f64,
    /// Diagonal measurement noise for (d, θ).
    pub measurement_noise: f64,
    /// Lower bound of the confidence once the filter is running.
    pub min_confidence: f64,
    /// Plausible upper bound on tag speed (m/s).
    pub max_human_speed: f64,
    /// Largest bearing change accepted between close samples (deg).
    pub angle_jump_threshold_deg: f64,
    /// Gap after which any bearing is accepted again (s).
    pub stale_reset_sec: f64,
}

impl Default for PolarKfConfig {
    fn default() -> Self {
        Self {
            process_noise: 0.1,
            measurement_noise: 0.5,
            min_confidence: 0.3,
            max_human_speed: 5.0, // running pace
            angle_jump_threshold_deg: 90.0,
            stale_reset_sec: 0.8,
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Read-only view of a filter, safe to hand to other threads.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSnapshot {
    pub initialized: bool,
    pub distance: f64,
    pub angle: f64,
    pub v_distance: f64,
    pub v_angle: f64,
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    pub speed: f64,
    pub confidence: f64,
    pub update_count: u64,
    pub last_update_time: Option<f64>,
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct PolarKalmanFilter {
    pub config: PolarKfConfig,
    state: PolarState,
    cov: PolarCov,
    q: PolarCov,
    r: Matrix2<f64>,
    initialized: bool,
    confidence: f64,
    update_count: u64,
    last_update_time: Option<f64>,
    /// Last raw bearing that passed the jump gate, and when.
    last_raw_angle: Option<f64>,
    last_raw_time: Option<f64>,
}

impl PolarKalmanFilter {
    pub fn new(config: PolarKfConfig) -> Self {
        let mut q = PolarCov::identity() * config.process_noise;
        q[(2, 2)] *= 2.0;
        q[(3, 3)] *= 2.0;
        let r = Matrix2::identity() * config.measurement_noise;
        Self {
            config,
            state: PolarState::zeros(),
            cov: PolarCov::identity() * INITIAL_COVARIANCE,
            q,
            r,
            initialized: false,
            confidence: 0.0,
            update_count: 0,
            last_update_time: None,
            last_raw_angle: None,
            last_raw_time: None,
        }
    }

    /// Build the CV transition matrix for timestep `dt`.
    pub fn transition_matrix(dt: f64) -> PolarCov {
        let mut f = PolarCov::identity();
        f[(0, 2)] = dt;
        f[(1, 3)] = dt;
        f
    }

    fn observation_matrix() -> Matrix2x4<f64> {
        let mut h = Matrix2x4::zeros();
        h[(0, 0)] = 1.0;
        h[(1, 1)] = 1.0;
        h
    }

    /// Seed the state from a first sample.
    pub fn initialize(&mut self, distance: f64, angle_deg: f64, timestamp: f64) {
        self.state = PolarState::new(distance, wrap_angle_deg(angle_deg), 0.0, 0.0);
        self.cov = PolarCov::identity() * INITIAL_COVARIANCE;
        self.confidence = INITIAL_CONFIDENCE;
        self.initialized = true;
        self.last_update_time = Some(timestamp);
        self.last_raw_angle = Some(angle_deg);
        self.last_raw_time = Some(timestamp);
        tracing::debug!(distance, angle_deg, "polar filter initialized");
    }

    /// Propagate state and covariance forward by `dt` seconds.
    pub fn predict(&mut self, dt: f64) {
        let f = Self::transition_matrix(dt);
        self.state = f * self.state;
        self.state[1] = wrap_angle_deg(self.state[1]);
        self.cov = f * self.cov * f.transpose() + self.q;
        self.confidence = (self.confidence * PREDICT_CONFIDENCE_DECAY).max(self.config.min_confidence);
    }

    /// Fuse one (distance, angle) observation.
    ///
    /// Returns the innovation on success. On a singular innovation
    /// covariance the state is left untouched.
    pub fn update(&mut self, distance: f64, angle_deg: f64) -> Result<Vector2<f64>, FilterError> {
        let h = Self::observation_matrix();
        let z = Vector2::new(distance, angle_deg);

        // Innovation: ν = z − H·x, bearing wrapped
        let mut innovation = z - h * self.state;
        innovation[1] = wrap_angle_deg(innovation[1]);

        // Innovation covariance: S = H·P·Hᵀ + R
        let s = h * self.cov * h.transpose() + self.r;
        let det = s.determinant();
        if !det.is_finite() || det.abs() <= f64::EPSILON {
            return Err(FilterError::SingularInnovation { det });
        }
        let s_inv = s
            .try_inverse()
            .ok_or(FilterError::SingularInnovation { det })?;

        // Kalman gain: K = P·Hᵀ·S⁻¹
        let k = self.cov * h.transpose() * s_inv;

        self.state += k * innovation;
        self.state[1] = wrap_angle_deg(self.state[1]);
        self.cov = (PolarCov::identity() - k * h) * self.cov;

        let speed_penalty = self.clamp_speed();

        let error = (innovation[0].abs() / DISTANCE_ERROR_SCALE_M
            + innovation[1].abs() / ANGLE_ERROR_SCALE_DEG)
            / 2.0
            + speed_penalty;
        let instant = 1.0 / (1.0 + 2.0 * error);
        self.confidence = (0.9 * self.confidence + 0.1 * instant).clamp(self.config.min_confidence, 1.0);

        Ok(innovation)
    }

    /// Scale (ḓ, θ̇) down if the implied Cartesian speed exceeds
    /// `max_human_speed`. Returns the confidence penalty.
    fn clamp_speed(&mut self) -> f64 {
        let speed = self.cartesian_speed();
        let max = self.config.max_human_speed;
        if max <= 0.0 || speed.is_nan() || speed <= max {
            return 0.0;
        }
        let ratio = speed / max;
        let scale = max / speed;
        self.state[2] *= scale;
        self.state[3] *= scale;
        tracing::debug!(speed, max, "velocity estimate clamped");
        ((ratio - 1.0) * 0.5).min(1.0)
    }

    fn cartesian_speed(&self) -> f64 {
        let (vx, vy) = self.cartesian_velocity();
        vx.hypot(vy)
    }

    /// Position in the anchor frame: (x right, y forward).
    pub fn cartesian_position(&self) -> (f64, f64) {
        let (d, theta) = (self.state[0], self.state[1].to_radians());
        (-d * theta.sin(), d * theta.cos())
    }

    /// Time derivative of [`cartesian_position`](Self::cartesian_position).
    pub fn cartesian_velocity(&self) -> (f64, f64) {
        let d = self.state[0];
        let theta = self.state[1].to_radians();
        let d_dot = self.state[2];
        let theta_dot = self.state[3].to_radians();
        let (sin, cos) = theta.sin_cos();
        (
            -d_dot * sin - d * cos * theta_dot,
            d_dot * cos - d * sin * theta_dot,
        )
    }

    /// True if `angle_deg` jumps too far from the last accepted raw bearing.
    fn is_angle_jump(&self, angle_deg: f64, timestamp: f64) -> bool {
        let (Some(last_angle), Some(last_time)) = (self.last_raw_angle, self.last_raw_time) else {
            return false;
        };
        if timestamp - last_time >= self.config.stale_reset_sec {
            return false;
        }
        let delta = wrap_angle_deg(angle_deg - last_angle);
        delta.abs() > self.config.angle_jump_threshold_deg
    }

    /// Run one full cycle (initialize, or predict + gate + update) and
    /// report what happened.
    pub fn filter_measurement(
        &mut self,
        distance: f64,
        angle_deg: f64,
        timestamp: f64,
    ) -> Result<FilterStatus, FilterError> {
        if !distance.is_finite() || !angle_deg.is_finite() {
            return Err(FilterError::NonFiniteMeasurement {
                distance,
                angle: angle_deg,
            });
        }

        if !self.initialized {
            self.initialize(distance, angle_deg, timestamp);
            return Ok(FilterStatus::Initialized);
        }

        let dt = self.last_update_time.map_or(0.0, |t| timestamp - t);
        if dt > 0.0 {
            self.predict(dt);
        }

        if self.is_angle_jump(angle_deg, timestamp) {
            self.last_update_time = Some(timestamp);
            self.confidence =
                (self.confidence * REJECT_CONFIDENCE_DECAY).max(self.config.min_confidence);
            tracing::debug!(angle_deg, last = ?self.last_raw_angle, "bearing jump rejected");
            return Ok(FilterStatus::RejectedAngleJump);
        }

        match self.update(distance, angle_deg) {
            Ok(_) => {
                self.last_update_time = Some(timestamp);
                self.last_raw_time = Some(timestamp);
                self.last_raw_angle = Some(angle_deg);
                self.update_count += 1;
                Ok(FilterStatus::Filtered)
            }
            Err(FilterError::SingularInnovation { det }) => {
                tracing::warn!(det, "singular innovation covariance, update skipped");
                self.last_update_time = Some(timestamp);
                Ok(FilterStatus::Predicted)
            }
            Err(other) => Err(other),
        }
    }

    /// Package the current estimate as a [`FilteredPosition`].
    pub fn position(&self, tag_id: TagId, status: FilterStatus, timestamp: f64) -> FilteredPosition {
        let (x, y) = self.cartesian_position();
        let (vx, vy) = self.cartesian_velocity();
        FilteredPosition {
            tag_id,
            x,
            y,
            distance: self.state[0],
            angle: self.state[1],
            vx,
            vy,
            confidence: self.confidence,
            status,
            timestamp,
        }
    }

    pub fn get_current_state(&self) -> FilterSnapshot {
        if !self.initialized {
            return FilterSnapshot::default();
        }
        let (x, y) = self.cartesian_position();
        let (vx, vy) = self.cartesian_velocity();
        FilterSnapshot {
            initialized: true,
            distance: self.state[0],
            angle: self.state[1],
            v_distance: self.state[2],
            v_angle: self.state[3],
            x,
            y,
            vx,
            vy,
            speed: vx.hypot(vy),
            confidence: self.confidence,
            update_count: self.update_count,
            last_update_time: self.last_update_time,
        }
    }

    pub fn state(&self) -> &PolarState {
        &self.state
    }

    pub fn covariance(&self) -> &PolarCov {
        &self.cov
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn last_update_time(&self) -> Option<f64> {
        self.last_update_time
    }

    /// Forget everything; the next sample re-initializes.
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
