//! AOA anchor simulator.
//!
//! Samples every active walker at a fixed rate from the robot's point of
//! view and produces noisy range/bearing readings with:
//! - uniform range and bearing noise
//! - front/back mirror glitches (bearing replaced by `180° − θ`)
//! - `UWB RX fail` dropouts
//! - range and field-of-view limits

use beacon_core::{wrap_angle_deg, RobotPose};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use uwb_protocol::{Measurement, TagId};

use crate::target::Walker;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnchorParams {
    /// Readings per second
    pub rate_hz: f64,
    /// Range noise standard deviation (m)
    pub distance_noise_std: f64,
    /// Bearing noise standard deviation (deg)
    pub angle_noise_std_deg: f64,
    pub max_range: f64,
    /// Half field of view around the forward axis (deg)
    pub fov_half_deg: f64,
    /// Probability that a reading carries the mirrored bearing
    pub p_mirror: f64,
    /// Probability that a scan is lost with `UWB RX fail`
    pub p_rx_fail: f64,
}

impl Default for AnchorParams {
    fn default() -> Self {
        Self {
            rate_hz: 10.0,
            distance_noise_std: 0.05,
            angle_noise_std_deg: 2.0,
            max_range: 30.0,
            fov_half_deg: 90.0,
            p_mirror: 0.0,
            p_rx_fail: 0.0,
        }
    }
}

/// What the anchor reported for one walker at one scan.
#[derive(Clone, Debug, PartialEq)]
pub enum SimReading {
    Reading(Measurement),
    RxFail { timestamp: f64 },
}

/// True position of a walker at a scan, in both frames.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TruthSample {
    pub tag_id: TagId,
    pub time: f64,
    pub global: [f64; 2],
    pub local: [f64; 2],
}

#[derive(Clone, Debug, Default)]
pub struct AnchorScan {
    pub time: f64,
    pub readings: Vec<SimReading>,
    pub truth: Vec<TruthSample>,
}

/// Map-frame point → anchor frame (`x` right, `y` forward).
pub fn to_local(global_x: f64, global_y: f64, pose: &RobotPose) -> (f64, f64) {
    let (sin, cos) = pose.yaw_radians().sin_cos();
    let dx = global_x - pose.x;
    let dy = global_y - pose.y;
    (dx * sin - dy * cos, dx * cos + dy * sin)
}

/// Anchor-frame point → (range m, bearing deg positive to the left).
pub fn to_polar(local_x: f64, local_y: f64) -> (f64, f64) {
    (local_x.hypot(local_y), (-local_x).atan2(local_y).to_degrees())
}

pub struct AnchorSimulator {
    pub params: AnchorParams,
    rng: ChaCha8Rng,
    next_scan_time: f64,
}

impl AnchorSimulator {
    pub fn new(params: AnchorParams, seed: u64) -> Self {
        Self {
            params,
            rng: ChaCha8Rng::seed_from_u64(seed),
            next_scan_time: 0.0,
        }
    }

    pub fn should_scan(&self, t: f64) -> bool {
        t + 1e-9 >= self.next_scan_time
    }

    fn advance_schedule(&mut self) {
        self.next_scan_time += 1.0 / self.params.rate_hz.max(1e-3);
    }

    /// Zero-mean uniform noise with standard deviation `std`.
    fn noise(&mut self, std: f64) -> f64 {
        (self.rng.gen::<f64>() * 2.0 - 1.0) * std * 3f64.sqrt()
    }

    /// Scan all walkers if one is due at `sim_time`.
    pub fn scan(&mut self, walkers: &[Walker], pose: &RobotPose, sim_time: f64) -> Option<AnchorScan> {
        if !self.should_scan(sim_time) {
            return None;
        }
        self.advance_schedule();

        let mut scan = AnchorScan {
            time: sim_time,
            ..Default::default()
        };

        if self.rng.gen::<f64>() < self.params.p_rx_fail {
            scan.readings.push(SimReading::RxFail { timestamp: sim_time });
            return Some(scan);
        }

        for walker in walkers {
            if !walker.is_active(sim_time) {
                continue;
            }
            let (gx, gy) = walker.position();
            let (lx, ly) = to_local(gx, gy, pose);
            let (distance, angle) = to_polar(lx, ly);
            if distance > self.params.max_range || angle.abs() > self.params.fov_half_deg {
                continue;
            }

            scan.truth.push(TruthSample {
                tag_id: walker.tag_id,
                time: sim_time,
                global: [gx, gy],
                local: [lx, ly],
            });

            let noisy_distance = (distance + self.noise(self.params.distance_noise_std)).max(0.01);
            let mut noisy_angle = angle + self.noise(self.params.angle_noise_std_deg);
            if self.rng.gen::<f64>() < self.params.p_mirror {
                noisy_angle = wrap_angle_deg(180.0 - noisy_angle);
            }

            scan.readings.push(SimReading::Reading(Measurement {
                tag_id: walker.tag_id,
                distance_m: noisy_distance,
                angle_deg: noisy_angle,
                timestamp: sim_time,
            }));
        }

        Some(scan)
    }
}
