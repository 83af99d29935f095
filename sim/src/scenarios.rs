//! Scenario definitions.
//!
//! Each scenario is a named set of walkers, a robot path and anchor
//! characteristics. All scenarios are deterministic given the same seed.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use uwb_protocol::{RawChunk, WireFormat};

use crate::anchor_sim::{AnchorParams, AnchorSimulator};
use crate::replay::{Capture, PoseSample};
use crate::target::{MotionSpec, RobotPath, Walker};
use crate::wire::WireEncoder;

/// Which pre-defined scenario to load.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum ScenarioKind {
    /// One beacon walking across in front of a parked robot
    Walkby,
    /// Robot driving and turning with a beacon walking ahead of it
    Patrol,
    /// Three beacons, one of which leaves mid-run
    MultiTag,
    /// The walk-by with mirror glitches and radio dropouts
    Glitchy,
}

/// A fully configured simulation scenario.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub seed: u64,
    /// Seconds
    pub duration: f64,
    /// Simulation step (s)
    pub sim_dt: f64,
    pub walkers: Vec<Walker>,
    pub robot: RobotPath,
    pub anchor: AnchorParams,
}

impl Scenario {
    /// Build the named scenario. Uses `seed` for repeatability.
    pub fn build(kind: ScenarioKind, seed: u64) -> Self {
        match kind {
            ScenarioKind::Walkby => Self::walkby(seed),
            ScenarioKind::Patrol => Self::patrol(seed),
            ScenarioKind::MultiTag => Self::multi_tag(seed),
            ScenarioKind::Glitchy => Self::glitchy(seed),
        }
    }

    fn walkby(seed: u64) -> Self {
        Scenario {
            name: "walkby".into(),
            seed,
            duration: 10.0,
            sim_dt: 0.02,
            walkers: vec![Walker::new(1, [4.0, 2.5], [0.0, -0.5], MotionSpec::ConstantVelocity)],
            robot: RobotPath::parked(0.0, 0.0, 0.0),
            anchor: AnchorParams::default(),
        }
    }

    fn patrol(seed: u64) -> Self {
        Scenario {
            name: "patrol".into(),
            seed,
            duration: 20.0,
            sim_dt: 0.02,
            walkers: vec![Walker::new(1, [4.0, 0.0], [0.3, 0.0], MotionSpec::ConstantVelocity)],
            robot: RobotPath {
                pose: beacon_core::RobotPose::new(0.0, 0.0, 0.0),
                speed: 0.3,
                yaw_rate: 0.03,
            },
            anchor: AnchorParams::default(),
        }
    }

    fn multi_tag(seed: u64) -> Self {
        let mut leaver = Walker::new(3, [6.0, 3.0], [-0.2, -0.2], MotionSpec::ConstantVelocity);
        leaver.appear_at = Some(5.0);
        leaver.disappear_at = Some(12.0);

        Scenario {
            name: "multi_tag".into(),
            seed,
            duration: 20.0,
            sim_dt: 0.02,
            walkers: vec![
                Walker::new(1, [3.0, 1.0], [0.2, -0.1], MotionSpec::ConstantVelocity),
                // 1.5 m circle around (5, 0)
                Walker::new(2, [5.0, -1.5], [0.6, 0.0], MotionSpec::ConstantTurn { omega: 0.4 }),
                leaver,
            ],
            robot: RobotPath::parked(0.0, 0.0, 0.0),
            anchor: AnchorParams::default(),
        }
    }

    fn glitchy(seed: u64) -> Self {
        Scenario {
            name: "glitchy".into(),
            anchor: AnchorParams {
                p_mirror: 0.1,
                p_rx_fail: 0.05,
                ..AnchorParams::default()
            },
            ..Self::walkby(seed)
        }
    }

    /// Run the scenario and record what a serial port would have delivered.
    ///
    /// Each scan becomes one or two chunks (split at a random byte) so that
    /// decoders see records straddling reads.
    pub fn run(&self, format: WireFormat) -> Capture {
        let mut walkers = self.walkers.clone();
        let mut robot = self.robot.clone();
        let mut anchor = AnchorSimulator::new(self.anchor.clone(), self.seed);
        let mut split_rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(1));
        let mut encoder = WireEncoder::new(format);
        let mut capture = Capture::new(format);

        let steps = (self.duration / self.sim_dt).round() as usize;
        for i in 0..steps {
            let t = i as f64 * self.sim_dt;

            if let Some(scan) = anchor.scan(&walkers, &robot.pose, t) {
                capture.poses.push(PoseSample {
                    time: t,
                    pose: robot.pose,
                });
                capture.truth.extend(scan.truth);

                let mut bytes = encoder.encode(&scan.readings);
                if bytes.len() > 1 && split_rng.gen::<f64>() < 0.5 {
                    let at = split_rng.gen_range(1..bytes.len());
                    let tail = bytes.split_off(at);
                    capture.chunks.push(RawChunk::new(bytes, t));
                    capture.chunks.push(RawChunk::new(tail, t));
                } else if !bytes.is_empty() {
                    capture.chunks.push(RawChunk::new(bytes, t));
                }
            }

            for w in &mut walkers {
                w.step(t, self.sim_dt);
            }
            robot.step(self.sim_dt);
        }

        capture
    }
}
