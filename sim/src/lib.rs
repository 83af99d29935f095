//! `sim`: synthetic UWB anchor streams (walking beacons seen from a moving
//! robot), wire encoding, named scenarios and capture replay.

pub mod anchor_sim;
pub mod metrics;
pub mod replay;
pub mod scenarios;
pub mod target;
pub mod wire;

pub use anchor_sim::{AnchorParams, AnchorSimulator, SimReading, TruthSample};
pub use metrics::TrackingMetrics;
pub use replay::{load_capture, replay_capture, save_capture, Capture, PoseSample, ReplayOutcome};
pub use scenarios::{Scenario, ScenarioKind};
pub use target::{MotionSpec, RobotPath, Walker};
pub use wire::WireEncoder;
