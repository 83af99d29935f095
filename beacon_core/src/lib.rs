//! `beacon_core`: Tracking of UWB beacon tags seen by an AOA anchor.
//!
//! # Module layout
//! - [`types`]      : Result types (filtered / global positions, robot pose)
//! - [`polar_kf`]   : Per-tag Kalman filter over (distance, bearing)
//! - [`filter_bank`]: One filter per tag, lazy creation, timeout eviction
//! - [`transform`]  : Anchor frame → map frame projection
//! - [`history`]    : Bounded snapshot history
//! - [`stats`]      : Running counters
//! - [`publish`]    : Published results and the consumer handle
//! - [`pipeline`]   : Decoder → filter bank → publish, single-threaded
//! - [`reader`]     : Byte sources and the serial reader loop
//! - [`runtime`]    : Reader + processor threads

pub mod filter_bank;
pub mod history;
pub mod pipeline;
pub mod polar_kf;
pub mod publish;
pub mod reader;
pub mod runtime;
pub mod stats;
pub mod transform;
pub mod types;

pub use filter_bank::{FilterBank, FilterBankConfig};
pub use history::Snapshot;
pub use pipeline::{Pipeline, PipelineConfig, PipelineOutput};
pub use polar_kf::{wrap_angle_deg, FilterError, FilterSnapshot, PolarKalmanFilter, PolarKfConfig};
pub use publish::PipelineHandle;
pub use reader::{ByteSource, MemorySource, ReaderConfig, ReaderError, SerialPortConfig, SerialSource};
pub use runtime::{PipelineService, RuntimeError, ServiceConfig};
pub use stats::PipelineStats;
pub use transform::{to_global, transform_heading, validate_robot_pose, TransformError};
pub use types::{FilterStatus, FilteredPosition, GlobalBeaconPosition, RobotPose};
