//! Types shared by every decoder and by the tracking core.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Identifier of a beacon tag. Binary frames carry it as a single byte,
/// ASCII logs as a peer string.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TagId(pub u32);

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Measurement
// ---------------------------------------------------------------------------

/// One range + bearing reading of a tag, independent of the wire format it
/// arrived in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub tag_id: TagId,
    /// Range to the tag (meters). Positive for real readings.
    pub distance_m: f64,
    /// Bearing from the anchor forward axis, positive toward the left (degrees).
    pub angle_deg: f64,
    /// Arrival time (seconds since the Unix epoch, or a replay clock)
    pub timestamp: f64,
}

impl Measurement {
    /// Zero reading emitted when the anchor reports a lost radio link.
    pub fn disconnected(tag_id: TagId, timestamp: f64) -> Self {
        Self {
            tag_id,
            distance_m: 0.0,
            angle_deg: 0.0,
            timestamp,
        }
    }

    /// True if this reading can be fed to a filter.
    pub fn is_usable(&self) -> bool {
        self.distance_m.is_finite() && self.distance_m > 0.0 && self.angle_deg.is_finite()
    }
}

/// Radio link state as reported by the anchor log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    #[default]
    Unknown,
    Connected,
    Disconnected,
}

// ---------------------------------------------------------------------------
// RawChunk
// ---------------------------------------------------------------------------

/// Bytes delivered by one serial read.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawChunk {
    pub bytes: Vec<u8>,
    /// Arrival time in seconds
    pub arrived_at: f64,
}

impl RawChunk {
    pub fn new(bytes: Vec<u8>, arrived_at: f64) -> Self {
        Self { bytes, arrived_at }
    }

    /// Stamp a chunk with the current wall-clock time.
    pub fn now(bytes: Vec<u8>) -> Self {
        Self::new(bytes, unix_time_secs())
    }
}

/// Wall-clock seconds since the Unix epoch.
pub fn unix_time_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
