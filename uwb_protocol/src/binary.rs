//! Fixed-length binary frame emitted by the AOA anchor (`0x55` protocol).
//!
//! # Frame layout (33 bytes, little-endian)
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0       1     Header 0x55
//! 1       1     Function code
//! 4       1     Anchor role
//! 5       1     Anchor id
//! 6       4     Anchor local time (u32)
//! 10      4     Anchor system time (u32)
//! 18      2     Anchor supply voltage, mV (u16)
//! 22      1     Tag id
//! 23      3     Distance, mm (i24, sign-extended)
//! 26      2     Angle, 1/100 degree (i16)
//! 28      1     First-path power, dB (i8)
//! 29      1     Received power, dB (i8)
//! 32      1     Checksum = sum(bytes[0..32]) & 0xFF
//! ```
//!
//! Bytes 2-3, 14-17, 20-21 and 30-31 are reserved.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::types::{Measurement, TagId};

/// First byte of every frame.
pub const FRAME_HEADER: u8 = 0x55;
/// Total frame length including header and checksum.
pub const FRAME_LEN: usize = 33;
const CHECKSUM_OFFSET: usize = 32;

/// Anchor block of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorInfo {
    pub role: u8,
    pub anchor_id: u8,
    pub local_time: u32,
    pub system_time: u32,
    pub voltage_mv: u16,
}

/// Tag block of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagInfo {
    pub tag_id: u8,
    pub distance_mm: i32,
    pub angle_centideg: i16,
    pub fp_db: i8,
    pub rx_db: i8,
}

/// A decoded frame. `is_valid` records the checksum outcome; the frame is
/// returned either way so the caller can pick its own policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryFrame {
    pub header: u8,
    pub function_code: u8,
    pub anchor: AnchorInfo,
    pub tag: TagInfo,
    pub checksum: u8,
    /// Checksum recomputed over the received payload.
    pub computed_checksum: u8,
    pub is_valid: bool,
}

/// Sum of the first 32 bytes, truncated to 8 bits.
pub fn frame_checksum(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .take(CHECKSUM_OFFSET)
        .fold(0u8, |acc, b| acc.wrapping_add(*b))
}

impl BinaryFrame {
    /// Decode one frame from the start of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < FRAME_LEN {
            return Err(DecodeError::InsufficientData {
                needed: FRAME_LEN,
                got: bytes.len(),
            });
        }
        if bytes[0] != FRAME_HEADER {
            return Err(DecodeError::InvalidHeader {
                expected: FRAME_HEADER,
                got: bytes[0],
            });
        }

        let anchor = AnchorInfo {
            role: bytes[4],
            anchor_id: bytes[5],
            local_time: LittleEndian::read_u32(&bytes[6..10]),
            system_time: LittleEndian::read_u32(&bytes[10..14]),
            voltage_mv: LittleEndian::read_u16(&bytes[18..20]),
        };
        let tag = TagInfo {
            tag_id: bytes[22],
            distance_mm: LittleEndian::read_i24(&bytes[23..26]),
            angle_centideg: LittleEndian::read_i16(&bytes[26..28]),
            fp_db: bytes[28] as i8,
            rx_db: bytes[29] as i8,
        };
        let checksum = bytes[CHECKSUM_OFFSET];
        let computed_checksum = frame_checksum(bytes);

        Ok(Self {
            header: bytes[0],
            function_code: bytes[1],
            anchor,
            tag,
            checksum,
            computed_checksum,
            is_valid: computed_checksum == checksum,
        })
    }

    /// Build a frame whose checksum matches its content.
    pub fn new(function_code: u8, anchor: AnchorInfo, tag: TagInfo) -> Self {
        let mut frame = Self {
            header: FRAME_HEADER,
            function_code,
            anchor,
            tag,
            checksum: 0,
            computed_checksum: 0,
            is_valid: true,
        };
        let checksum = frame_checksum(&frame.encode());
        frame.checksum = checksum;
        frame.computed_checksum = checksum;
        frame
    }

    /// Serialize to wire bytes. The carried `checksum` is written as is.
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut buf = [0u8; FRAME_LEN];
        buf[0] = self.header;
        buf[1] = self.function_code;
        buf[4] = self.anchor.role;
        buf[5] = self.anchor.anchor_id;
        LittleEndian::write_u32(&mut buf[6..10], self.anchor.local_time);
        LittleEndian::write_u32(&mut buf[10..14], self.anchor.system_time);
        LittleEndian::write_u16(&mut buf[18..20], self.anchor.voltage_mv);
        buf[22] = self.tag.tag_id;
        LittleEndian::write_i24(&mut buf[23..26], self.tag.distance_mm);
        LittleEndian::write_i16(&mut buf[26..28], self.tag.angle_centideg);
        buf[28] = self.tag.fp_db as u8;
        buf[29] = self.tag.rx_db as u8;
        buf[CHECKSUM_OFFSET] = self.checksum;
        buf
    }

    /// `Ok` if the carried checksum matches the payload.
    pub fn verify(&self) -> Result<(), DecodeError> {
        if self.is_valid {
            Ok(())
        } else {
            Err(DecodeError::ChecksumMismatch {
                carried: self.checksum,
                computed: self.computed_checksum,
            })
        }
    }

    pub fn tag_id(&self) -> TagId {
        TagId(u32::from(self.tag.tag_id))
    }

    pub fn distance_m(&self) -> f64 {
        f64::from(self.tag.distance_mm) / 1000.0
    }

    pub fn angle_deg(&self) -> f64 {
        f64::from(self.tag.angle_centideg) / 100.0
    }

    /// Convert to the format-independent reading consumed by the filter.
    pub fn to_measurement(&self, timestamp: f64) -> Measurement {
        Measurement {
            tag_id: self.tag_id(),
            distance_m: self.distance_m(),
            angle_deg: self.angle_deg(),
            timestamp,
        }
    }
}

/// Scan a byte stream for complete frames.
///
/// Every header-aligned 33-byte window is decoded and emitted regardless of
/// its checksum, and the scan continues after it. Non-header bytes are
/// skipped one at a time. The unconsumed tail (always shorter than one frame)
/// is returned for the next call.
pub fn parse_stream(data: &[u8]) -> (Vec<BinaryFrame>, &[u8]) {
    let mut frames = Vec::new();
    let mut offset = 0;

    while offset + FRAME_LEN <= data.len() {
        if data[offset] != FRAME_HEADER {
            offset += 1;
            continue;
        }
        match BinaryFrame::decode(&data[offset..offset + FRAME_LEN]) {
            Ok(frame) => {
                frames.push(frame);
                offset += FRAME_LEN;
            }
            Err(_) => offset += 1,
        }
    }

    (frames, &data[offset..])
}

/// Cumulative counters of a [`BinaryDecoder`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryStats {
    pub frames_decoded: u64,
    pub checksum_failures: u64,
}

/// Stateful wrapper around [`parse_stream`] that carries the partial tail
/// between serial reads.
#[derive(Debug, Default)]
pub struct BinaryDecoder {
    buffer: Vec<u8>,
    stats: BinaryStats,
}

impl BinaryDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` to the pending bytes and return every complete frame.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<BinaryFrame> {
        self.buffer.extend_from_slice(chunk);
        let (frames, remaining) = parse_stream(&self.buffer);
        let consumed = self.buffer.len() - remaining.len();
        self.buffer.drain(..consumed);

        self.stats.frames_decoded += frames.len() as u64;
        let failures = frames.iter().filter(|f| !f.is_valid).count() as u64;
        if failures > 0 {
            tracing::debug!(failures, "binary frames failed checksum");
        }
        self.stats.checksum_failures += failures;
        frames
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> BinaryStats {
        self.stats
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.stats = BinaryStats::default();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
