//! Format-independent front end: raw serial chunks in, decoded events out.

use serde::{Deserialize, Serialize};

use crate::ascii::{AsciiDecoder, AsciiEvent, AsciiStats, DEFAULT_MAX_LINE_LEN};
use crate::binary::{BinaryDecoder, BinaryStats};
use crate::error::DecodeError;
use crate::types::{LinkState, Measurement, RawChunk, TagId};

/// Which wire format the anchor is emitting.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// Fixed 33-byte `0x55` frames.
    Binary,
    /// DS-TWR responder log lines.
    #[default]
    Ascii,
}

/// What to do with binary frames whose checksum does not match.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumPolicy {
    /// Drop the frame before it reaches the filter.
    #[default]
    Enforce,
    /// Deliver it anyway; it is still counted as invalid.
    Ignore,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub format: WireFormat,
    pub checksum_policy: ChecksumPolicy,
    /// Tag id for ASCII peers that carry no numeric id, and for disconnects.
    pub default_tag_id: u32,
    /// Longest ASCII line buffered before it is discarded.
    pub max_ascii_line_len: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            format: WireFormat::Ascii,
            checksum_policy: ChecksumPolicy::Enforce,
            default_tag_id: 1,
            max_ascii_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }
}

/// Output of [`StreamDecoder::decode`].
#[derive(Clone, Debug, PartialEq)]
pub enum DecodedEvent {
    /// A reading. `checksum_ok` is always true for ASCII input.
    Measurement {
        measurement: Measurement,
        checksum_ok: bool,
    },
    /// Radio link lost; carries the zero reading.
    Disconnected(Measurement),
    /// A frame or record that was decoded but not delivered.
    Discarded(DecodeError),
}

/// Combined counters of whichever sub-decoder is active.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderStats {
    pub binary: BinaryStats,
    pub ascii: AsciiStats,
}

#[derive(Debug)]
enum Inner {
    Binary(BinaryDecoder),
    Ascii(AsciiDecoder),
}

/// Owns the sub-decoder for the configured format.
#[derive(Debug)]
pub struct StreamDecoder {
    config: DecoderConfig,
    inner: Inner,
}

impl StreamDecoder {
    pub fn new(config: DecoderConfig) -> Self {
        let inner = match config.format {
            WireFormat::Binary => Inner::Binary(BinaryDecoder::new()),
            WireFormat::Ascii => Inner::Ascii(
                AsciiDecoder::new(TagId(config.default_tag_id))
                    .with_max_line_len(config.max_ascii_line_len),
            ),
        };
        Self { config, inner }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Decode one chunk. Readings are stamped with the chunk arrival time.
    pub fn decode(&mut self, chunk: &RawChunk) -> Vec<DecodedEvent> {
        let now = chunk.arrived_at;
        match &mut self.inner {
            Inner::Binary(dec) => {
                let policy = self.config.checksum_policy;
                dec.feed(&chunk.bytes)
                    .into_iter()
                    .map(|frame| match (frame.verify(), policy) {
                        (Err(err), ChecksumPolicy::Enforce) => DecodedEvent::Discarded(err),
                        (checked, _) => DecodedEvent::Measurement {
                            measurement: frame.to_measurement(now),
                            checksum_ok: checked.is_ok(),
                        },
                    })
                    .collect()
            }
            Inner::Ascii(dec) => dec
                .feed_bytes(&chunk.bytes, now)
                .into_iter()
                .map(|event| match event {
                    AsciiEvent::Reading(r) => DecodedEvent::Measurement {
                        measurement: r.measurement,
                        checksum_ok: true,
                    },
                    AsciiEvent::Disconnected(m) => DecodedEvent::Disconnected(m),
                    AsciiEvent::Abandoned(err) => DecodedEvent::Discarded(err),
                })
                .collect(),
        }
    }

    /// Link state as reported by the ASCII log. Binary frames carry no link
    /// information, so a binary stream reports `Connected` once a valid frame
    /// has been seen.
    pub fn link_state(&self) -> LinkState {
        match &self.inner {
            Inner::Ascii(dec) => dec.link_state(),
            Inner::Binary(dec) => {
                let s = dec.stats();
                if s.frames_decoded > s.checksum_failures {
                    LinkState::Connected
                } else {
                    LinkState::Unknown
                }
            }
        }
    }

    pub fn stats(&self) -> DecoderStats {
        match &self.inner {
            Inner::Binary(dec) => DecoderStats {
                binary: dec.stats(),
                ..DecoderStats::default()
            },
            Inner::Ascii(dec) => DecoderStats {
                ascii: dec.stats(),
                ..DecoderStats::default()
            },
        }
    }

    pub fn reset(&mut self) {
        match &mut self.inner {
            Inner::Binary(dec) => dec.reset(),
            Inner::Ascii(dec) => dec.reset(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::{AnchorInfo, BinaryFrame, TagInfo};
    use approx::assert_abs_diff_eq;

    fn frame_bytes(tag_id: u8, distance_mm: i32, angle_centideg: i16) -> [u8; 33] {
        let anchor = AnchorInfo {
            role: 1,
            anchor_id: 0,
            local_time: 0,
            system_time: 0,
            voltage_mv: 3_300,
        };
        let tag = TagInfo {
            tag_id,
            distance_mm,
            angle_centideg,
            fp_db: -80,
            rx_db: -78,
        };
        BinaryFrame::new(1, anchor, tag).encode()
    }

    fn binary(policy: ChecksumPolicy) -> StreamDecoder {
        StreamDecoder::new(DecoderConfig {
            format: WireFormat::Binary,
            checksum_policy: policy,
            ..DecoderConfig::default()
        })
    }

    #[test]
    fn binary_chunk_yields_measurements() {
        let mut dec = binary(ChecksumPolicy::Enforce);
        let events = dec.decode(&RawChunk::new(frame_bytes(2, 5_000, 1_000).to_vec(), 3.0));

        assert_eq!(events.len(), 1);
        match &events[0] {
            DecodedEvent::Measurement {
                measurement,
                checksum_ok,
            } => {
                assert!(checksum_ok);
                assert_eq!(measurement.tag_id, TagId(2));
                assert_abs_diff_eq!(measurement.distance_m, 5.0, epsilon = 1e-12);
                assert_abs_diff_eq!(measurement.angle_deg, 10.0, epsilon = 1e-12);
                assert_eq!(measurement.timestamp, 3.0);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(dec.link_state(), LinkState::Connected);
    }

    #[test]
    fn checksum_policy_decides_delivery() {
        let mut bytes = frame_bytes(1, 1_000, 0);
        bytes[32] = bytes[32].wrapping_add(3);

        let mut enforce = binary(ChecksumPolicy::Enforce);
        let events = enforce.decode(&RawChunk::new(bytes.to_vec(), 0.0));
        assert!(matches!(
            events[0],
            DecodedEvent::Discarded(DecodeError::ChecksumMismatch { .. })
        ));

        let mut ignore = binary(ChecksumPolicy::Ignore);
        let events = ignore.decode(&RawChunk::new(bytes.to_vec(), 0.0));
        assert!(matches!(
            events[0],
            DecodedEvent::Measurement {
                checksum_ok: false,
                ..
            }
        ));
        assert_eq!(ignore.stats().binary.checksum_failures, 1);
    }

    #[test]
    fn ascii_is_the_default_format() {
        let mut dec = StreamDecoder::new(DecoderConfig::default());
        let text = "Custom DS-TWR Responder SEQ NUM 1\nRSSI: -70dBm, SNR: 8dB\n\
                    Peer 0x02, Distance 150cm, PDoA Azimuth 12\nUWB RX fail\n";
        let events = dec.decode(&RawChunk::new(text.as_bytes().to_vec(), 7.0));

        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            DecodedEvent::Measurement { measurement, .. } if measurement.tag_id == TagId(2)
        ));
        assert!(matches!(&events[1], DecodedEvent::Disconnected(m) if m.tag_id == TagId(1)));
        assert_eq!(dec.link_state(), LinkState::Disconnected);
        assert_eq!(dec.stats().ascii.records_completed, 1);
    }

    #[test]
    fn partial_config_uses_defaults() {
        let cfg: DecoderConfig = serde_json::from_str(r#"{"format": "binary"}"#).unwrap();
        assert_eq!(cfg.format, WireFormat::Binary);
        assert_eq!(cfg.checksum_policy, ChecksumPolicy::Enforce);
        assert_eq!(cfg.default_tag_id, 1);
    }

    #[test]
    fn ascii_line_limit_comes_from_config() {
        let mut dec = StreamDecoder::new(DecoderConfig {
            max_ascii_line_len: 64,
            ..DecoderConfig::default()
        });
        assert!(dec.decode(&RawChunk::new(vec![0xAA; 100], 0.0)).is_empty());
        assert_eq!(dec.stats().ascii.lines_overflowed, 1);
    }
}
