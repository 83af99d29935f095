//! Encode simulated readings the way an anchor puts them on the wire.

use uwb_protocol::binary::{AnchorInfo, BinaryFrame, TagInfo};
use uwb_protocol::{Measurement, WireFormat};

use crate::anchor_sim::SimReading;

/// Function code of a position report.
const POSITION_REPORT: u8 = 0x01;

/// Stateful encoder: keeps the ASCII sequence number and the anchor clock.
#[derive(Clone, Debug)]
pub struct WireEncoder {
    format: WireFormat,
    seq: u32,
    anchor_id: u8,
}

impl WireEncoder {
    pub fn new(format: WireFormat) -> Self {
        Self {
            format,
            seq: 0,
            anchor_id: 0,
        }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Bytes for a batch of readings.
    pub fn encode(&mut self, readings: &[SimReading]) -> Vec<u8> {
        let mut out = Vec::new();
        for reading in readings {
            match (self.format, reading) {
                (WireFormat::Binary, SimReading::Reading(m)) => {
                    out.extend_from_slice(&self.binary_frame(m).encode());
                }
                // Binary firmware has no link-loss report; the scan is just silent.
                (WireFormat::Binary, SimReading::RxFail { .. }) => {}
                (WireFormat::Ascii, SimReading::Reading(m)) => {
                    out.extend_from_slice(self.ascii_record(m).as_bytes());
                }
                (WireFormat::Ascii, SimReading::RxFail { .. }) => {
                    out.extend_from_slice(b"UWB RX fail\n");
                }
            }
        }
        out
    }

    fn binary_frame(&self, m: &Measurement) -> BinaryFrame {
        let millis = (m.timestamp * 1000.0) as u32;
        BinaryFrame::new(
            POSITION_REPORT,
            AnchorInfo {
                role: 1,
                anchor_id: self.anchor_id,
                local_time: millis,
                system_time: millis,
                voltage_mv: 3_300,
            },
            TagInfo {
                tag_id: m.tag_id.0 as u8,
                distance_mm: (m.distance_m * 1000.0).round() as i32,
                angle_centideg: (m.angle_deg * 100.0).round() as i16,
                fp_db: -80,
                rx_db: -78,
            },
        )
    }

    fn ascii_record(&mut self, m: &Measurement) -> String {
        self.seq = self.seq.wrapping_add(1);
        format!(
            "Custom DS-TWR Responder SEQ NUM {}\nRSSI: -72dBm, SNR: 9dB\n\
             Peer 0x{:X}, Distance {}cm, PDoA Azimuth {} Elevation 0 Azimuth FoM 96\n",
            self.seq,
            m.tag_id.0,
            (m.distance_m * 100.0).round() as i64,
            m.angle_deg.round() as i64,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use uwb_protocol::{AsciiDecoder, AsciiEvent, BinaryDecoder, TagId};

    fn reading(tag: u32, d: f64, a: f64) -> SimReading {
        SimReading::Reading(Measurement {
            tag_id: TagId(tag),
            distance_m: d,
            angle_deg: a,
            timestamp: 1.5,
        })
    }

    #[test]
    fn binary_frames_decode_back() {
        let mut enc = WireEncoder::new(WireFormat::Binary);
        let bytes = enc.encode(&[reading(3, 2.345, -12.34), SimReading::RxFail { timestamp: 1.5 }]);
        assert_eq!(bytes.len(), 33);

        let frames = BinaryDecoder::new().feed(&bytes);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_valid);
        assert_eq!(frames[0].tag_id(), TagId(3));
        assert_abs_diff_eq!(frames[0].distance_m(), 2.345, epsilon = 1e-9);
        assert_abs_diff_eq!(frames[0].angle_deg(), -12.34, epsilon = 1e-9);
    }

    #[test]
    fn ascii_records_decode_back() {
        let mut enc = WireEncoder::new(WireFormat::Ascii);
        let bytes = enc.encode(&[reading(0x2A, 3.204, 17.6), SimReading::RxFail { timestamp: 1.5 }]);

        let mut dec = AsciiDecoder::default();
        let events = dec.feed_bytes(&bytes, 1.5);
        assert_eq!(events.len(), 2);
        let AsciiEvent::Reading(r) = &events[0] else {
            panic!("expected a reading, got {:?}", events[0]);
        };
        assert_eq!(r.seq, 1);
        assert_eq!(r.measurement.tag_id, TagId(0x2A));
        assert_abs_diff_eq!(r.measurement.distance_m, 3.2, epsilon = 1e-9);
        assert_abs_diff_eq!(r.measurement.angle_deg, 18.0, epsilon = 1e-9);
        assert!(matches!(events[1], AsciiEvent::Disconnected(_)));
    }
}
