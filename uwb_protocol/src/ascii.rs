//! ASCII log assembler for anchors running the DS-TWR responder firmware.
//!
//! One reading is spread over several log lines:
//!
//! ```text
//! Custom DS-TWR Responder SEQ NUM 1042
//! RSSI: -71dBm, SNR: 9dB
//! Peer AAA1, Distance 320cm, PDoA Azimuth -18 Elevation 0 Azimuth FoM 96
//! ```
//!
//! The assembler accumulates fields until the record is complete, then emits a
//! [`Measurement`]. `UWB RX fail` lines mark a lost radio link and produce a
//! zero reading, debounced to one per [`DISCONNECT_DEBOUNCE_SEC`].

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::types::{LinkState, Measurement, TagId};

/// Minimum spacing between two disconnect events while the link stays down.
pub const DISCONNECT_DEBOUNCE_SEC: f64 = 1.0;

/// Longest unterminated line held while waiting for its newline.
pub const DEFAULT_MAX_LINE_LEN: usize = 4096;

struct Patterns {
    seq: Regex,
    rssi: Regex,
    peer: Regex,
    rx_fail: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        seq: Regex::new(r"Custom\s+DS-TWR\s+Responder\s+SEQ\s+NUM\s+(\d+)").expect("static pattern"),
        rssi: Regex::new(r"RSSI:\s*(-?\d+)dBm,\s*SNR:\s*(\d+)dB").expect("static pattern"),
        peer: Regex::new(r"Peer\s+(\S+),\s*Distance\s+(\d+)cm,\s*PDoA\s+Azimuth\s+(-?\d+)")
            .expect("static pattern"),
        rx_fail: Regex::new(r"UWB RX fail").expect("static pattern"),
    })
}

/// Map a peer label to a tag id: `0x`-prefixed labels are hexadecimal,
/// anything else falls back to `default`.
pub fn peer_to_tag_id(peer: &str, default: TagId) -> TagId {
    peer.strip_prefix("0x")
        .or_else(|| peer.strip_prefix("0X"))
        .and_then(|hex| u32::from_str_radix(hex, 16).ok())
        .map(TagId)
        .unwrap_or(default)
}

// ---------------------------------------------------------------------------
// Records and events
// ---------------------------------------------------------------------------

/// Fields collected so far for the current sequence number.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AsciiRecord {
    pub seq: Option<u32>,
    pub rssi_dbm: Option<i32>,
    pub snr_db: Option<u32>,
    pub distance_m: Option<f64>,
    pub azimuth_deg: Option<f64>,
    pub peer: Option<String>,
}

impl AsciiRecord {
    fn has_payload(&self) -> bool {
        self.rssi_dbm.is_some() || self.distance_m.is_some()
    }
}

/// A complete reading with its link-quality fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AsciiReading {
    pub seq: u32,
    pub rssi_dbm: i32,
    pub snr_db: u32,
    pub peer: String,
    pub measurement: Measurement,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AsciiEvent {
    Reading(AsciiReading),
    /// Zero reading emitted on `UWB RX fail`.
    Disconnected(Measurement),
    /// A record was superseded before it completed.
    Abandoned(DecodeError),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsciiStats {
    pub records_completed: u64,
    pub records_abandoned: u64,
    pub disconnects: u64,
    pub lines_seen: u64,
    /// Partial lines dropped for exceeding the line length limit.
    pub lines_overflowed: u64,
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AsciiDecoder {
    default_tag_id: TagId,
    current: AsciiRecord,
    last_seq: Option<u32>,
    line_buffer: String,
    max_line_len: usize,
    /// Set after an overflow; input is dropped up to the next newline.
    skip_to_newline: bool,
    link_state: LinkState,
    last_disconnect: Option<f64>,
    stats: AsciiStats,
}

impl Default for AsciiDecoder {
    fn default() -> Self {
        Self::new(TagId(1))
    }
}

impl AsciiDecoder {
    pub fn new(default_tag_id: TagId) -> Self {
        Self {
            default_tag_id,
            current: AsciiRecord::default(),
            last_seq: None,
            line_buffer: String::new(),
            max_line_len: DEFAULT_MAX_LINE_LEN,
            skip_to_newline: false,
            link_state: LinkState::Unknown,
            last_disconnect: None,
            stats: AsciiStats::default(),
        }
    }

    pub fn with_max_line_len(mut self, max_line_len: usize) -> Self {
        self.max_line_len = max_line_len;
        self
    }

    /// Process one complete line. `now` stamps any reading it completes.
    pub fn feed_line(&mut self, line: &str, now: f64) -> Vec<AsciiEvent> {
        let line = line.trim();
        let mut events = Vec::new();
        if line.is_empty() {
            return events;
        }
        self.stats.lines_seen += 1;
        let p = patterns();

        if p.rx_fail.is_match(line) {
            if let Some(m) = self.on_rx_fail(now) {
                events.push(AsciiEvent::Disconnected(m));
            }
            return events;
        }

        if let Some(caps) = p.seq.captures(line) {
            // Digits only, so the parse can fail on overflow alone.
            let seq = caps[1].parse::<u32>().unwrap_or_else(|_| {
                tracing::debug!(raw = &caps[1], "ASCII sequence number out of range");
                u32::MAX
            });
            if self.current.has_payload() {
                let stale = self.current.seq.unwrap_or(seq);
                self.stats.records_abandoned += 1;
                tracing::debug!(seq = stale, "ASCII record abandoned before completion");
                events.push(AsciiEvent::Abandoned(DecodeError::IncompleteRecord {
                    seq: stale,
                }));
            }
            self.last_seq = Some(seq);
            self.current = AsciiRecord {
                seq: Some(seq),
                ..AsciiRecord::default()
            };
        }

        if let Some(c) = p.rssi.captures(line) {
            self.current.rssi_dbm = c[1].parse().ok();
            self.current.snr_db = c[2].parse().ok();
        }

        if let Some(c) = p.peer.captures(line) {
            self.current.peer = Some(c[1].to_string());
            self.current.distance_m = c[2].parse::<f64>().ok().map(|cm| cm / 100.0);
            self.current.azimuth_deg = c[3].parse::<f64>().ok();

            if let Some(reading) = self.take_complete(now) {
                events.push(AsciiEvent::Reading(reading));
            }
        }

        events
    }

    /// Split `text` on newlines, holding back a trailing partial line until
    /// the next call. A partial line longer than the configured limit is
    /// dropped along with the rest of that line.
    pub fn feed_text(&mut self, text: &str, now: f64) -> Vec<AsciiEvent> {
        let mut text = text;
        if self.skip_to_newline {
            let Some(newline) = text.find('\n') else {
                return Vec::new();
            };
            text = &text[newline + 1..];
            self.skip_to_newline = false;
        }

        self.line_buffer.push_str(text);
        let mut events = Vec::new();
        if let Some(last_newline) = self.line_buffer.rfind('\n') {
            let complete: String = self.line_buffer.drain(..=last_newline).collect();
            for line in complete.split('\n') {
                events.extend(self.feed_line(line, now));
            }
        }

        if self.line_buffer.len() > self.max_line_len {
            tracing::debug!(
                pending = self.line_buffer.len(),
                max = self.max_line_len,
                "ASCII line too long, discarding it"
            );
            self.line_buffer.clear();
            self.skip_to_newline = true;
            self.stats.lines_overflowed += 1;
        }
        events
    }

    /// Like [`feed_text`](Self::feed_text) for raw serial bytes; invalid
    /// UTF-8 is replaced rather than rejected.
    pub fn feed_bytes(&mut self, bytes: &[u8], now: f64) -> Vec<AsciiEvent> {
        let text = String::from_utf8_lossy(bytes);
        self.feed_text(&text, now)
    }

    fn on_rx_fail(&mut self, now: f64) -> Option<Measurement> {
        let debounced = self.link_state == LinkState::Disconnected
            && self
                .last_disconnect
                .is_some_and(|t| now - t <= DISCONNECT_DEBOUNCE_SEC);
        if debounced {
            return None;
        }
        if self.link_state != LinkState::Disconnected {
            tracing::info!(tag = %self.default_tag_id, "beacon link lost");
        }
        self.link_state = LinkState::Disconnected;
        self.last_disconnect = Some(now);
        self.stats.disconnects += 1;
        Some(Measurement::disconnected(self.default_tag_id, now))
    }

    fn take_complete(&mut self, now: f64) -> Option<AsciiReading> {
        let r = &self.current;
        let (Some(seq), Some(rssi_dbm), Some(snr_db), Some(distance_m), Some(angle_deg)) =
            (r.seq, r.rssi_dbm, r.snr_db, r.distance_m, r.azimuth_deg)
        else {
            return None;
        };
        let peer = r.peer.clone().unwrap_or_default();
        let tag_id = peer_to_tag_id(&peer, self.default_tag_id);

        if self.link_state != LinkState::Connected {
            tracing::info!(tag = %tag_id, "beacon link established");
        }
        self.link_state = LinkState::Connected;
        self.stats.records_completed += 1;
        self.current = AsciiRecord::default();

        Some(AsciiReading {
            seq,
            rssi_dbm,
            snr_db,
            peer,
            measurement: Measurement {
                tag_id,
                distance_m,
                angle_deg,
                timestamp: now,
            },
        })
    }

    pub fn link_state(&self) -> LinkState {
        self.link_state
    }

    pub fn last_seq(&self) -> Option<u32> {
        self.last_seq
    }

    /// Bytes of an unterminated line waiting for its newline.
    pub fn pending(&self) -> usize {
        self.line_buffer.len()
    }

    pub fn stats(&self) -> AsciiStats {
        self.stats
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.default_tag_id).with_max_line_len(self.max_line_len);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
