//! Error types for anchor stream decoding.

use thiserror::Error;

/// Errors raised while decoding anchor output. All of them are recoverable:
/// the decoder resyncs and keeps going.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Not enough bytes to hold a complete frame.
    #[error("insufficient data: need {needed} bytes, got {got}")]
    InsufficientData { needed: usize, got: usize },

    /// The candidate frame does not start with the protocol header.
    #[error("invalid header: expected {expected:#04x}, got {got:#04x}")]
    InvalidHeader { expected: u8, got: u8 },

    /// The frame parsed structurally but its checksum does not match.
    #[error("checksum mismatch: frame carries {carried:#04x}, computed {computed:#04x}")]
    ChecksumMismatch { carried: u8, computed: u8 },

    /// An ASCII reading was superseded by a new sequence number before all
    /// of its fields arrived.
    #[error("incomplete reading for SEQ {seq}")]
    IncompleteRecord { seq: u32 },
}
