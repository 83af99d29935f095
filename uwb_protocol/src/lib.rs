//! Wire formats of the UWB AOA anchor.
//!
//! Two independent decoders share nothing but the [`Measurement`] type they
//! produce:
//! - [`binary`]: fixed 33-byte frames with an 8-bit additive checksum
//! - [`ascii`]: multi-line DS-TWR responder logs
//!
//! [`StreamDecoder`] picks one of them from a [`DecoderConfig`] and turns raw
//! serial chunks into [`DecodedEvent`]s.

pub mod ascii;
pub mod binary;
pub mod decoder;
pub mod error;
pub mod types;

pub use ascii::{AsciiDecoder, AsciiEvent, AsciiReading};
pub use binary::{parse_stream, BinaryDecoder, BinaryFrame, FRAME_HEADER, FRAME_LEN};
pub use decoder::{ChecksumPolicy, DecodedEvent, DecoderConfig, DecoderStats, StreamDecoder, WireFormat};
pub use error::DecodeError;
pub use types::{unix_time_secs, LinkState, Measurement, RawChunk, TagId};
