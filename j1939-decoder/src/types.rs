//! Core types for the J1939 decoder library
//!
//! This module defines the frame and message types the decoder works with and
//! the error taxonomy it reports. The decoder is a stream processor: no
//! condition defined here is fatal, a malformed record or protocol anomaly
//! costs one frame (or one session) and the stream continues.

use serde::{Deserialize, Serialize};

/// Result type for decoder operations
pub type Result<T> = std::result::Result<T, DecoderError>;

/// Raw CAN frame as read from a candump capture
///
/// This represents a single CAN frame before any J1939 identifier decoding
/// or transport-layer interpretation. Immutable once parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct CanFrame {
    /// Capture timestamp in seconds, as recorded by the capture source
    pub timestamp: f64,
    /// CAN channel name (e.g., "can0", "can1"); informational only
    pub channel: String,
    /// 29-bit CAN arbitration identifier
    pub can_id: u32,
    /// Frame data bytes (0-8 bytes)
    pub data: Vec<u8>,
}

impl CanFrame {
    /// Get the data length code (DLC) - number of data bytes
    pub fn dlc(&self) -> usize {
        self.data.len()
    }
}

/// Uniform output record of the decoder
///
/// Carries either a single-frame message passed through untouched or a
/// multi-frame message reassembled by the transport session manager.
/// Downstream consumers need not distinguish the two: the shape is identical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct J1939Message {
    /// Source address of the sending node
    pub source_address: u8,
    /// Destination address (0xFF = global/broadcast)
    pub destination_address: u8,
    /// 18-bit Parameter Group Number
    pub pgn: u32,
    /// Message length in bytes; equals `data.len()`
    pub length: usize,
    /// Message payload. For reassembled messages this is the fragment
    /// concatenation truncated to the declared message length.
    pub data: Vec<u8>,
    /// Timestamp of the frame that produced this message. For reassembled
    /// messages this is the completing TP.DT frame's timestamp.
    pub timestamp: f64,
}

/// Errors that can occur during decoding
///
/// Every variant is recoverable: the decoding stream yields the error for
/// the offending record and moves on to the next one.
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    #[error("malformed capture record: {0}")]
    Parse(#[from] ParseError),

    #[error("protocol anomaly: {0}")]
    Anomaly(#[from] ProtocolAnomaly),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A capture record that does not match the candump shape
/// `(<float-seconds>) <channel> <hex-id>#<hex-payload>`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("record has too few fields: {0:?}")]
    MissingFields(String),

    #[error("timestamp is not wrapped in parentheses: {0:?}")]
    UndelimitedTimestamp(String),

    #[error("timestamp is not a number: {0:?}")]
    BadTimestamp(String),

    #[error("missing '#' between arbitration id and payload: {0:?}")]
    MissingPayloadSeparator(String),

    #[error("arbitration id is not hexadecimal: {0:?}")]
    BadArbitrationId(String),

    #[error("payload is not an even-length hex string: {0:?}")]
    BadPayload(String),

    #[error("payload is {0} bytes, classic CAN carries at most 8")]
    PayloadTooLong(usize),
}

/// A well-formed frame that violates the transport protocol
///
/// Anomalies never mutate session state: the offending frame is dropped and
/// any live session for the key is left exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolAnomaly {
    #[error("TP.CM_CTS from {sa:#04X} to {da:#04X} without an open session")]
    CtsWithoutSession { sa: u8, da: u8 },

    #[error("TP.DT from {sa:#04X} to {da:#04X} without a prior TP.CM_RTS or TP.CM_BAM")]
    DataWithoutSession { sa: u8, da: u8 },

    #[error("TP.DT from {sa:#04X} to {da:#04X} sequence number {seq} outside 1..={total}")]
    SequenceOutOfRange { sa: u8, da: u8, seq: u8, total: u8 },

    #[error("TP.DT from {sa:#04X} to {da:#04X} fragment {seq} carries {len} bytes, {expected} required")]
    ShortDataChunk {
        sa: u8,
        da: u8,
        seq: u8,
        len: usize,
        expected: usize,
    },

    #[error("reserved TP.CM control byte {control:#04X} from {sa:#04X} to {da:#04X}")]
    ReservedControlByte { sa: u8, da: u8, control: u8 },

    #[error("transport frame from {sa:#04X} to {da:#04X} has a {len}-byte payload")]
    ShortTransportPayload { sa: u8, da: u8, len: usize },
}
