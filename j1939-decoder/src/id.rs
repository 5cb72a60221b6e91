//! J1939 identifier decoding
//!
//! Splits a 29-bit CAN arbitration identifier into the J1939 fields defined
//! by SAE J1939-21: priority, PDU format, Parameter Group Number, source and
//! destination address. Decoding is a pure function with no failure mode;
//! every 29-bit value maps to a well-formed identifier.

const PRIORITY_MASK: u32 = 0x1C00_0000;
const PDU_FORMAT_MASK: u32 = 0x00FF_0000;
const PDU_SPECIFIC_MASK: u32 = 0x0000_FF00;
const SOURCE_ADDRESS_MASK: u32 = 0x0000_00FF;
// PDU1 PGNs exclude the destination byte; both masks keep the data-page bits.
const PDU1_PGN_MASK: u32 = 0x03FF_0000;
const PDU2_PGN_MASK: u32 = 0x03FF_FF00;

const PRIORITY_OFFSET: u32 = 26;
const PDU_FORMAT_OFFSET: u32 = 16;
const DESTINATION_OFFSET: u32 = 8;
const PGN_OFFSET: u32 = 8;

/// PDU format values below this use PDU1 (destination-specific) addressing
const PDU2_THRESHOLD: u8 = 240;

/// The J1939 global (broadcast) address
pub const GLOBAL_ADDRESS: u8 = 0xFF;

/// Decoded J1939 identifier fields
///
/// Derived fresh from each frame's arbitration id and never stored by the
/// engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct J1939Id {
    /// Message priority, 0 (highest) to 7
    pub priority: u8,
    /// PDU format field; < 240 selects PDU1 addressing, >= 240 selects PDU2
    pub pdu_format: u8,
    /// 18-bit Parameter Group Number
    pub pgn: u32,
    /// Source address of the sending node
    pub source_address: u8,
    /// Destination address; 0xFF for PDU2 (always broadcast)
    pub destination_address: u8,
}

impl J1939Id {
    /// Decode a 29-bit arbitration identifier
    ///
    /// PDU1 (PDU format < 240): the PDU-specific byte is the destination
    /// address and is cleared from the PGN. PDU2 (PDU format >= 240): the
    /// PDU-specific byte is part of the PGN and the destination is global.
    ///
    /// Callers must pass a value that fits in 29 bits; higher bits are
    /// masked off by the field extraction.
    pub fn from_can_id(can_id: u32) -> Self {
        let priority = ((can_id & PRIORITY_MASK) >> PRIORITY_OFFSET) as u8;
        let pdu_format = ((can_id & PDU_FORMAT_MASK) >> PDU_FORMAT_OFFSET) as u8;
        let source_address = (can_id & SOURCE_ADDRESS_MASK) as u8;

        let (pgn, destination_address) = if pdu_format < PDU2_THRESHOLD {
            (
                (can_id & PDU1_PGN_MASK) >> PGN_OFFSET,
                ((can_id & PDU_SPECIFIC_MASK) >> DESTINATION_OFFSET) as u8,
            )
        } else {
            ((can_id & PDU2_PGN_MASK) >> PGN_OFFSET, GLOBAL_ADDRESS)
        };

        Self {
            priority,
            pdu_format,
            pgn,
            source_address,
            destination_address,
        }
    }

    /// True if this message is addressed to the global address
    pub fn is_broadcast(&self) -> bool {
        self.destination_address == GLOBAL_ADDRESS
    }
}
