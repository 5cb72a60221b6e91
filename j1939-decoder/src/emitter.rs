//! Message emission
//!
//! Builds the uniform [`J1939Message`] output record from either a
//! single-frame PGN passed through untouched or a completed transport
//! session, so downstream consumers need not distinguish transport-layer
//! reassembly from direct frames.

use crate::id::J1939Id;
use crate::transport::{SessionKey, TransportSession};
use crate::types::{CanFrame, J1939Message};

/// Wrap a non-transport frame as an output record, unchanged
pub(crate) fn passthrough(frame: &CanFrame, id: &J1939Id) -> J1939Message {
    J1939Message {
        source_address: id.source_address,
        destination_address: id.destination_address,
        pgn: id.pgn,
        length: frame.data.len(),
        data: frame.data.clone(),
        timestamp: frame.timestamp,
    }
}

/// Build the output record for a completed session
///
/// `timestamp` is the completing frame's timestamp; the payload is the
/// fragment concatenation truncated to the declared message length.
pub(crate) fn assembled(
    key: &SessionKey,
    session: &TransportSession,
    timestamp: f64,
) -> J1939Message {
    let data = session.assemble();
    J1939Message {
        source_address: key.source,
        destination_address: key.destination,
        pgn: session.pgn,
        length: data.len(),
        data,
        timestamp,
    }
}
