//! Candump capture record parsing
//!
//! Parses the Linux SocketCAN candump file format, one frame per line:
//!
//! ```text
//! (1661789611.150752) can1 18EC1C2A#10900015FF00EF01
//! ```
//!
//! The timestamp is a floating-point seconds value wrapped in parentheses,
//! the channel is an opaque token, and the frame body is the hexadecimal
//! arbitration id and payload joined by `#`. Some candump variants append a
//! direction marker (`T`/`R`) after the body; trailing tokens are ignored.
//!
//! A malformed record yields a [`ParseError`] and is skipped by the stream;
//! it is never fatal.

use crate::types::{CanFrame, ParseError};

/// Parse one candump record into a [`CanFrame`]
///
/// # Example
/// ```
/// use j1939_decoder::parse_record;
///
/// let frame = parse_record("(1661789611.150752) can1 18EC1C2A#10900015FF00EF01").unwrap();
/// assert_eq!(frame.channel, "can1");
/// assert_eq!(frame.can_id, 0x18EC1C2A);
/// assert_eq!(frame.data.len(), 8);
/// ```
pub fn parse_record(line: &str) -> Result<CanFrame, ParseError> {
    let mut fields = line.split_whitespace();
    let timestamp_field = fields
        .next()
        .ok_or_else(|| ParseError::MissingFields(line.to_string()))?;
    let channel = fields
        .next()
        .ok_or_else(|| ParseError::MissingFields(line.to_string()))?;
    let body = fields
        .next()
        .ok_or_else(|| ParseError::MissingFields(line.to_string()))?;
    // Anything after the body is a candump direction marker; ignore it.

    let timestamp_text = timestamp_field
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .ok_or_else(|| ParseError::UndelimitedTimestamp(timestamp_field.to_string()))?;
    let timestamp: f64 = timestamp_text
        .parse()
        .map_err(|_| ParseError::BadTimestamp(timestamp_text.to_string()))?;

    let (id_text, payload_text) = body
        .split_once('#')
        .ok_or_else(|| ParseError::MissingPayloadSeparator(body.to_string()))?;
    let can_id = u32::from_str_radix(id_text, 16)
        .map_err(|_| ParseError::BadArbitrationId(id_text.to_string()))?;

    let data = decode_hex(payload_text)?;
    if data.len() > 8 {
        return Err(ParseError::PayloadTooLong(data.len()));
    }

    Ok(CanFrame {
        timestamp,
        channel: channel.to_string(),
        can_id,
        data,
    })
}

/// Decode an even-length hex string into bytes
///
/// Works on the raw bytes rather than string slices: a payload containing
/// multi-byte characters is a malformed record, not a slicing hazard.
fn decode_hex(text: &str) -> Result<Vec<u8>, ParseError> {
    if text.len() % 2 != 0 {
        return Err(ParseError::BadPayload(text.to_string()));
    }
    text.as_bytes()
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|p| u8::from_str_radix(p, 16).ok())
                .ok_or_else(|| ParseError::BadPayload(text.to_string()))
        })
        .collect()
}
