//! Main decoder API
//!
//! This module provides the primary interface for the decoder library.
//! The Decoder struct is the entry point: it turns a candump capture into a
//! lazy stream of [`J1939Message`] records, reassembling multi-frame
//! transport-protocol transfers along the way.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::candump;
use crate::config::DecoderConfig;
use crate::id::J1939Id;
use crate::transport::{is_transport_pgn, TransportManager};
use crate::types::{J1939Message, Result};

/// The main decoder struct - entry point for all decoding operations
#[derive(Debug, Default)]
pub struct Decoder {
    config: DecoderConfig,
}

impl Decoder {
    /// Create a new decoder instance with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a decoder with an explicit configuration
    pub fn with_config(config: DecoderConfig) -> Self {
        Self { config }
    }

    /// Decode an in-memory capture
    ///
    /// # Example
    /// ```
    /// use j1939_decoder::Decoder;
    ///
    /// let capture = "\
    ///     (1.0) can0 0CF00400#FFFF6813FFFFFFFF\n\
    ///     (2.0) can0 18FEE500#0102030405060708\n";
    /// let messages: Vec<_> = Decoder::new()
    ///     .decode_str(capture)
    ///     .filter_map(|m| m.ok())
    ///     .collect();
    /// assert_eq!(messages.len(), 2);
    /// assert_eq!(messages[0].pgn, 61444);
    /// ```
    pub fn decode_str<'a>(
        &self,
        input: &'a str,
    ) -> DecodingIterator<impl Iterator<Item = String> + 'a> {
        self.decode_lines(input.lines().map(str::to_string))
    }

    /// Decode a stream of capture records, one per item
    ///
    /// This is the lowest-level entry point: anything that yields lines in
    /// bus order (a file, a socket reader, a test fixture) can drive it.
    pub fn decode_lines<I>(&self, lines: I) -> DecodingIterator<I::IntoIter>
    where
        I: IntoIterator<Item = String>,
    {
        DecodingIterator {
            lines: lines.into_iter(),
            config: self.config.clone(),
            manager: TransportManager::new(),
        }
    }

    /// Decode a candump capture file
    ///
    /// Returns a lazy iterator over the decoded messages; the file is read
    /// as the iterator is consumed.
    pub fn decode_file(
        &self,
        path: &Path,
    ) -> Result<DecodingIterator<impl Iterator<Item = String>>> {
        log::info!("decoding capture file: {:?}", path);
        let file = File::open(path)?;
        let lines = BufReader::new(file).lines().filter_map(|line| match line {
            Ok(line) => Some(line),
            Err(e) => {
                log::warn!("failed to read capture line: {e}");
                None
            }
        });
        Ok(self.decode_lines(lines))
    }
}

/// Iterator that decodes capture records into J1939 messages
///
/// Each input record is parsed into a frame, its identifier decoded, and
/// the frame handed to the transport session manager. Parse errors and
/// protocol anomalies are yielded as `Err` items and cost exactly one
/// record; the stream always continues. Multi-frame messages appear in
/// completion order, not announcement order.
pub struct DecodingIterator<I> {
    lines: I,
    config: DecoderConfig,
    manager: TransportManager,
}

impl<I> DecodingIterator<I> {
    /// Number of transport sessions currently awaiting fragments
    pub fn open_sessions(&self) -> usize {
        self.manager.store().len()
    }
}

impl<I> Iterator for DecodingIterator<I>
where
    I: Iterator<Item = String>,
{
    type Item = Result<J1939Message>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.lines.next()?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let frame = match candump::parse_record(line) {
                Ok(frame) => frame,
                Err(e) => {
                    log::warn!("skipping malformed record: {e}");
                    return Some(Err(e.into()));
                }
            };
            if !self.config.should_process_channel(&frame.channel) {
                continue;
            }
            if let Some(timeout) = self.config.session_idle_timeout {
                self.manager.evict_idle(frame.timestamp, timeout);
            }

            let id = J1939Id::from_can_id(frame.can_id);
            match self.manager.handle_frame(&frame, &id) {
                Ok(Some(message)) => {
                    // A message from a non-transport PGN is a pass-through
                    // frame and subject to the pass-through toggle.
                    if !is_transport_pgn(id.pgn) && !self.config.passthrough_single_frames {
                        continue;
                    }
                    return Some(Ok(message));
                }
                Ok(None) => continue,
                Err(anomaly) => {
                    log::warn!("{anomaly}");
                    return Some(Err(anomaly.into()));
                }
            }
        }
    }
}
