//! J1939 Decoder Library
//!
//! A stateless-API, reusable library for decoding SAE J1939 traffic from
//! candump capture files: splits 29-bit arbitration identifiers into J1939
//! fields and reassembles multi-frame Transport Protocol (TP) messages
//! carried by the RTS/CTS handshake or the BAM broadcast mode.
//!
//! # Architecture
//!
//! This library is intentionally minimal and focused on decoding:
//! - Parses candump capture records into CAN frames
//! - Derives priority, PGN and source/destination address per frame
//! - Reconstructs multi-frame TP.CM/TP.DT transfers, keyed per node pair
//! - Emits a uniform message record for single-frame and reassembled
//!   messages alike
//!
//! The library does NOT:
//! - Talk to a physical CAN bus
//! - Negotiate addresses or answer diagnostic requests
//! - Extract engineering-unit signals (see `examples/engine_speed.rs` for
//!   how a downstream consumer does this)
//!
//! # Example Usage
//!
//! ```no_run
//! use j1939_decoder::{Decoder, DecoderConfig};
//! use std::path::Path;
//!
//! let config = DecoderConfig::new()
//!     .with_channel_filter(vec!["can1".to_string()])
//!     .with_session_idle_timeout(30.0);
//! let decoder = Decoder::with_config(config);
//!
//! let messages = decoder.decode_file(Path::new("capture.log")).unwrap();
//! for message in messages {
//!     match message {
//!         Ok(msg) => println!("pgn {:#07X}: {} bytes", msg.pgn, msg.length),
//!         Err(e) => eprintln!("decode error: {}", e),
//!     }
//! }
//! ```

// Public modules
pub mod config;
pub mod decoder;
pub mod types;

// Re-export main types for convenience
pub use candump::parse_record;
pub use config::DecoderConfig;
pub use decoder::{Decoder, DecodingIterator};
pub use id::{J1939Id, GLOBAL_ADDRESS};
pub use transport::{
    ControlMessage, SessionKey, SessionStatus, SessionStore, TransferMode, TransportManager,
    TransportSession, PGN_TP_CM, PGN_TP_DT,
};
pub use types::{CanFrame, DecoderError, J1939Message, ParseError, ProtocolAnomaly, Result};

// Internal modules (selected types re-exported above)
mod candump;
mod emitter;
mod id;
mod transport;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
