//! Extract an engine speed time series from a candump capture
//!
//! A downstream-consumer demonstration: replays a capture, filters the EEC1
//! message (PGN 61444) from the engine controller at source address 0x00,
//! and converts SPN 190 to engineering units. Works identically for native
//! single-frame EEC1 and for any multi-frame traffic in the capture, since
//! the decoder emits one uniform record shape for both.
//!
//! Usage:
//!   cargo run --example engine_speed -- <capture.log>

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use byteorder::{ByteOrder, LittleEndian};
use j1939_decoder::Decoder;

const PGN_EEC1: u32 = 61444;
const ENGINE_SA: u8 = 0x00;

// SPN 190 Engine Speed: 2 bytes at offset 3, 0.125 rpm/bit, no offset
const SPN190_OFFSET_BYTES: usize = 3;
const SPN190_SCALE: f64 = 0.125;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <capture.log>", args[0]);
        std::process::exit(1);
    }
    let capture = PathBuf::from(&args[1]);

    let decoder = Decoder::new();
    let mut source_census: HashMap<u8, usize> = HashMap::new();
    let mut samples = 0usize;

    println!("time_s,engine_rpm");
    for result in decoder.decode_file(&capture)? {
        let message = match result {
            Ok(message) => message,
            Err(e) => {
                log::warn!("skipping: {}", e);
                continue;
            }
        };
        *source_census.entry(message.source_address).or_insert(0) += 1;

        if message.pgn != PGN_EEC1 || message.source_address != ENGINE_SA {
            continue;
        }
        if message.data.len() < SPN190_OFFSET_BYTES + 2 {
            continue;
        }
        let raw = LittleEndian::read_u16(&message.data[SPN190_OFFSET_BYTES..SPN190_OFFSET_BYTES + 2]);
        let rpm = raw as f64 * SPN190_SCALE;
        println!("{:.6},{:.3}", message.timestamp, rpm);
        samples += 1;
    }

    eprintln!("\n{} engine speed samples", samples);
    eprintln!("messages per source address:");
    let mut sources: Vec<_> = source_census.into_iter().collect();
    sources.sort_by_key(|(sa, _)| *sa);
    for (sa, count) in sources {
        eprintln!("  {:#04X}: {}", sa, count);
    }

    Ok(())
}
