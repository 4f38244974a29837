//! # Hex Encoding/Decoding Utilities
//!
//! Hex helpers for SML frame dumps, server ids and golden test frames.
//!
//! ```rust
//! use sml_gridmeter::util::hex::{decode_hex, encode_hex, format_hex_compact};
//!
//! let start = decode_hex("1B1B1B1B 01010101").unwrap();
//! assert_eq!(encode_hex(&start), "1b1b1b1b01010101");
//! assert_eq!(format_hex_compact(&start[..2]), "1b 1b");
//! ```

use thiserror::Error;

/// Why a hex dump could not be parsed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HexError {
    #[error("Odd number of hex characters: {0}")]
    OddLength(usize),

    #[error("Empty hex string")]
    EmptyString,

    #[error("Hex decoding error: {0}")]
    DecodeError(String),
}

/// Lowercase hex, as used in log messages.
pub fn encode_hex(data: &[u8]) -> String {
    hex::encode(data)
}

/// Parses a hex dump such as `"1B1B1B1B 01010101"`. Case is ignored and
/// whitespace (including line breaks of multi-line captures) is skipped.
pub fn decode_hex(hex_str: &str) -> Result<Vec<u8>, HexError> {
    let cleaned: String = hex_str.chars().filter(|c| !c.is_whitespace()).collect();

    if cleaned.is_empty() {
        return Err(HexError::EmptyString);
    }
    if cleaned.len() % 2 != 0 {
        return Err(HexError::OddLength(cleaned.len()));
    }

    hex::decode(&cleaned).map_err(|e| HexError::DecodeError(e.to_string()))
}

/// Space separated bytes, `"1b 1b 1b 1b"`.
pub fn format_hex_compact(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
