//! # Utility Modules
//!
//! Hex encoding helpers and logging patterns shared by the transport and
//! polling layers.

pub mod hex;
pub mod logging;

pub use hex::{decode_hex, encode_hex, format_hex_compact, HexError};
pub use logging::{log_frame_hex, LogThrottle};
