//! SML Protocol Constants
//!
//! This module defines constants used in the SML implementation, based on
//! BSI TR-03109-1 (SML transport v1) and the OBIS identification system
//! (IEC 62056-61).

use crate::payload::obis::ObisCode;

// ----------------------------------------------------------------------------
// Transport layer
// ----------------------------------------------------------------------------

/// Escape word used by the transport layer
pub const SML_ESCAPE: [u8; 4] = [0x1B, 0x1B, 0x1B, 0x1B];

/// Word following an escape word at the start of a frame
pub const SML_START_TAIL: [u8; 4] = [0x01, 0x01, 0x01, 0x01];

/// Full start sequence
pub const SML_START: [u8; 8] = [0x1B, 0x1B, 0x1B, 0x1B, 0x01, 0x01, 0x01, 0x01];

/// First byte of the word following an escape word at the end of a frame
pub const SML_END_MARKER: u8 = 0x1A;

/// Transport words are 4 bytes; payloads are padded to a multiple of this
pub const SML_WORD_LEN: usize = 4;

/// Upper bound for a single frame before the assembler gives up on it
pub const SML_MAX_FRAME_LEN: usize = 16 * 1024;

// ----------------------------------------------------------------------------
// Value encoding
// ----------------------------------------------------------------------------

/// TL byte: another TL byte follows
pub const SML_TL_MORE: u8 = 0x80;
/// TL byte: type bits
pub const SML_TL_TYPE_MASK: u8 = 0x70;
/// TL byte: length nibble
pub const SML_TL_LEN_MASK: u8 = 0x0F;

pub const SML_TYPE_OCTETS: u8 = 0x0;
pub const SML_TYPE_BOOL: u8 = 0x4;
pub const SML_TYPE_INT: u8 = 0x5;
pub const SML_TYPE_UINT: u8 = 0x6;
pub const SML_TYPE_LIST: u8 = 0x7;

/// Maximum list nesting accepted by the value parser
pub const SML_MAX_DEPTH: usize = 16;

// Message body tags
pub const SML_MSG_OPEN_RES: u64 = 0x0101;
pub const SML_MSG_CLOSE_RES: u64 = 0x0201;
pub const SML_MSG_GET_LIST_RES: u64 = 0x0701;

// DLMS unit codes seen in list entries
pub const SML_UNIT_WATT: u8 = 27;
pub const SML_UNIT_WATT_HOUR: u8 = 30;

// ----------------------------------------------------------------------------
// OBIS codes (group F is ignored when matching)
// ----------------------------------------------------------------------------

/// Instantaneous active power, sum over all phases
pub const OBIS_POWER: ObisCode = ObisCode::new(1, 0, 16, 7, 0, 255);
/// Cumulative energy drawn from the grid
pub const OBIS_ENERGY_FORWARD: ObisCode = ObisCode::new(1, 0, 1, 8, 0, 255);
/// Cumulative energy fed into the grid (bidirectional meters)
pub const OBIS_ENERGY_REVERSE: ObisCode = ObisCode::new(1, 0, 2, 8, 0, 255);
/// Manufacturer identification
pub const OBIS_MANUFACTURER: ObisCode = ObisCode::new(129, 129, 199, 130, 3, 255);
/// Server id / device serial number
pub const OBIS_SERVER_ID: ObisCode = ObisCode::new(1, 0, 0, 0, 9, 255);

// ----------------------------------------------------------------------------
// Polling defaults
// ----------------------------------------------------------------------------

pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_TICK_PERIOD_MS: u64 = 500;
/// Meters push roughly one frame per second, sometimes slower
pub const DEFAULT_CYCLE_DEADLINE_MS: u64 = 6000;
pub const DEFAULT_IDLE_WAIT_MS: u64 = 20;
pub const DEFAULT_FAILURE_CEILING: u32 = 5;
pub const DEFAULT_NOMINAL_VOLTAGE: f64 = 230.0;
