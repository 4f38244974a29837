//! OBIS object identifiers (IEC 62056-61).
//!
//! Every SML list entry is tagged with a six-group OBIS code `A-B:C.D.E*F`.
//! Group F (billing period / storage) varies between meters for the same
//! quantity, so lookups compare groups A to E only.

use std::fmt;

use crate::error::SmlError;

/// A six-byte OBIS code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObisCode([u8; 6]);

impl ObisCode {
    pub const fn new(a: u8, b: u8, c: u8, d: u8, e: u8, f: u8) -> Self {
        ObisCode([a, b, c, d, e, f])
    }

    pub fn bytes(&self) -> [u8; 6] {
        self.0
    }

    /// True if groups A..E are equal.
    pub fn same_quantity(&self, other: &ObisCode) -> bool {
        self.0[..5] == other.0[..5]
    }
}

impl TryFrom<&[u8]> for ObisCode {
    type Error = SmlError;

    fn try_from(raw: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; 6] = raw.try_into().map_err(|_| {
            SmlError::MalformedFrame(format!("OBIS code must be 6 bytes, got {}", raw.len()))
        })?;
        Ok(ObisCode(bytes))
    }
}

impl fmt::Display for ObisCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a}-{b}:{c}.{d}.{e}*{g}")
    }
}
