//! # SML Value Encoding
//!
//! SML messages are trees of type-length-value items. A TL byte carries a
//! 3-bit type and a 4-bit length nibble; bit 7 announces another TL byte that
//! contributes four more length bits. For scalar types the length counts the
//! TL bytes themselves, for lists it is the element count.
//!
//! `parse_value` decodes one item (recursively for lists) using `nom`;
//! `SmlValue::encode` is the inverse and is used to build frames for tests and
//! the mock serial port.

use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::number::complete::be_u8;
use nom::{Err as NomErr, IResult};

use crate::constants::{
    SML_MAX_DEPTH, SML_TL_LEN_MASK, SML_TL_MORE, SML_TL_TYPE_MASK, SML_TYPE_BOOL, SML_TYPE_INT,
    SML_TYPE_LIST, SML_TYPE_OCTETS, SML_TYPE_UINT,
};

/// One decoded SML item.
#[derive(Debug, Clone, PartialEq)]
pub enum SmlValue {
    /// `0x00`, terminates a message
    EndOfMessage,
    /// Optional field not set (empty octet string)
    Absent,
    Octets(Vec<u8>),
    Bool(bool),
    Int(i64),
    UInt(u64),
    List(Vec<SmlValue>),
}

impl SmlValue {
    pub fn as_list(&self) -> Option<&[SmlValue]> {
        match self {
            SmlValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_octets(&self) -> Option<&[u8]> {
        match self {
            SmlValue::Octets(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Integer value of either signedness, if it fits in an i128.
    pub fn as_integer(&self) -> Option<i128> {
        match self {
            SmlValue::Int(v) => Some(i128::from(*v)),
            SmlValue::UInt(v) => Some(i128::from(*v)),
            _ => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, SmlValue::Absent)
    }

    /// Appends the wire encoding of this value to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            SmlValue::EndOfMessage => out.push(0x00),
            SmlValue::Absent => out.push(0x01),
            SmlValue::Octets(bytes) => {
                write_scalar_tl(SML_TYPE_OCTETS, bytes.len(), out);
                out.extend_from_slice(bytes);
            }
            SmlValue::Bool(b) => {
                write_scalar_tl(SML_TYPE_BOOL, 1, out);
                out.push(u8::from(*b));
            }
            SmlValue::Int(v) => {
                let width = signed_width(*v);
                write_scalar_tl(SML_TYPE_INT, width, out);
                out.extend_from_slice(&v.to_be_bytes()[8 - width..]);
            }
            SmlValue::UInt(v) => {
                let width = unsigned_width(*v);
                write_scalar_tl(SML_TYPE_UINT, width, out);
                out.extend_from_slice(&v.to_be_bytes()[8 - width..]);
            }
            SmlValue::List(items) => {
                write_tl(SML_TYPE_LIST, items.len(), nibbles_for(items.len()), out);
                for item in items {
                    item.encode(out);
                }
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TypeLength {
    kind: u8,
    length: usize,
    tl_bytes: usize,
}

fn failure(input: &[u8], kind: ErrorKind) -> NomErr<Error<&[u8]>> {
    NomErr::Failure(Error::new(input, kind))
}

fn parse_type_length(input: &[u8]) -> IResult<&[u8], TypeLength> {
    let (mut rest, first) = be_u8(input)?;
    let kind = (first & SML_TL_TYPE_MASK) >> 4;
    let mut length = usize::from(first & SML_TL_LEN_MASK);
    let mut more = first & SML_TL_MORE != 0;
    let mut tl_bytes = 1;

    while more {
        let (next_rest, next) = be_u8(rest)?;
        if next & SML_TL_TYPE_MASK != 0 || tl_bytes >= 4 {
            return Err(failure(rest, ErrorKind::Verify));
        }
        length = (length << 4) | usize::from(next & SML_TL_LEN_MASK);
        more = next & SML_TL_MORE != 0;
        tl_bytes += 1;
        rest = next_rest;
    }

    Ok((rest, TypeLength { kind, length, tl_bytes }))
}

/// Parses one SML value from the front of `input`.
pub fn parse_value(input: &[u8]) -> IResult<&[u8], SmlValue> {
    parse_nested(input, 0)
}

fn parse_nested(input: &[u8], depth: usize) -> IResult<&[u8], SmlValue> {
    if depth > SML_MAX_DEPTH {
        return Err(failure(input, ErrorKind::TooLarge));
    }
    if let Some((&0x00, rest)) = input.split_first() {
        return Ok((rest, SmlValue::EndOfMessage));
    }

    let (input, tl) = parse_type_length(input)?;

    if tl.kind == SML_TYPE_LIST {
        let mut items = Vec::with_capacity(tl.length.min(64));
        let mut rest = input;
        for _ in 0..tl.length {
            let (next, item) = parse_nested(rest, depth + 1)?;
            items.push(item);
            rest = next;
        }
        return Ok((rest, SmlValue::List(items)));
    }

    let data_len = tl
        .length
        .checked_sub(tl.tl_bytes)
        .ok_or_else(|| failure(input, ErrorKind::LengthValue))?;
    let (rest, data) = take(data_len)(input)?;

    let value = match tl.kind {
        SML_TYPE_OCTETS if data.is_empty() => SmlValue::Absent,
        SML_TYPE_OCTETS => SmlValue::Octets(data.to_vec()),
        SML_TYPE_BOOL if data.len() == 1 => SmlValue::Bool(data[0] != 0),
        SML_TYPE_INT if (1..=8).contains(&data.len()) => {
            let seed: i64 = if data[0] & 0x80 != 0 { -1 } else { 0 };
            SmlValue::Int(data.iter().fold(seed, |acc, b| (acc << 8) | i64::from(*b)))
        }
        SML_TYPE_UINT if (1..=8).contains(&data.len()) => {
            SmlValue::UInt(data.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
        }
        _ => return Err(failure(input, ErrorKind::Verify)),
    };

    Ok((rest, value))
}

/// Number of length nibbles needed for a list count.
fn nibbles_for(count: usize) -> usize {
    let mut n = 1;
    while count >= 1usize << (4 * n) {
        n += 1;
    }
    n
}

/// Scalar lengths include the TL bytes, which may themselves grow the length.
fn write_scalar_tl(kind: u8, data_len: usize, out: &mut Vec<u8>) {
    let mut n = 1;
    while data_len + n >= 1usize << (4 * n) {
        n += 1;
    }
    write_tl(kind, data_len + n, n, out);
}

fn write_tl(kind: u8, length: usize, nibbles: usize, out: &mut Vec<u8>) {
    for i in (0..nibbles).rev() {
        let mut byte = ((length >> (4 * i)) & 0x0F) as u8;
        if i > 0 {
            byte |= SML_TL_MORE;
        }
        if i == nibbles - 1 {
            byte |= kind << 4;
        }
        out.push(byte);
    }
}

fn signed_width(v: i64) -> usize {
    [1usize, 2, 4]
        .into_iter()
        .find(|w| {
            let bits = 8 * *w as u32;
            let min = -(1i64 << (bits - 1));
            let max = (1i64 << (bits - 1)) - 1;
            (min..=max).contains(&v)
        })
        .unwrap_or(8)
}

fn unsigned_width(v: u64) -> usize {
    [1usize, 2, 4]
        .into_iter()
        .find(|w| v < 1u64 << (8 * *w as u32))
        .unwrap_or(8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scalars() {
        assert_eq!(parse_value(&[0x62, 0x1E]).unwrap().1, SmlValue::UInt(30));
        assert_eq!(parse_value(&[0x52, 0xFF]).unwrap().1, SmlValue::Int(-1));
        assert_eq!(parse_value(&[0x53, 0xFE, 0xA2]).unwrap().1, SmlValue::Int(-350));
        assert_eq!(
            parse_value(&[0x65, 0x07, 0x5B, 0xCD, 0x15]).unwrap().1,
            SmlValue::UInt(123_456_789)
        );
        assert_eq!(parse_value(&[0x42, 0x01]).unwrap().1, SmlValue::Bool(true));
        assert_eq!(parse_value(&[0x01]).unwrap().1, SmlValue::Absent);
        assert_eq!(parse_value(&[0x00]).unwrap().1, SmlValue::EndOfMessage);
        assert_eq!(
            parse_value(&[0x04, b'E', b'M', b'H']).unwrap().1,
            SmlValue::Octets(b"EMH".to_vec())
        );
    }

    #[test]
    fn test_parse_eight_byte_signed() {
        let bytes = [0x59, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x9C];
        assert_eq!(parse_value(&bytes).unwrap().1, SmlValue::Int(-100));
    }

    #[test]
    fn test_parse_multi_byte_tl_octets() {
        // 0x81 0x03: length 0x13 = 19 including both TL bytes -> 17 data bytes
        let mut bytes = vec![0x81, 0x03];
        bytes.extend_from_slice(&[0xAA; 17]);
        bytes.push(0x00);
        let (rest, value) = parse_value(&bytes).unwrap();
        assert_eq!(value, SmlValue::Octets(vec![0xAA; 17]));
        assert_eq!(rest, &[0x00]);
    }

    #[test]
    fn test_parse_nested_list() {
        let bytes = [0x72, 0x62, 0x01, 0x71, 0x01];
        let (rest, value) = parse_value(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(
            value,
            SmlValue::List(vec![SmlValue::UInt(1), SmlValue::List(vec![SmlValue::Absent])])
        );
    }

    #[test]
    fn test_truncated_input_is_rejected() {
        assert!(parse_value(&[0x65, 0x07, 0x5B]).is_err());
        assert!(parse_value(&[0x73, 0x62, 0x01]).is_err());
        assert!(parse_value(&[]).is_err());
    }

    #[test]
    fn test_invalid_type_is_rejected() {
        // type 001 is not defined
        assert!(parse_value(&[0x12, 0x00]).is_err());
        // continuation TL byte with type bits set
        assert!(parse_value(&[0x81, 0x73, 0x00]).is_err());
        // nine-byte integer
        assert!(parse_value(&[0x6A, 0, 0, 0, 0, 0, 0, 0, 0, 1]).is_err());
    }

    #[test]
    fn test_depth_limit() {
        let mut bytes = vec![0x71; SML_MAX_DEPTH + 2];
        bytes.push(0x01);
        assert!(parse_value(&bytes).is_err());
    }

    #[test]
    fn test_encode_matches_wire_layout() {
        assert_eq!(SmlValue::Int(-350).to_bytes(), vec![0x53, 0xFE, 0xA2]);
        assert_eq!(SmlValue::UInt(30).to_bytes(), vec![0x62, 0x1E]);
        assert_eq!(SmlValue::Octets(b"EMH".to_vec()).to_bytes(), vec![0x04, b'E', b'M', b'H']);
        assert_eq!(SmlValue::Octets(vec![0xAA; 17]).to_bytes()[..2], [0x81, 0x03]);
        let long_list = SmlValue::List(vec![SmlValue::Absent; 17]);
        assert_eq!(long_list.to_bytes()[..2], [0xF1, 0x01]);
        assert_eq!(parse_value(&long_list.to_bytes()).unwrap().1, long_list);
    }
}
