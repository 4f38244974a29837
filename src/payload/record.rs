//! # SML Record Decoding
//!
//! Walks the messages of a validated frame and turns the list entries of every
//! `GetList.Res` into a [`Register`]: one entry per OBIS code, integers already
//! multiplied by their decimal scaler. [`RecordDecoder`] then picks the
//! quantities this reader cares about out of the register and produces a
//! [`MeterSample`].

use bytes::Bytes;
use log::{debug, trace};

use crate::constants::{
    OBIS_ENERGY_FORWARD, OBIS_ENERGY_REVERSE, OBIS_MANUFACTURER, OBIS_POWER, OBIS_SERVER_ID,
    SML_MSG_GET_LIST_RES,
};
use crate::error::SmlError;
use crate::payload::obis::ObisCode;
use crate::payload::value::{parse_value, SmlValue};
use crate::sml::frame::Frame;

/// Value of one register entry.
#[derive(Debug, Clone, PartialEq)]
pub enum RegisterValue {
    /// Integer reading with the scaler already applied
    Numeric(f64),
    Text(Bytes),
    Flag(bool),
}

/// One (code, value, scale) triple.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterEntry {
    pub code: ObisCode,
    pub value: RegisterValue,
    pub scaler: i8,
    /// DLMS unit code, if the meter sent one
    pub unit: Option<u8>,
}

/// The readings carried by one frame, in wire order, unique per OBIS code.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Register {
    entries: Vec<RegisterEntry>,
    server_id: Option<Bytes>,
}

impl Register {
    /// Adds an entry unless the same code is already present. Returns whether
    /// the entry was stored.
    pub fn insert(&mut self, entry: RegisterEntry) -> bool {
        if self.entries.iter().any(|e| e.code == entry.code) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Looks up a code, ignoring OBIS group F.
    pub fn get(&self, code: &ObisCode) -> Option<&RegisterEntry> {
        self.entries.iter().find(|e| e.code.same_quantity(code))
    }

    pub fn numeric(&self, code: &ObisCode) -> Option<f64> {
        match self.get(code)?.value {
            RegisterValue::Numeric(v) => Some(v),
            _ => None,
        }
    }

    /// Server id from the `GetList.Res` header.
    pub fn server_id(&self) -> Option<&Bytes> {
        self.server_id.as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisterEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The semantic reading of one frame.
///
/// Power is signed: positive while drawing from the grid, negative while
/// feeding into it.
#[derive(Debug, Clone, PartialEq)]
pub struct MeterSample {
    pub manufacturer: Option<String>,
    /// Only filled in when the decoder was asked for it
    pub serial: Option<String>,
    pub power_w: f64,
    pub energy_forward_wh: Option<f64>,
    /// Present only on bidirectional meters
    pub energy_reverse_wh: Option<f64>,
}

impl MeterSample {
    /// `"<manufacturer> <serial>"`, the identity logged at startup.
    pub fn identity(&self) -> String {
        format!(
            "{} {}",
            self.manufacturer.as_deref().unwrap_or(""),
            self.serial.as_deref().unwrap_or("")
        )
        .trim()
        .to_string()
    }
}

/// Maps validated frames to meter samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordDecoder {
    with_serial: bool,
}

impl RecordDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also resolve the meter serial number.
    pub fn with_serial(mut self, with_serial: bool) -> Self {
        self.with_serial = with_serial;
        self
    }

    pub fn decode(&self, frame: &Frame) -> Result<MeterSample, SmlError> {
        let register = decode_register(frame)?;
        self.sample_from_register(&register)
    }

    pub fn sample_from_register(&self, register: &Register) -> Result<MeterSample, SmlError> {
        let power_w = register
            .numeric(&OBIS_POWER)
            .ok_or_else(|| SmlError::MissingField(OBIS_POWER.to_string()))?;

        let manufacturer = register.get(&OBIS_MANUFACTURER).map(|e| match &e.value {
            RegisterValue::Text(raw) => String::from_utf8_lossy(raw).trim().to_string(),
            RegisterValue::Numeric(v) => v.to_string(),
            RegisterValue::Flag(b) => b.to_string(),
        });

        let serial = if self.with_serial {
            match register.get(&OBIS_SERVER_ID).map(|e| &e.value) {
                Some(RegisterValue::Text(raw)) => Some(serial_from_server_id(raw)),
                Some(RegisterValue::Numeric(v)) => Some(v.to_string()),
                _ => register.server_id().map(|raw| serial_from_server_id(raw)),
            }
        } else {
            None
        };

        Ok(MeterSample {
            manufacturer,
            serial,
            power_w,
            energy_forward_wh: register.numeric(&OBIS_ENERGY_FORWARD),
            energy_reverse_wh: register.numeric(&OBIS_ENERGY_REVERSE),
        })
    }
}

/// The last four bytes of a server id read as a big-endian number, which is
/// the serial printed on the meter housing.
pub fn serial_from_server_id(raw: &[u8]) -> String {
    let tail = &raw[raw.len().saturating_sub(4)..];
    tail.iter()
        .fold(0u32, |acc, b| (acc << 8) | u32::from(*b))
        .to_string()
}

fn malformed(what: impl Into<String>) -> SmlError {
    SmlError::MalformedFrame(what.into())
}

/// Splits a frame payload into its SML messages.
pub fn parse_messages(payload: &[u8]) -> Result<Vec<SmlValue>, SmlError> {
    let mut messages = Vec::new();
    let mut input = payload;

    while let Some((&first, rest)) = input.split_first() {
        if first == 0x00 {
            input = rest;
            continue;
        }
        let (rest, message) = parse_value(input).map_err(|e| {
            malformed(format!(
                "value at offset {}: {e:?}",
                payload.len() - input.len()
            ))
        })?;
        messages.push(message);
        input = rest;
    }

    Ok(messages)
}

/// Extracts the register from every `GetList.Res` in the frame.
pub fn decode_register(frame: &Frame) -> Result<Register, SmlError> {
    let mut register = Register::default();

    for message in parse_messages(frame.payload())? {
        let fields = message
            .as_list()
            .filter(|f| f.len() >= 5)
            .ok_or_else(|| malformed("message is not a list of 6"))?;
        let body = fields[3]
            .as_list()
            .filter(|b| b.len() == 2)
            .ok_or_else(|| malformed("message body is not a list of 2"))?;
        let tag = body[0]
            .as_integer()
            .ok_or_else(|| malformed("message body tag is not an integer"))?;

        if tag != i128::from(SML_MSG_GET_LIST_RES) {
            trace!("Skipping SML message with tag 0x{tag:04X}");
            continue;
        }
        decode_get_list_response(&body[1], &mut register)?;
    }

    Ok(register)
}

fn decode_get_list_response(content: &SmlValue, register: &mut Register) -> Result<(), SmlError> {
    let fields = content
        .as_list()
        .filter(|f| f.len() >= 5)
        .ok_or_else(|| malformed("GetList.Res is not a list of 7"))?;

    if register.server_id.is_none() {
        register.server_id = fields[1].as_octets().map(Bytes::copy_from_slice);
    }

    let entries = fields[4]
        .as_list()
        .ok_or_else(|| malformed("GetList.Res value list is not a list"))?;

    for entry in entries {
        if let Some(decoded) = decode_list_entry(entry)? {
            let code = decoded.code;
            if !register.insert(decoded) {
                debug!("Duplicate register entry {code}, keeping the first");
            }
        }
    }
    Ok(())
}

fn decode_list_entry(entry: &SmlValue) -> Result<Option<RegisterEntry>, SmlError> {
    let fields = entry
        .as_list()
        .filter(|f| f.len() >= 6)
        .ok_or_else(|| malformed("list entry is not a list of 7"))?;

    let code = fields[0]
        .as_octets()
        .ok_or_else(|| malformed("list entry name is not an octet string"))
        .and_then(ObisCode::try_from)?;

    let unit = match &fields[3] {
        SmlValue::Absent => None,
        SmlValue::UInt(u) => Some(u8::try_from(*u).map_err(|_| malformed("unit out of range"))?),
        _ => return Err(malformed(format!("{code}: unit is not unsigned"))),
    };

    let scaler = match fields[4].as_integer() {
        Some(s) => i8::try_from(s).map_err(|_| malformed(format!("{code}: scaler out of range")))?,
        None if fields[4].is_absent() => 0,
        None => return Err(malformed(format!("{code}: scaler is not an integer"))),
    };

    let value = match &fields[5] {
        SmlValue::Int(v) => RegisterValue::Numeric(*v as f64 * 10f64.powi(i32::from(scaler))),
        SmlValue::UInt(v) => RegisterValue::Numeric(*v as f64 * 10f64.powi(i32::from(scaler))),
        SmlValue::Octets(raw) => RegisterValue::Text(Bytes::copy_from_slice(raw)),
        SmlValue::Bool(b) => RegisterValue::Flag(*b),
        SmlValue::Absent => {
            trace!("{code}: no value");
            return Ok(None);
        }
        other => return Err(malformed(format!("{code}: unexpected value {other:?}"))),
    };

    Ok(Some(RegisterEntry { code, value, scaler, unit }))
}
