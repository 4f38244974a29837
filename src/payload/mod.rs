//! The payload module turns the body of a validated SML frame into typed
//! readings: the TLV value tree, OBIS identifiers and the register of list
//! entries.

pub mod obis;
pub mod record;
pub mod value;

pub use obis::ObisCode;
pub use record::{
    decode_register, parse_messages, serial_from_server_id, MeterSample, RecordDecoder, Register,
    RegisterEntry, RegisterValue,
};
pub use value::{parse_value, SmlValue};
