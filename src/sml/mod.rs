//! The sml module contains the transport side of the reader: the byte source
//! abstraction over the optical head and the frame assembler that recovers
//! SML transport frames from the raw stream.

pub mod frame;
pub mod serial;
pub mod serial_mock;

pub use frame::{pack_frame, AssemblerState, AssemblerStats, CrcAlgorithm, Frame, FrameAssembler};
pub use serial::{ByteSource, SerialByteSource, SerialConfig, StreamByteSource};
