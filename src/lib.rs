//! # sml-gridmeter - Reading SML Energy Meters over an Optical Head
//!
//! The sml-gridmeter crate reads electricity meters that push SML (Smart
//! Message Language) telegrams over their infrared interface, and republishes
//! the readings as grid meter telemetry.
//!
//! ## Features
//!
//! - Recover SML transport frames from an arbitrarily chunked serial stream,
//!   with CRC-16 validation and resynchronisation after line noise
//! - Decode the SML value tree and the OBIS-coded list entries of `GetList.Res`
//! - Derive three-phase grid meter values from the meter's total power
//! - Poll on a fixed period with a bounded acquisition deadline and fail-stop
//!   after repeated failures
//! - Publish measurements as JSON lines or to the log
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sml_gridmeter::{
//!     connect, DerivationPolicy, JsonLinesPublisher, PollingConfig, PollingLoop, SmlError,
//! };
//!
//! # async fn run() -> Result<(), SmlError> {
//! let mut reader = connect("/dev/ttyUSB0").await?;
//! let sample = reader.read_sample(true).await?;
//! println!("{} W", sample.power_w);
//!
//! let publisher = JsonLinesPublisher::new(std::io::stdout());
//! let mut polling = PollingLoop::new(
//!     reader,
//!     publisher,
//!     DerivationPolicy::default(),
//!     PollingConfig::default(),
//! );
//! polling.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod measurement;
pub mod payload;
pub mod polling;
pub mod publish;
pub mod reader;
pub mod sml;
pub mod util;

pub use crate::config::AppConfig;
pub use crate::error::SmlError;
pub use crate::logging::{init_logger, log_error, log_info, log_warn};

pub use measurement::{derive, DerivationPolicy, PhaseMeasurement, PublishedMeasurement};
pub use payload::{decode_register, MeterSample, ObisCode, RecordDecoder, Register};
pub use polling::{FailureState, PollingConfig, PollingLoop, TickOutcome};
pub use publish::{JsonLinesPublisher, LogPublisher, Publisher, UpdateIndex};
pub use reader::MeterReader;
pub use sml::{
    ByteSource, CrcAlgorithm, Frame, FrameAssembler, SerialByteSource, SerialConfig,
    StreamByteSource,
};

/// Connect to a meter's optical head with default settings.
///
/// # Arguments
/// * `port` - Serial port path (e.g., "/dev/ttyUSB0" on Linux, "COM3" on Windows)
///
/// # Returns
/// * `Ok(MeterReader)` - Reader ready to acquire frames
/// * `Err(SmlError)` - The port could not be opened
pub async fn connect(port: &str) -> Result<MeterReader<SerialByteSource>, SmlError> {
    connect_with_config(port, &SerialConfig::default(), CrcAlgorithm::default()).await
}

/// Connect to a meter with explicit serial settings and CRC variant.
pub async fn connect_with_config(
    port: &str,
    config: &SerialConfig,
    crc: CrcAlgorithm,
) -> Result<MeterReader<SerialByteSource>, SmlError> {
    let source = SerialByteSource::open(port, config)?;
    Ok(MeterReader::new(source, crc))
}
