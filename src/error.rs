//! # SML Error Handling
//!
//! This module defines the SmlError enum, which represents the different error
//! types that can occur while reading a meter, and classifies them by how far
//! they are allowed to propagate:
//!
//! - soft errors are absorbed inside the frame assembler,
//! - cycle errors are counted by the polling loop and only escalate once the
//!   failure ceiling is exceeded,
//! - fatal errors terminate the process.

use thiserror::Error;

/// Represents the different error types that can occur in the SML reader.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SmlError {
    /// The serial channel failed or was closed. Always fatal.
    #[error("Serial port error: {0}")]
    SerialPort(String),

    /// A structurally complete frame failed its integrity check.
    #[error("CRC mismatch: frame carries 0x{expected:04X}, calculated 0x{calculated:04X}")]
    CrcMismatch { expected: u16, calculated: u16 },

    /// No valid frame arrived within the acquisition deadline.
    #[error("No valid SML frame within {waited_ms} ms")]
    CycleTimeout { waited_ms: u64 },

    /// The frame passed its CRC but its record structure could not be walked.
    #[error("Malformed SML frame: {0}")]
    MalformedFrame(String),

    /// A required register was not present in the frame.
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Too many consecutive acquisition cycles failed.
    #[error("Giving up after {consecutive_failures} consecutive failed cycles (last: {last_error})")]
    FailStop {
        consecutive_failures: u32,
        last_error: String,
    },

    /// The telemetry publisher rejected a measurement.
    #[error("Publish error: {0}")]
    Publish(String),

    /// The meter could not be opened or identified at launch.
    #[error("Startup error: {0}")]
    Startup(String),

    /// The configuration is unusable.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SmlError {
    /// Errors the frame assembler retries within the same cycle.
    pub fn is_soft(&self) -> bool {
        matches!(self, SmlError::CrcMismatch { .. })
    }

    /// Errors that count against the consecutive failure ceiling.
    pub fn counts_as_cycle_failure(&self) -> bool {
        matches!(
            self,
            SmlError::CycleTimeout { .. } | SmlError::MalformedFrame(_) | SmlError::MissingField(_)
        )
    }

    /// Errors that end the process.
    pub fn is_fatal(&self) -> bool {
        !self.is_soft() && !self.counts_as_cycle_failure()
    }

    /// Process exit status for a fatal error.
    pub fn exit_code(&self) -> u8 {
        match self {
            SmlError::FailStop { .. } => 1,
            SmlError::SerialPort(_) => 2,
            SmlError::Startup(_) | SmlError::Config(_) => 3,
            SmlError::Publish(_) => 4,
            // Non-fatal errors only reach here if escalated by the caller.
            _ => 1,
        }
    }
}

impl From<std::io::Error> for SmlError {
    fn from(err: std::io::Error) -> Self {
        SmlError::SerialPort(err.to_string())
    }
}

impl From<tokio_serial::Error> for SmlError {
    fn from(err: tokio_serial::Error) -> Self {
        SmlError::SerialPort(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(SmlError::CrcMismatch { expected: 1, calculated: 2 }.is_soft());
        assert!(SmlError::CycleTimeout { waited_ms: 6000 }.counts_as_cycle_failure());
        assert!(SmlError::MissingField("1-0:16.7.0*255".into()).counts_as_cycle_failure());
        assert!(SmlError::SerialPort("gone".into()).is_fatal());
        assert!(!SmlError::MalformedFrame("short".into()).is_fatal());
    }

    #[test]
    fn test_exit_codes_are_distinct_and_nonzero() {
        let codes = [
            SmlError::FailStop { consecutive_failures: 6, last_error: String::new() }.exit_code(),
            SmlError::SerialPort(String::new()).exit_code(),
            SmlError::Startup(String::new()).exit_code(),
            SmlError::Publish(String::new()).exit_code(),
        ];
        assert!(codes.iter().all(|c| *c != 0));
        assert_eq!(codes, [1, 2, 3, 4]);
    }

    #[test]
    fn test_io_error_maps_to_serial_port() {
        let err: SmlError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe").into();
        assert!(matches!(err, SmlError::SerialPort(_)));
    }
}
