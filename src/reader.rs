//! # Meter Reader
//!
//! One acquisition cycle: poll the byte source, feed the frame assembler and
//! stop at the first valid frame or at the cycle deadline. Every cycle starts
//! from an empty assembly buffer.

use std::time::Duration;

use log::{debug, info, trace};
use tokio::time::Instant;

use crate::constants::DEFAULT_CYCLE_DEADLINE_MS;
use crate::error::SmlError;
use crate::payload::record::{MeterSample, RecordDecoder};
use crate::sml::frame::{AssemblerStats, CrcAlgorithm, Frame, FrameAssembler};
use crate::sml::serial::ByteSource;

/// Drives a [`ByteSource`] through a [`FrameAssembler`].
pub struct MeterReader<S: ByteSource> {
    source: S,
    assembler: FrameAssembler,
    cycle_deadline: Duration,
}

impl<S: ByteSource> MeterReader<S> {
    pub fn new(source: S, crc: CrcAlgorithm) -> Self {
        Self {
            source,
            assembler: FrameAssembler::new(crc),
            cycle_deadline: Duration::from_millis(DEFAULT_CYCLE_DEADLINE_MS),
        }
    }

    pub fn with_cycle_deadline(mut self, deadline: Duration) -> Self {
        self.cycle_deadline = deadline;
        self
    }

    pub fn cycle_deadline(&self) -> Duration {
        self.cycle_deadline
    }

    pub fn assembler(&self) -> &FrameAssembler {
        &self.assembler
    }

    pub fn stats(&self) -> AssemblerStats {
        self.assembler.stats()
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Waits for one valid frame.
    ///
    /// CRC failures are absorbed and the wait continues. Returns
    /// [`SmlError::CycleTimeout`] once the deadline passes, and
    /// [`SmlError::SerialPort`] as soon as the source fails.
    pub async fn acquire_frame(&mut self) -> Result<Frame, SmlError> {
        self.assembler.reset();
        let started = Instant::now();
        let deadline = started + self.cycle_deadline;

        loop {
            let chunk = match self.source.poll().await {
                Ok(chunk) => chunk,
                Err(e) => {
                    self.assembler.reset();
                    return Err(e);
                }
            };
            if !chunk.is_empty() {
                trace!("Read {} bytes", chunk.len());
                self.assembler.push(&chunk);
                if let Some(frame) = self.assembler.try_next_frame() {
                    debug!(
                        "Frame acquired after {} ms",
                        started.elapsed().as_millis()
                    );
                    return Ok(frame);
                }
            }

            if Instant::now() >= deadline {
                self.assembler.time_out();
                return Err(SmlError::CycleTimeout {
                    waited_ms: self.cycle_deadline.as_millis() as u64,
                });
            }
        }
    }

    /// Acquires and decodes one sample.
    pub async fn read_sample(&mut self, with_serial: bool) -> Result<MeterSample, SmlError> {
        let frame = self.acquire_frame().await?;
        RecordDecoder::new().with_serial(with_serial).decode(&frame)
    }

    /// Reads one sample with the serial number and returns the meter
    /// identity, `"<manufacturer> <serial>"`.
    pub async fn identify(&mut self) -> Result<String, SmlError> {
        match self.read_sample(true).await {
            Ok(sample) => {
                let identity = sample.identity();
                info!("Connected to meter {identity}");
                Ok(identity)
            }
            Err(e) => Err(SmlError::Startup(format!(
                "Couldn't read device ID, is a SML device attached? ({e})"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sml::serial::StreamByteSource;
    use crate::sml::serial_mock::{MockReading, MockSerialPort};
    use crate::sml::frame::AssemblerState;

    fn reader(port: &MockSerialPort) -> MeterReader<StreamByteSource<MockSerialPort>> {
        let source = StreamByteSource::new(port.clone(), Duration::from_millis(20));
        MeterReader::new(source, CrcAlgorithm::X25)
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_sample_from_chunks() {
        let port = MockSerialPort::new();
        port.queue_chunked(&MockReading::with_power(1200).to_frame(CrcAlgorithm::X25), 7);
        let sample = reader(&port).read_sample(false).await.unwrap();
        assert_eq!(sample.power_w, 1200.0);
        assert_eq!(sample.serial, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_empties_buffer() {
        let port = MockSerialPort::new();
        let frame = MockReading::default().to_frame(CrcAlgorithm::X25);
        port.queue_rx_data(&frame[..frame.len() / 2]);

        let mut reader = reader(&port);
        let started = Instant::now();
        let err = reader.acquire_frame().await.unwrap_err();
        assert_eq!(err, SmlError::CycleTimeout { waited_ms: 6000 });
        assert!(started.elapsed() >= Duration::from_secs(6));
        assert_eq!(reader.assembler().state(), AssemblerState::TimedOut);
        assert_eq!(reader.assembler().buffered_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identify() {
        let port = MockSerialPort::new();
        port.queue_reading(&MockReading::default());
        assert_eq!(reader(&port).identify().await.unwrap(), "EMH 12121249");
    }

    #[tokio::test(start_paused = true)]
    async fn test_identify_without_meter() {
        let port = MockSerialPort::new();
        let err = reader(&port).identify().await.unwrap_err();
        assert!(matches!(err, SmlError::Startup(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_serial_error_is_not_retried() {
        let port = MockSerialPort::new();
        port.set_next_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"));
        port.queue_reading(&MockReading::default());
        let err = reader(&port).acquire_frame().await.unwrap_err();
        assert!(matches!(err, SmlError::SerialPort(_)));
        assert_eq!(port.pending_chunks(), 1);
    }
}
