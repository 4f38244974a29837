//! # Serial Byte Source
//!
//! The optical head delivers bytes whenever the meter pushes a telegram; there
//! is nothing to request. A [`ByteSource`] hands out whatever has arrived,
//! waiting at most a short idle period, so the acquisition cycle can check its
//! deadline between reads.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::constants::{DEFAULT_BAUD_RATE, DEFAULT_IDLE_WAIT_MS};
use crate::error::SmlError;

const READ_CHUNK: usize = 512;

/// Non-blocking source of raw bytes.
#[async_trait]
pub trait ByteSource: Send {
    /// Returns the bytes available now, or an empty chunk after the idle wait.
    ///
    /// A closed or failing channel is reported as [`SmlError::SerialPort`].
    async fn poll(&mut self) -> Result<Bytes, SmlError>;
}

/// Serial line settings.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub baud_rate: u32,
    /// Longest a single `poll` waits for data
    pub idle_wait: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            baud_rate: DEFAULT_BAUD_RATE,
            idle_wait: Duration::from_millis(DEFAULT_IDLE_WAIT_MS),
        }
    }
}

/// [`ByteSource`] over any async reader.
#[derive(Debug)]
pub struct StreamByteSource<R> {
    reader: R,
    idle_wait: Duration,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin + Send> StreamByteSource<R> {
    pub fn new(reader: R, idle_wait: Duration) -> Self {
        Self {
            reader,
            idle_wait,
            buf: vec![0u8; READ_CHUNK],
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> ByteSource for StreamByteSource<R> {
    async fn poll(&mut self) -> Result<Bytes, SmlError> {
        match timeout(self.idle_wait, self.reader.read(&mut self.buf)).await {
            Err(_elapsed) => Ok(Bytes::new()),
            Ok(Ok(0)) => Err(SmlError::SerialPort("channel closed".to_string())),
            Ok(Ok(n)) => Ok(Bytes::copy_from_slice(&self.buf[..n])),
            Ok(Err(e)) => Err(e.into()),
        }
    }
}

/// The serial port of an optical reading head.
pub type SerialByteSource = StreamByteSource<SerialStream>;

impl SerialByteSource {
    /// Opens the port 8N1 at the configured baud rate.
    pub fn open(port_name: &str, config: &SerialConfig) -> Result<Self, SmlError> {
        debug!("Opening {port_name} at {} baud", config.baud_rate);
        let port = tokio_serial::new(port_name, config.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .timeout(config.idle_wait)
            .open_native_async()
            .map_err(|e| SmlError::SerialPort(format!("{port_name}: {e}")))?;

        info!("Connected to {port_name}");
        Ok(StreamByteSource::new(port, config.idle_wait))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sml::serial_mock::MockSerialPort;

    #[tokio::test(start_paused = true)]
    async fn test_poll_returns_available_bytes() {
        let port = MockSerialPort::new();
        port.queue_rx_data(&[0x1B, 0x1B]);
        let mut source = StreamByteSource::new(port, Duration::from_millis(20));
        assert_eq!(source.poll().await.unwrap(), Bytes::from_static(&[0x1B, 0x1B]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_is_empty_after_idle_wait() {
        let mut source = StreamByteSource::new(MockSerialPort::new(), Duration::from_millis(20));
        let started = tokio::time::Instant::now();
        assert!(source.poll().await.unwrap().is_empty());
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_channel_is_an_error() {
        let port = MockSerialPort::new();
        port.close();
        let mut source = StreamByteSource::new(port, Duration::from_millis(20));
        assert!(matches!(source.poll().await, Err(SmlError::SerialPort(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_error_is_propagated() {
        let port = MockSerialPort::new();
        port.set_next_error(std::io::Error::new(std::io::ErrorKind::Other, "unplugged"));
        let mut source = StreamByteSource::new(port, Duration::from_millis(20));
        let err = source.poll().await.unwrap_err();
        assert_eq!(err, SmlError::SerialPort("unplugged".to_string()));
    }
}
