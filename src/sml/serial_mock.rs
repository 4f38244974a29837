//! Mock serial port implementation for testing
//!
//! This module provides a mock optical head that can be used to test the
//! acquisition path without a meter attached. Bytes are handed out in the
//! chunks they were queued in; an empty port stays pending like a real line
//! between telegrams.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};

use tokio::io::{AsyncRead, ReadBuf};

use crate::constants::{
    OBIS_ENERGY_FORWARD, OBIS_ENERGY_REVERSE, OBIS_MANUFACTURER, OBIS_POWER, OBIS_SERVER_ID,
    SML_MSG_CLOSE_RES, SML_MSG_GET_LIST_RES, SML_MSG_OPEN_RES, SML_UNIT_WATT, SML_UNIT_WATT_HOUR,
};
use crate::payload::obis::ObisCode;
use crate::payload::value::SmlValue;
use crate::sml::frame::{pack_frame, CrcAlgorithm};

#[derive(Default)]
struct Inner {
    chunks: VecDeque<Vec<u8>>,
    next_error: Option<io::Error>,
    closed: bool,
    waker: Option<Waker>,
}

/// Mock serial port that simulates a meter pushing telegrams
#[derive(Clone, Default)]
pub struct MockSerialPort {
    inner: Arc<Mutex<Inner>>,
}

/// Readings for a synthesized telegram.
#[derive(Debug, Clone, PartialEq)]
pub struct MockReading {
    /// Raw power value, sent with scaler 0
    pub power_w: Option<i64>,
    /// Raw energy in tenths of a Wh, sent with scaler -1
    pub energy_wh_tenths: Option<u64>,
    pub reverse_wh_tenths: Option<u64>,
    pub manufacturer: Option<String>,
    pub server_id: Vec<u8>,
}

impl Default for MockReading {
    fn default() -> Self {
        MockReading {
            power_w: Some(0),
            energy_wh_tenths: Some(0),
            reverse_wh_tenths: None,
            manufacturer: Some("EMH".to_string()),
            server_id: vec![0x0A, 0x01, 0x45, 0x4D, 0x48, 0x00, 0x00, 0xB8, 0xF4, 0xA1],
        }
    }
}

impl MockReading {
    pub fn with_power(power_w: i64) -> Self {
        MockReading {
            power_w: Some(power_w),
            ..Default::default()
        }
    }

    /// SML file payload: Open.Res, GetList.Res, Close.Res.
    pub fn to_payload(&self) -> Vec<u8> {
        let mut entries = Vec::new();
        if let Some(manufacturer) = &self.manufacturer {
            entries.push(list_entry(
                OBIS_MANUFACTURER,
                None,
                None,
                SmlValue::Octets(manufacturer.as_bytes().to_vec()),
            ));
        }
        entries.push(list_entry(
            OBIS_SERVER_ID,
            None,
            None,
            SmlValue::Octets(self.server_id.clone()),
        ));
        if let Some(energy) = self.energy_wh_tenths {
            entries.push(list_entry(
                OBIS_ENERGY_FORWARD,
                Some(SML_UNIT_WATT_HOUR),
                Some(-1),
                SmlValue::UInt(energy),
            ));
        }
        if let Some(energy) = self.reverse_wh_tenths {
            entries.push(list_entry(
                OBIS_ENERGY_REVERSE,
                Some(SML_UNIT_WATT_HOUR),
                Some(-1),
                SmlValue::UInt(energy),
            ));
        }
        if let Some(power) = self.power_w {
            entries.push(list_entry(
                OBIS_POWER,
                Some(SML_UNIT_WATT),
                Some(0),
                SmlValue::Int(power),
            ));
        }

        let server_id = SmlValue::Octets(self.server_id.clone());
        let mut payload = Vec::new();
        message(
            1,
            SML_MSG_OPEN_RES,
            vec![
                SmlValue::Absent,
                SmlValue::Absent,
                SmlValue::Octets(vec![0x11, 0x22, 0x33]),
                server_id.clone(),
                SmlValue::Absent,
                SmlValue::Absent,
            ],
        )
        .encode(&mut payload);
        message(
            2,
            SML_MSG_GET_LIST_RES,
            vec![
                SmlValue::Absent,
                server_id,
                SmlValue::Absent,
                SmlValue::Absent,
                SmlValue::List(entries),
                SmlValue::Absent,
                SmlValue::Absent,
            ],
        )
        .encode(&mut payload);
        message(3, SML_MSG_CLOSE_RES, vec![SmlValue::Absent]).encode(&mut payload);
        payload
    }

    /// Complete transport frame for this reading.
    pub fn to_frame(&self, crc: CrcAlgorithm) -> Vec<u8> {
        pack_frame(&self.to_payload(), crc)
    }
}

fn list_entry(code: ObisCode, unit: Option<u8>, scaler: Option<i64>, value: SmlValue) -> SmlValue {
    SmlValue::List(vec![
        SmlValue::Octets(code.bytes().to_vec()),
        SmlValue::Absent,
        SmlValue::Absent,
        unit.map_or(SmlValue::Absent, |u| SmlValue::UInt(u64::from(u))),
        scaler.map_or(SmlValue::Absent, SmlValue::Int),
        value,
        SmlValue::Absent,
    ])
}

fn message(transaction: u8, tag: u64, content: Vec<SmlValue>) -> SmlValue {
    SmlValue::List(vec![
        SmlValue::Octets(vec![0x00, transaction]),
        SmlValue::UInt(0),
        SmlValue::UInt(0),
        SmlValue::List(vec![SmlValue::UInt(tag), SmlValue::List(content)]),
        SmlValue::UInt(0x1234),
        SmlValue::EndOfMessage,
    ])
}

impl MockSerialPort {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means another test thread panicked.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue one chunk to be returned by a single read
    pub fn queue_rx_data(&self, data: &[u8]) {
        let mut inner = self.lock();
        inner.chunks.push_back(data.to_vec());
        if let Some(waker) = inner.waker.take() {
            waker.wake();
        }
    }

    /// Queue a frame split into chunks of `chunk_size` bytes
    pub fn queue_chunked(&self, data: &[u8], chunk_size: usize) {
        for chunk in data.chunks(chunk_size.max(1)) {
            self.queue_rx_data(chunk);
        }
    }

    /// Queue a complete telegram for `reading`
    pub fn queue_reading(&self, reading: &MockReading) {
        self.queue_rx_data(&reading.to_frame(CrcAlgorithm::X25));
    }

    /// Number of chunks not yet read
    pub fn pending_chunks(&self) -> usize {
        self.lock().chunks.len()
    }

    /// Clear all queued data
    pub fn clear(&self) {
        self.lock().chunks.clear();
    }

    /// Set an error to be returned on the next read
    pub fn set_next_error(&self, error: io::Error) {
        let mut inner = self.lock();
        inner.next_error = Some(error);
        if let Some(waker) = inner.waker.take() {
            waker.wake();
        }
    }

    /// Simulate the head being unplugged: reads return end-of-file once the
    /// queue is drained
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        if let Some(waker) = inner.waker.take() {
            waker.wake();
        }
    }
}

impl AsyncRead for MockSerialPort {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut inner = self.lock();

        if let Some(error) = inner.next_error.take() {
            return Poll::Ready(Err(error));
        }

        match inner.chunks.pop_front() {
            Some(mut chunk) => {
                let n = chunk.len().min(buf.remaining());
                buf.put_slice(&chunk[..n]);
                if n < chunk.len() {
                    inner.chunks.push_front(chunk.split_off(n));
                }
                Poll::Ready(Ok(()))
            }
            None if inner.closed => Poll::Ready(Ok(())),
            None => {
                inner.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::record::RecordDecoder;
    use crate::sml::frame::FrameAssembler;

    #[test]
    fn test_queue_chunked() {
        let port = MockSerialPort::new();
        port.queue_chunked(&[1, 2, 3, 4, 5], 2);
        assert_eq!(port.pending_chunks(), 3);
        port.clear();
        assert_eq!(port.pending_chunks(), 0);
    }

    #[test]
    fn test_reading_decodes() {
        let reading = MockReading {
            power_w: Some(-350),
            energy_wh_tenths: Some(123_456_789),
            reverse_wh_tenths: Some(5000),
            ..Default::default()
        };
        let mut assembler = FrameAssembler::default();
        assembler.push(&reading.to_frame(CrcAlgorithm::X25));
        let frame = assembler.try_next_frame().unwrap();

        let sample = RecordDecoder::new().with_serial(true).decode(&frame).unwrap();
        assert_eq!(sample.power_w, -350.0);
        assert!((sample.energy_forward_wh.unwrap() - 12_345_678.9).abs() < 1e-6);
        assert!((sample.energy_reverse_wh.unwrap() - 500.0).abs() < 1e-9);
        assert_eq!(sample.manufacturer.as_deref(), Some("EMH"));
        assert_eq!(sample.serial.as_deref(), Some("12121249"));
    }

    #[test]
    fn test_reading_without_power() {
        let reading = MockReading {
            power_w: None,
            ..Default::default()
        };
        let mut assembler = FrameAssembler::default();
        assembler.push(&reading.to_frame(CrcAlgorithm::X25));
        let frame = assembler.try_next_frame().unwrap();
        assert!(RecordDecoder::new().decode(&frame).is_err());
    }
}
