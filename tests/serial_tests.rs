//! Byte source behaviour over scripted readers.

use std::io;
use std::time::Duration;

use sml_gridmeter::sml::serial_mock::{MockReading, MockSerialPort};
use sml_gridmeter::{ByteSource, CrcAlgorithm, MeterReader, SmlError, StreamByteSource};

#[tokio::test]
async fn test_scripted_reads_then_error() {
    let frame = MockReading::with_power(321).to_frame(CrcAlgorithm::X25);
    let (head, tail) = frame.split_at(10);
    let reader = tokio_test::io::Builder::new()
        .read(head)
        .read(tail)
        .read_error(io::Error::new(io::ErrorKind::TimedOut, "head unplugged"))
        .build();

    let mut source = StreamByteSource::new(reader, Duration::from_millis(20));
    assert_eq!(&source.poll().await.unwrap()[..], head);
    assert_eq!(&source.poll().await.unwrap()[..], tail);
    assert_eq!(
        source.poll().await.unwrap_err(),
        SmlError::SerialPort("head unplugged".to_string())
    );
}

#[tokio::test]
async fn test_reader_over_scripted_stream() {
    let frame = MockReading::with_power(-75).to_frame(CrcAlgorithm::X25);
    let mut builder = tokio_test::io::Builder::new();
    for chunk in frame.chunks(16) {
        builder.read(chunk);
    }
    let source = StreamByteSource::new(builder.build(), Duration::from_millis(20));
    let mut reader = MeterReader::new(source, CrcAlgorithm::X25);

    let sample = reader.read_sample(false).await.unwrap();
    assert_eq!(sample.power_w, -75.0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_meter_within_deadline() {
    let port = MockSerialPort::new();
    let mut reader = MeterReader::new(
        StreamByteSource::new(port.clone(), Duration::from_millis(20)),
        CrcAlgorithm::X25,
    )
    .with_cycle_deadline(Duration::from_secs(6));

    let late = port.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        late.queue_reading(&MockReading::with_power(5));
    });

    let started = tokio::time::Instant::now();
    let sample = reader.read_sample(false).await.unwrap();
    assert_eq!(sample.power_w, 5.0);
    assert!(started.elapsed() < Duration::from_secs(6));
}
