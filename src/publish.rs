//! # Telemetry Publishing
//!
//! Measurements leave the reader through a [`Publisher`]. Values are keyed by
//! the grid meter paths consumers on the bus look for (`/Ac/Power`,
//! `/Ac/L1/Current`, ...), together with an [`UpdateIndex`] that changes on
//! every publish so consumers can tell a fresh value from a repeated one.

use std::io::Write;

use chrono::{SecondsFormat, Utc};
use log::info;
use serde_json::{Map, Value};

use crate::error::SmlError;
use crate::measurement::PublishedMeasurement;

/// Cycle counter published alongside each measurement, wrapping 255 -> 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct UpdateIndex(u8);

impl UpdateIndex {
    pub fn new(value: u8) -> Self {
        UpdateIndex(value)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn next(self) -> Self {
        UpdateIndex(self.0.wrapping_add(1))
    }
}

/// Sink for published measurements.
pub trait Publisher {
    fn publish(&mut self, measurement: &PublishedMeasurement, index: UpdateIndex)
        -> Result<(), SmlError>;
}

impl<P: Publisher + ?Sized> Publisher for Box<P> {
    fn publish(
        &mut self,
        measurement: &PublishedMeasurement,
        index: UpdateIndex,
    ) -> Result<(), SmlError> {
        (**self).publish(measurement, index)
    }
}

/// Flattens a measurement into `(path, value)` pairs in publish order.
pub fn bus_paths(measurement: &PublishedMeasurement) -> Vec<(String, Option<f64>)> {
    let mut paths = vec![
        ("/Ac/Power".to_string(), measurement.power),
        ("/Ac/Current".to_string(), measurement.current),
        ("/Ac/Voltage".to_string(), measurement.voltage),
    ];
    for (i, phase) in measurement.phases.iter().enumerate() {
        let line = i + 1;
        paths.push((format!("/Ac/L{line}/Voltage"), phase.voltage));
        paths.push((format!("/Ac/L{line}/Current"), phase.current));
        paths.push((format!("/Ac/L{line}/Power"), phase.power));
    }
    paths.push(("/Ac/Energy/Forward".to_string(), measurement.energy_forward));
    paths.push(("/Ac/Energy/Reverse".to_string(), measurement.energy_reverse));
    paths
}

/// Writes one JSON object per publish, one per line.
#[derive(Debug)]
pub struct JsonLinesPublisher<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesPublisher<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Publisher for JsonLinesPublisher<W> {
    fn publish(
        &mut self,
        measurement: &PublishedMeasurement,
        index: UpdateIndex,
    ) -> Result<(), SmlError> {
        let mut object = Map::new();
        object.insert(
            "timestamp".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        object.insert("/UpdateIndex".to_string(), Value::from(index.value()));
        for (path, value) in bus_paths(measurement) {
            object.insert(path, value.map_or(Value::Null, Value::from));
        }

        let line = serde_json::to_string(&Value::Object(object))
            .map_err(|e| SmlError::Publish(e.to_string()))?;
        writeln!(self.writer, "{line}").map_err(|e| SmlError::Publish(e.to_string()))?;
        self.writer
            .flush()
            .map_err(|e| SmlError::Publish(e.to_string()))
    }
}

/// Publishes to the log only, useful when running without a bus.
#[derive(Debug, Default)]
pub struct LogPublisher;

impl Publisher for LogPublisher {
    fn publish(
        &mut self,
        measurement: &PublishedMeasurement,
        index: UpdateIndex,
    ) -> Result<(), SmlError> {
        if measurement.is_unavailable() {
            info!("[{}] meter unavailable", index.value());
            return Ok(());
        }
        let rendered: Vec<String> = bus_paths(measurement)
            .into_iter()
            .filter_map(|(path, value)| value.map(|v| format!("{path}={v:.3}")))
            .collect();
        info!("[{}] {}", index.value(), rendered.join(" "));
        Ok(())
    }
}
