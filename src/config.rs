//! # Reader Configuration
//!
//! Settings come from an optional JSON file; command line flags override
//! individual fields afterwards. Every field has a default, so an empty object
//! (or no file) is a valid configuration once a port is supplied.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BAUD_RATE, DEFAULT_CYCLE_DEADLINE_MS, DEFAULT_FAILURE_CEILING, DEFAULT_IDLE_WAIT_MS,
    DEFAULT_NOMINAL_VOLTAGE, DEFAULT_TICK_PERIOD_MS,
};
use crate::error::SmlError;
use crate::measurement::DerivationPolicy;
use crate::polling::PollingConfig;
use crate::sml::frame::CrcAlgorithm;
use crate::sml::serial::SerialConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Serial device of the optical head, e.g. `/dev/ttyUSB0`
    pub port: String,
    pub baud_rate: u32,
    pub tick_period_ms: u64,
    pub cycle_deadline_ms: u64,
    pub idle_wait_ms: u64,
    pub failure_ceiling: u32,
    pub nominal_voltage: f64,
    pub crc: CrcAlgorithm,
    /// Read manufacturer and serial once before polling starts
    pub identify_on_startup: bool,
    /// 0 disables the periodic "still alive" log line
    pub sign_of_life_minutes: u64,
    /// JSON lines output; stdout when unset
    pub output: Option<PathBuf>,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            tick_period_ms: DEFAULT_TICK_PERIOD_MS,
            cycle_deadline_ms: DEFAULT_CYCLE_DEADLINE_MS,
            idle_wait_ms: DEFAULT_IDLE_WAIT_MS,
            failure_ceiling: DEFAULT_FAILURE_CEILING,
            nominal_voltage: DEFAULT_NOMINAL_VOLTAGE,
            crc: CrcAlgorithm::default(),
            identify_on_startup: true,
            sign_of_life_minutes: 0,
            output: None,
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl AppConfig {
    /// Reads the file if one is given, defaults otherwise.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn validate(&self) -> Result<(), SmlError> {
        if self.port.trim().is_empty() {
            return Err(SmlError::Config("no serial port configured".into()));
        }
        if self.baud_rate == 0 {
            return Err(SmlError::Config("baud_rate must be positive".into()));
        }
        if self.tick_period_ms == 0 || self.idle_wait_ms == 0 {
            return Err(SmlError::Config(
                "tick_period_ms and idle_wait_ms must be positive".into(),
            ));
        }
        if self.cycle_deadline_ms < self.idle_wait_ms {
            return Err(SmlError::Config(format!(
                "cycle_deadline_ms ({}) is shorter than idle_wait_ms ({})",
                self.cycle_deadline_ms, self.idle_wait_ms
            )));
        }
        if !self.nominal_voltage.is_finite() || self.nominal_voltage <= 0.0 {
            return Err(SmlError::Config(format!(
                "nominal_voltage must be a positive number, got {}",
                self.nominal_voltage
            )));
        }
        if self.log_level.parse::<log::LevelFilter>().is_err() {
            return Err(SmlError::Config(format!("unknown log level '{}'", self.log_level)));
        }
        Ok(())
    }

    pub fn serial(&self) -> SerialConfig {
        SerialConfig {
            baud_rate: self.baud_rate,
            idle_wait: Duration::from_millis(self.idle_wait_ms),
        }
    }

    pub fn polling(&self) -> PollingConfig {
        PollingConfig {
            tick_period: Duration::from_millis(self.tick_period_ms),
            failure_ceiling: self.failure_ceiling,
            sign_of_life: (self.sign_of_life_minutes > 0)
                .then(|| Duration::from_secs(self.sign_of_life_minutes * 60)),
        }
    }

    pub fn derivation(&self) -> DerivationPolicy {
        DerivationPolicy {
            nominal_voltage: self.nominal_voltage,
        }
    }

    pub fn cycle_deadline(&self) -> Duration {
        Duration::from_millis(self.cycle_deadline_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> AppConfig {
        AppConfig {
            port: "/dev/ttyUSB0".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.polling().tick_period, Duration::from_millis(500));
        assert_eq!(config.polling().failure_ceiling, 5);
        assert_eq!(config.polling().sign_of_life, None);
        assert_eq!(config.cycle_deadline(), Duration::from_secs(6));
        assert_eq!(config.crc, CrcAlgorithm::X25);
    }

    #[test]
    fn test_missing_port_is_rejected() {
        assert!(matches!(AppConfig::default().validate(), Err(SmlError::Config(_))));
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = valid();
        config.nominal_voltage = 0.0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.cycle_deadline_ms = 5;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.log_level = "chatty".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sign_of_life_minutes() {
        let mut config = valid();
        config.sign_of_life_minutes = 10;
        assert_eq!(config.polling().sign_of_life, Some(Duration::from_secs(600)));
    }
}
