//! # Published Measurements
//!
//! The grid meter reports one total power figure. Consumers on the telemetry
//! bus expect a three-phase grid meter, so [`derive`] splits the total evenly
//! across three synthetic phases at a nominal voltage. This is an
//! approximation: the per-phase values are labelled as derived from
//! [`DerivationPolicy`], not measured.

use serde::Serialize;

use crate::constants::DEFAULT_NOMINAL_VOLTAGE;
use crate::payload::record::MeterSample;

/// Parameters of the synthetic three-phase split.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivationPolicy {
    /// Voltage reported for every phase, and used to derive currents
    pub nominal_voltage: f64,
}

impl Default for DerivationPolicy {
    fn default() -> Self {
        Self {
            nominal_voltage: DEFAULT_NOMINAL_VOLTAGE,
        }
    }
}

/// Values of one phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PhaseMeasurement {
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub power: Option<f64>,
}

/// The set of values published per cycle. `None` is published as null.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PublishedMeasurement {
    /// W, positive while drawing from the grid
    pub power: Option<f64>,
    pub current: Option<f64>,
    pub voltage: Option<f64>,
    pub phases: [PhaseMeasurement; 3],
    /// kWh
    pub energy_forward: Option<f64>,
    /// kWh
    pub energy_reverse: Option<f64>,
}

impl PublishedMeasurement {
    /// Sentinel telling consumers the meter is gone: every field cleared.
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn is_unavailable(&self) -> bool {
        *self == Self::unavailable()
    }
}

/// Derives the published values from one sample.
pub fn derive(sample: &MeterSample, policy: &DerivationPolicy) -> PublishedMeasurement {
    let voltage = policy.nominal_voltage;
    let total = sample.power_w;
    let phase_power = total / 3.0;

    let phase = PhaseMeasurement {
        voltage: Some(voltage),
        current: Some(phase_power / voltage),
        power: Some(phase_power),
    };

    PublishedMeasurement {
        power: Some(total),
        current: Some(total / voltage),
        voltage: Some(voltage),
        phases: [phase; 3],
        energy_forward: sample.energy_forward_wh.map(wh_to_kwh),
        energy_reverse: Some(sample.energy_reverse_wh.map_or(0.0, wh_to_kwh)),
    }
}

fn wh_to_kwh(wh: f64) -> f64 {
    wh / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(power_w: f64) -> MeterSample {
        MeterSample {
            manufacturer: None,
            serial: None,
            power_w,
            energy_forward_wh: Some(12_345_678.9),
            energy_reverse_wh: None,
        }
    }

    #[test]
    fn test_even_split() {
        let m = derive(&sample(900.0), &DerivationPolicy::default());
        for phase in &m.phases {
            assert_eq!(phase.power, Some(300.0));
            assert_eq!(phase.voltage, Some(230.0));
            assert!((phase.current.unwrap() - 1.304).abs() < 1e-3);
        }
        assert_eq!(m.power, Some(900.0));
    }

    #[test]
    fn test_energy_in_kwh_and_reverse_defaults_to_zero() {
        let m = derive(&sample(0.0), &DerivationPolicy::default());
        assert!((m.energy_forward.unwrap() - 12_345.6789).abs() < 1e-9);
        assert_eq!(m.energy_reverse, Some(0.0));
    }

    #[test]
    fn test_feed_in_keeps_sign() {
        let m = derive(&sample(-350.0), &DerivationPolicy::default());
        assert!(m.phases.iter().all(|p| p.power.unwrap() < 0.0));
        assert!(m.current.unwrap() < 0.0);
    }

    #[test]
    fn test_unavailable_is_all_null() {
        let m = PublishedMeasurement::unavailable();
        assert!(m.is_unavailable());
        assert!(m.power.is_none() && m.energy_forward.is_none());
        assert!(m.phases.iter().all(|p| *p == PhaseMeasurement::default()));
        assert!(!derive(&sample(1.0), &DerivationPolicy::default()).is_unavailable());
    }
}
