//! Properties of the synthetic three-phase derivation.

use proptest::prelude::*;
use sml_gridmeter::{derive, DerivationPolicy, MeterSample};

fn sample(power_w: f64, forward: Option<f64>, reverse: Option<f64>) -> MeterSample {
    MeterSample {
        manufacturer: Some("EMH".to_string()),
        serial: None,
        power_w,
        energy_forward_wh: forward,
        energy_reverse_wh: reverse,
    }
}

#[test]
fn test_900_watts_at_230_volts() {
    let m = derive(&sample(900.0, None, None), &DerivationPolicy { nominal_voltage: 230.0 });
    for phase in &m.phases {
        assert_eq!(phase.power, Some(300.0));
        assert!((phase.current.unwrap() - 300.0 / 230.0).abs() < 1e-12);
        assert!((phase.current.unwrap() - 1.304).abs() < 5e-4);
    }
    assert_eq!(m.energy_forward, None);
    assert_eq!(m.energy_reverse, Some(0.0));
}

#[test]
fn test_bidirectional_energy_is_taken_from_meter() {
    let m = derive(
        &sample(-1200.0, Some(2_000_000.0), Some(750_500.0)),
        &DerivationPolicy::default(),
    );
    assert_eq!(m.energy_forward, Some(2000.0));
    assert_eq!(m.energy_reverse, Some(750.5));
}

#[test]
fn test_custom_nominal_voltage() {
    let m = derive(&sample(690.0, None, None), &DerivationPolicy { nominal_voltage: 115.0 });
    assert_eq!(m.voltage, Some(115.0));
    assert!(m.phases.iter().all(|p| p.voltage == Some(115.0)));
    assert!((m.phases[1].current.unwrap() - 2.0).abs() < 1e-12);
}

proptest! {
    #[test]
    fn prop_phases_sum_to_total(power in -1.0e6f64..1.0e6, voltage in 1.0f64..500.0) {
        let policy = DerivationPolicy { nominal_voltage: voltage };
        let m = derive(&sample(power, Some(1.0), None), &policy);
        let sum: f64 = m.phases.iter().map(|p| p.power.unwrap()).sum();
        prop_assert!((sum - power).abs() <= 1e-9 * power.abs().max(1.0));

        let current: f64 = m.phases.iter().map(|p| p.current.unwrap()).sum();
        prop_assert!((current - m.current.unwrap()).abs() <= 1e-9 * m.current.unwrap().abs().max(1.0));
    }

    #[test]
    fn prop_derive_is_deterministic(power in -1.0e6f64..1.0e6) {
        let s = sample(power, Some(5.0), Some(6.0));
        prop_assert_eq!(
            derive(&s, &DerivationPolicy::default()),
            derive(&s, &DerivationPolicy::default())
        );
    }
}
