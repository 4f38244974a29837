#![no_main]

use libfuzzer_sys::fuzz_target;
use sml_gridmeter::payload::value::parse_value;

fuzz_target!(|data: &[u8]| {
    if let Ok((rest, value)) = parse_value(data) {
        assert!(rest.len() < data.len());
        // Whatever parsed must encode to something that parses back the same
        let encoded = value.to_bytes();
        if let Ok((_, reparsed)) = parse_value(&encoded) {
            assert_eq!(reparsed, value);
        }
    }
});
