#![no_main]

use libfuzzer_sys::fuzz_target;
use sml_gridmeter::sml::frame::{pack_frame, CrcAlgorithm, FrameAssembler};
use sml_gridmeter::RecordDecoder;

fuzz_target!(|data: &[u8]| {
    // Raw stream: must never panic, whatever the chunking
    let split = data.first().map_or(1, |b| usize::from(*b).max(1));
    let mut assembler = FrameAssembler::default();
    for chunk in data.chunks(split) {
        assembler.push(chunk);
        while let Some(frame) = assembler.try_next_frame() {
            let _ = RecordDecoder::new().with_serial(true).decode(&frame);
        }
    }

    // Wrapped as a valid frame the payload must come back unchanged
    let mut assembler = FrameAssembler::new(CrcAlgorithm::X25);
    assembler.push(&pack_frame(data, CrcAlgorithm::X25));
    let frame = assembler.try_next_frame();
    assert_eq!(frame.as_ref().map(|f| f.payload()), Some(data));
});
