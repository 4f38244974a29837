use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sml_gridmeter::sml::frame::{CrcAlgorithm, FrameAssembler};
use sml_gridmeter::sml::serial_mock::MockReading;
use sml_gridmeter::RecordDecoder;

fn telegram() -> Vec<u8> {
    MockReading {
        power_w: Some(-1234),
        energy_wh_tenths: Some(123_456_789),
        reverse_wh_tenths: Some(98_765),
        ..Default::default()
    }
    .to_frame(CrcAlgorithm::X25)
}

fn benchmark_assemble(c: &mut Criterion) {
    let wire = telegram();
    let mut group = c.benchmark_group("assemble");
    group.throughput(Throughput::Bytes(wire.len() as u64));

    for chunk_size in [1usize, 16, 64, wire.len()] {
        group.bench_with_input(BenchmarkId::from_parameter(chunk_size), &chunk_size, |b, &size| {
            b.iter(|| {
                let mut assembler = FrameAssembler::new(CrcAlgorithm::X25);
                let mut frames = 0;
                for chunk in wire.chunks(size) {
                    assembler.push(black_box(chunk));
                    if assembler.try_next_frame().is_some() {
                        frames += 1;
                    }
                }
                black_box(frames)
            })
        });
    }
    group.finish();
}

fn benchmark_decode(c: &mut Criterion) {
    let mut assembler = FrameAssembler::default();
    assembler.push(&telegram());
    let Some(frame) = assembler.try_next_frame() else {
        panic!("benchmark telegram does not assemble");
    };
    let decoder = RecordDecoder::new().with_serial(true);

    c.bench_function("decode_sample", |b| {
        b.iter(|| {
            let _ = black_box(decoder.decode(black_box(&frame)));
        })
    });
}

criterion_group!(benches, benchmark_assemble, benchmark_decode);
criterion_main!(benches);
