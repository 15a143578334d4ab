use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use linklayer_core::{Frame, FrameKind, MacAddr};
use std::hint::black_box;

const SRC: MacAddr = MacAddr::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);

fn bench_frame_decode(c: &mut Criterion) {
    let sizes: Vec<(usize, &str)> = vec![
        (10, "10_bytes"),
        (64, "64_bytes"),
        (512, "512_bytes"),
        (1500, "1500_bytes"),
    ];

    let mut group = c.benchmark_group("frame_decode_by_size");

    for kind in [FrameKind::Ieee8023, FrameKind::Ieee80211] {
        for (size, name) in &sizes {
            let bytes = Frame::synthetic(kind, SRC, 0x88B5, *size).unwrap().encode();
            group.throughput(Throughput::Bytes(bytes.len() as u64));
            group.bench_function(format!("{kind:?}/{name}"), |b| {
                b.iter(|| Frame::decode(black_box(&bytes), kind))
            });
        }
    }

    group.finish();
}

fn bench_frame_encode(c: &mut Criterion) {
    let frame = Frame::synthetic(FrameKind::Ieee8023, SRC, 0x88B5, 1500).unwrap();

    let mut group = c.benchmark_group("frame_encode");
    group.throughput(Throughput::Bytes(1514));

    group.bench_function("ieee8023_1514_bytes", |b| b.iter(|| black_box(&frame).encode()));
    group.bench_function("synthetic_build_and_encode", |b| {
        b.iter(|| {
            Frame::synthetic(FrameKind::Ieee8023, SRC, black_box(0x88B5), 10)
                .map(|f| f.encode())
        })
    });

    group.finish();
}

fn bench_frame_describe(c: &mut Criterion) {
    let frame = Frame::synthetic(FrameKind::Ieee8023, SRC, 0x0800, 64).unwrap();

    c.bench_function("describe_64_byte_payload", |b| b.iter(|| black_box(&frame).describe()));
}

criterion_group!(benches, bench_frame_decode, bench_frame_encode, bench_frame_describe);
criterion_main!(benches);
