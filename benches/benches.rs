use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::prelude::*;
use spectro_capture::{
    capture::{Capture, CaptureRingBuffer},
    codec::reply,
    Nsp32Codec, PacketCodec,
};

// Channel count of the sensor
const CHANNELS: usize = 135;
const HISTORY: usize = 100;

fn benchmark(c: &mut Criterion) {
    let mut rng = rand::thread_rng();

    let dummy_spectrum: Vec<f32> = (0..CHANNELS).map(|_| rng.gen()).collect();
    let capture: Capture = Arc::from(dummy_spectrum.clone());

    // Containers
    let mut ring = CaptureRingBuffer::new(HISTORY).unwrap();
    for _ in 0..HISTORY {
        ring.insert(capture.clone());
    }
    let frame = reply::spectrum(0, 20, &dummy_spectrum);
    let mut codec = Nsp32Codec::new();

    c.bench_function("ring insert", |b| {
        b.iter(|| ring.insert(black_box(capture.clone())))
    });

    c.bench_function("channel series", |b| {
        b.iter(|| ring.channel_series(black_box(CHANNELS / 2)))
    });

    c.bench_function("averaged series", |b| {
        b.iter(|| ring.averaged_series(black_box(&[10, 20, 30, 40])))
    });

    c.bench_function("decode spectrum frame", |b| {
        b.iter(|| codec.feed(black_box(&frame)))
    });
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
