//! Latency benchmarks for Relay.
//!
//! These benchmarks focus on the time from `send` to delivery.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use relay_bench::{engine_with_sessions, payload};
use relay_protocol::{codec, Frame};
use std::time::Instant;

/// Benchmark round-trip encode/decode latency.
fn bench_codec_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec_roundtrip");

    let frame = Frame::direct("client_2", payload(256));

    group.bench_function("binary_256B", |b| {
        b.iter(|| {
            let encoded = codec::encode(black_box(&frame)).unwrap();
            codec::decode(black_box(&encoded)).unwrap()
        });
    });

    group.bench_function("text_256B", |b| {
        b.iter(|| {
            let encoded = codec::encode_text(black_box(&frame)).unwrap();
            codec::decode_text(black_box(&encoded)).unwrap()
        });
    });

    group.finish();
}

/// Benchmark send + push receive latency.
fn bench_push_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("push_latency");

    group.bench_function("direct", |b| {
        b.iter_custom(|iters| {
            let (relay, ids) = engine_with_sessions(2, 1_000);
            let mut rx = relay.subscribe(&ids[1]).unwrap();

            let start = Instant::now();
            for _ in 0..iters {
                relay.send(&ids[0], Some(ids[1].clone()), "ping").unwrap();
                let _ = rx.try_recv();
            }
            start.elapsed()
        });
    });

    group.bench_function("broadcast_ten_subscribers", |b| {
        b.iter_custom(|iters| {
            let (relay, ids) = engine_with_sessions(11, 1_000);
            let mut rxs: Vec<_> = ids[1..]
                .iter()
                .map(|id| relay.subscribe(id).unwrap())
                .collect();

            let start = Instant::now();
            for _ in 0..iters {
                relay.send(&ids[0], None, "ping").unwrap();
                for rx in &mut rxs {
                    let _ = rx.try_recv();
                }
            }
            start.elapsed()
        });
    });

    group.finish();
}

/// Benchmark send + poll latency.
fn bench_poll_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("poll_latency");

    group.bench_function("direct", |b| {
        b.iter_custom(|iters| {
            let (relay, ids) = engine_with_sessions(2, 1_000);

            let start = Instant::now();
            for _ in 0..iters {
                relay.send(&ids[0], Some(ids[1].clone()), "ping").unwrap();
                let _ = relay.poll(&ids[1]).unwrap();
            }
            start.elapsed()
        });
    });

    group.finish();
}

/// Benchmark the expiry sweep over a populated registry.
fn bench_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("sweep");

    let (relay, ids) = engine_with_sessions(10_000, 1_000);
    for _ in 0..1_000 {
        relay.send(&ids[0], None, "hello").unwrap();
    }

    group.bench_function("nothing_expired", |b| b.iter(|| relay.sweep()));

    group.finish();
}

criterion_group!(
    benches,
    bench_codec_roundtrip,
    bench_push_latency,
    bench_poll_latency,
    bench_sweep,
);
criterion_main!(benches);
