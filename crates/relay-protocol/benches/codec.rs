//! Codec benchmarks for relay-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use relay_protocol::{codec, Envelope, Frame};

fn message_frame(size: usize) -> Frame {
    Frame::Message(Envelope {
        id: "msg_0123456789abcdef0123456789abcdef".into(),
        from: "client_0123456789abcdef0123456789abcdef".into(),
        to: None,
        content: "x".repeat(size),
        timestamp: 1_700_000_000_000,
    })
}

fn bench_binary(c: &mut Criterion) {
    let frame = message_frame(64);
    let encoded = codec::encode(&frame).unwrap();

    let mut group = c.benchmark_group("binary");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("encode_64B", |b| b.iter(|| codec::encode(black_box(&frame))));
    group.bench_function("decode_64B", |b| {
        b.iter(|| codec::decode(black_box(&encoded)))
    });
    group.finish();
}

fn bench_text(c: &mut Criterion) {
    let frame = message_frame(64);
    let encoded = codec::encode_text(&frame).unwrap();

    let mut group = c.benchmark_group("text");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("encode_64B", |b| {
        b.iter(|| codec::encode_text(black_box(&frame)))
    });
    group.bench_function("decode_64B", |b| {
        b.iter(|| codec::decode_text(black_box(&encoded)))
    });
    group.finish();
}

fn bench_roundtrip(c: &mut Criterion) {
    let frame = message_frame(256);

    c.bench_function("roundtrip_256B", |b| {
        b.iter(|| {
            let encoded = codec::encode(black_box(&frame)).unwrap();
            codec::decode(black_box(&encoded)).unwrap()
        })
    });
}

criterion_group!(benches, bench_binary, bench_text, bench_roundtrip);
criterion_main!(benches);
