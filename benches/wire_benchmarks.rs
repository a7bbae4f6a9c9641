use bytes::BytesMut;
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use tether::{MsgType, WriteQueue, decode_frame, encode_frame};

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    for size in [4usize, 64, 4 * 1024, 64 * 1024] {
        let payload = vec![0xA5u8; size];
        group.bench_function(format!("{size}B"), |b| {
            b.iter(|| encode_frame(black_box(MsgType::Log), black_box(&payload)).unwrap())
        });
    }
    group.finish();
}

fn bench_decode_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    for size in [4usize, 64, 4 * 1024] {
        let payload = vec![0x5Au8; size];
        let frame = encode_frame(MsgType::Command, &payload).unwrap();
        let mut stream = Vec::new();
        for _ in 0..64 {
            stream.extend_from_slice(&frame);
        }
        group.bench_function(format!("64x{size}B"), |b| {
            b.iter(|| {
                let mut buf = BytesMut::from(&stream[..]);
                let mut frames = 0;
                while let Some(frame) = decode_frame(&mut buf).unwrap() {
                    black_box(&frame);
                    frames += 1;
                }
                assert_eq!(frames, 64);
            })
        });
    }
    group.finish();
}

fn bench_queue_cycle(c: &mut Criterion) {
    let frame = encode_frame(MsgType::Log, &[0u8; 64]).unwrap();

    c.bench_function("queue_push_pop", |b| {
        let mut queue = WriteQueue::new(1024);
        b.iter(|| {
            queue.push(frame.clone());
            let reservation = queue.reserve_oldest().unwrap();
            black_box(reservation.bytes());
            reservation.complete();
        })
    });

    c.bench_function("queue_overflow_churn", |b| {
        let mut queue = WriteQueue::new(16);
        b.iter(|| queue.push(frame.clone()))
    });
}

criterion_group!(benches, bench_encode, bench_decode_stream, bench_queue_cycle);
criterion_main!(benches);
