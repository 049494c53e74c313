use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::seq::SliceRandom;
use stream_core::SeqBuffer;

const SEGMENT: usize = 1460;
const SEGMENTS: usize = 64;

fn make_segments() -> Vec<(u64, Vec<u8>)> {
    (0..SEGMENTS)
        .map(|i| ((i * SEGMENT) as u64, vec![i as u8; SEGMENT]))
        .collect()
}

fn drain(seq: &mut SeqBuffer) -> usize {
    let mut total = 0;
    while let Some(run) = seq.assemble() {
        total += run.as_ref().len();
    }
    total
}

// In-order inserts: every segment extends the head run and is drained
// immediately, the zero-copy path.
fn bench_in_order(c: &mut Criterion) {
    let segments = make_segments();
    c.bench_function("reassembly_in_order", |b| {
        b.iter(|| {
            let mut seq = SeqBuffer::new(SEGMENT * SEGMENTS, 64, true);
            let mut total = 0;
            for (offset, data) in &segments {
                seq.insert(*offset, data, data.len() as u64, true, (0, 0));
                total += drain(&mut seq);
            }
            black_box(total)
        })
    });
}

// Reversed arrival: everything is buffered until the head segment lands.
fn bench_reversed(c: &mut Criterion) {
    let mut segments = make_segments();
    segments.reverse();
    c.bench_function("reassembly_reversed", |b| {
        b.iter(|| {
            let mut seq = SeqBuffer::new(SEGMENT * SEGMENTS, 64, true);
            for (offset, data) in &segments {
                seq.insert(*offset, data, data.len() as u64, true, (0, 0));
            }
            black_box(drain(&mut seq))
        })
    });
}

// Random arrival order, re-shuffled outside the timed loop.
fn bench_shuffled(c: &mut Criterion) {
    let mut segments = make_segments();
    segments.shuffle(&mut rand::rng());
    c.bench_function("reassembly_shuffled", |b| {
        b.iter(|| {
            let mut seq = SeqBuffer::new(SEGMENT * SEGMENTS, 64, true);
            let mut total = 0;
            for (offset, data) in &segments {
                seq.insert(*offset, data, data.len() as u64, true, (0, 0));
                total += drain(&mut seq);
            }
            black_box(total)
        })
    });
}

// Full retransmission of every segment on top of resident data.
fn bench_retransmission(c: &mut Criterion) {
    let segments = make_segments();
    c.bench_function("reassembly_retransmission", |b| {
        b.iter(|| {
            let mut seq = SeqBuffer::new(SEGMENT * SEGMENTS, 64, true);
            for (offset, data) in &segments {
                seq.insert(*offset, data, data.len() as u64, true, (0, 0));
                seq.insert(*offset, data, data.len() as u64, true, (0, 0));
            }
            black_box(drain(&mut seq))
        })
    });
}

criterion_group!(
    benches,
    bench_in_order,
    bench_reversed,
    bench_shuffled,
    bench_retransmission
);
criterion_main!(benches);
