use std::net::{IpAddr, Ipv4Addr};

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rand::Rng;
use stream_core::{
    Engine, EngineConfig, FlowKey, HalfKey, PatternMatcher, Rule, RuleSet, SegmentInput,
};

fn rules(count: usize) -> Vec<Rule> {
    (0..count)
        .map(|i| Rule::new(format!("signature-{i:04}").into_bytes(), format!("rule {i}")))
        .collect()
}

fn flow_key(src_port: u16) -> FlowKey {
    FlowKey::new(
        HalfKey::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), src_port),
        HalfKey::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 80),
    )
}

// Raw automaton throughput over clean (non-matching) traffic.
fn bench_matcher_feed(c: &mut Criterion) {
    let rule_set = RuleSet::new(rules(1024), 2048).unwrap();
    let matcher = PatternMatcher::new(&rule_set).unwrap();

    let mut rng = rand::rng();
    let payload: Vec<u8> = (0..64 * 1024).map(|_| rng.random_range(b'a'..=b'z')).collect();

    let mut group = c.benchmark_group("matcher");
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("feed_64k_clean", |b| {
        b.iter(|| {
            let mut state = matcher.initial_state();
            let mut hits = 0u64;
            matcher.feed(&mut state, &payload, |_| hits += 1);
            black_box(hits)
        })
    });
    group.finish();
}

// Whole pipeline per segment: flow lookup, reassembly, scan, dedup.
fn bench_engine_process(c: &mut Criterion) {
    let payload = Bytes::from(vec![b'x'; 1460]);

    let mut group = c.benchmark_group("engine");
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("process_in_order_segment", |b| {
        let mut engine = Engine::new(EngineConfig::default(), rules(1024)).unwrap();
        let key = flow_key(40000);
        let mut offset = 0u64;
        b.iter(|| {
            let input = SegmentInput::new(key.clone(), offset, payload.clone());
            offset += payload.len() as u64;
            black_box(engine.process(&input))
        })
    });
    group.finish();
}

// Segment that actually matches and raises an alert on a fresh flow.
fn bench_engine_alert_path(c: &mut Criterion) {
    let payload = Bytes::from_static(b"....signature-0000....");

    c.bench_function("engine_alert_on_fresh_flow", |b| {
        let mut engine = Engine::new(EngineConfig::default(), rules(1024)).unwrap();
        let mut src_port = 1024u16;
        b.iter(|| {
            src_port = src_port.wrapping_add(1).max(1024);
            let mut input = SegmentInput::new(flow_key(src_port), 0, payload.clone());
            input.terminal = true;
            black_box(engine.process(&input))
        })
    });
}

criterion_group!(
    benches,
    bench_matcher_feed,
    bench_engine_process,
    bench_engine_alert_path
);
criterion_main!(benches);
