//! Benchmarks for core ledger operations.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use provchain_core::{
    block::{compute_hash, BlockData, EventPayload, EventType},
    chain::Chain,
    config::LedgerConfig,
    miner::{BlockSkeleton, Miner},
    util,
};

fn payload(product_id: u64) -> EventPayload {
    EventPayload {
        product_id,
        event_type: EventType::Shipped,
        occurred_at: "2024-01-01T00:00:00Z".into(),
        location: Some("Warehouse B".into()),
        actor: Some("carrier-x".into()),
        notes: None,
        attributes: None,
    }
}

fn bench_sha256(c: &mut Criterion) {
    let data = vec![0u8; 1024];
    c.bench_function("sha256_1kb", |b| {
        b.iter(|| util::sha256(black_box(&data)))
    });
}

fn bench_compute_hash(c: &mut Criterion) {
    let data = BlockData::Event(payload(42));
    c.bench_function("block_compute_hash", |b| {
        b.iter(|| compute_hash(black_box(1), 1_700_000_000, &data, "00ab", black_box(12345)).unwrap())
    });
}

fn bench_mine(c: &mut Criterion) {
    let miner = Miner::new(2, 10_000_000);
    let skeleton = BlockSkeleton {
        index: 1,
        timestamp: 1_700_000_000,
        data: BlockData::Event(payload(42)),
        previous_hash: "00ab".into(),
    };
    c.bench_function("mine_difficulty_2", |b| {
        b.iter(|| miner.mine(black_box(skeleton.clone())).unwrap())
    });
}

fn bench_validate(c: &mut Criterion) {
    let chain = Chain::new(&LedgerConfig::with_difficulty(1)).unwrap();
    for pid in 0..50 {
        chain.record(payload(pid % 5 + 1)).unwrap();
    }
    c.bench_function("validate_51_blocks", |b| b.iter(|| chain.validate()));
}

criterion_group!(benches, bench_sha256, bench_compute_hash, bench_mine, bench_validate);
criterion_main!(benches);
