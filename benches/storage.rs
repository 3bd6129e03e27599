//! Verdict store benchmark: insert and read with evidence encryption.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use v2i_ids::decision::Verdict;
use v2i_ids::message::Label;
use v2i_ids::storage::VerdictStore;
use tempfile::tempdir;

fn verdict(id: &str) -> Verdict {
    Verdict {
        verdict_id: id.to_string(),
        entity_id: "veh-0001".to_string(),
        window_start_ms: 1_000,
        window_end_ms: 2_000,
        label: Label::Dos,
        confidence: 0.91,
        evidence: vec![
            ("msg_rate".to_string(), 0.98),
            ("interarrival".to_string(), 0.03),
            ("seq_gap".to_string(), 0.42),
        ],
    }
}

fn bench_insert(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let store = VerdictStore::open(&dir.path().join("v.db"), b"bench-secret").unwrap();
    let v = verdict("vd-bench");

    c.bench_function("storage_insert_verdict", |b| {
        b.iter(|| black_box(store.insert(black_box(&v))).unwrap())
    });
}

fn bench_get(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let store = VerdictStore::open(&dir.path().join("v.db"), b"bench-secret").unwrap();
    store.insert(&verdict("vd-1")).unwrap();

    c.bench_function("storage_get_verdict", |b| {
        b.iter(|| black_box(store.get("vd-1")).unwrap())
    });
}

criterion_group!(benches, bench_insert, bench_get);
criterion_main!(benches);
