//! Benchmarks for zebu directory merges

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use zebu_core::{ContentId, NameRecord};
use zebu_crypto::{sign_record, Keypair};
use zebu_state::{MemoryRecordStorage, RecordDirectory};

fn signed(keypair: &Keypair, seq: u64) -> NameRecord {
    let record = NameRecord::unsigned(keypair.identity(), ContentId::from("Qmprofile"), seq);
    sign_record(&record, keypair).unwrap()
}

fn bench_merge_stale(c: &mut Criterion) {
    let keypair = Keypair::generate();
    let directory = RecordDirectory::new(Arc::new(MemoryRecordStorage::new()));
    directory.try_merge(signed(&keypair, 10)).unwrap();
    let stale = signed(&keypair, 5);

    // the common case under republish: already known
    c.bench_function("directory_merge_stale", |b| {
        b.iter(|| directory.try_merge(black_box(stale.clone())))
    });
}

fn bench_merge_accepted(c: &mut Criterion) {
    let keypair = Keypair::generate();
    let record = signed(&keypair, 1);

    c.bench_function("directory_merge_accepted", |b| {
        b.iter_batched(
            || RecordDirectory::new(Arc::new(MemoryRecordStorage::new())),
            |directory| directory.try_merge(black_box(record.clone())),
            BatchSize::SmallInput,
        )
    });
}

fn bench_stage_next_sequence(c: &mut Criterion) {
    let keypair = Keypair::generate();
    let directory = RecordDirectory::new(Arc::new(MemoryRecordStorage::new()));
    directory.try_merge(signed(&keypair, 3)).unwrap();
    let owner = keypair.identity();

    c.bench_function("directory_stage_next_sequence", |b| {
        b.iter(|| directory.stage_next_sequence(black_box(&owner), ContentId::from("Qmnext")))
    });
}

criterion_group!(
    benches,
    bench_merge_stale,
    bench_merge_accepted,
    bench_stage_next_sequence
);
criterion_main!(benches);
