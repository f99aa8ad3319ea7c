//! Benchmarks for zebu record signing and verification

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use zebu_core::{ContentId, NameRecord};
use zebu_crypto::{sign_record, verify_record, Keypair};

fn bench_sign_record(c: &mut Criterion) {
    let keypair = Keypair::generate();
    let record = NameRecord::unsigned(keypair.identity(), ContentId::from("Qmprofile"), 1);

    c.bench_function("sign_record", |b| {
        b.iter(|| sign_record(black_box(&record), &keypair))
    });
}

fn bench_verify_record(c: &mut Criterion) {
    let keypair = Keypair::generate();
    let record = NameRecord::unsigned(keypair.identity(), ContentId::from("Qmprofile"), 1);
    let signed = sign_record(&record, &keypair).unwrap();

    c.bench_function("verify_record", |b| {
        b.iter(|| black_box(verify_record(black_box(&signed))))
    });
}

fn bench_decode_record(c: &mut Criterion) {
    let keypair = Keypair::generate();
    let record = NameRecord::unsigned(keypair.identity(), ContentId::from("Qmprofile"), 1);
    let bytes = sign_record(&record, &keypair).unwrap().encode().unwrap();

    c.bench_function("decode_record", |b| {
        b.iter(|| NameRecord::decode(black_box(&bytes)))
    });
}

criterion_group!(
    benches,
    bench_sign_record,
    bench_verify_record,
    bench_decode_record
);
criterion_main!(benches);
