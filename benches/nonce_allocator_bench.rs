//! Benchmarks for nonce allocation and transaction building
//!
//! - Single-identity allocation (hot entry)
//! - Allocation across many bound identities
//! - Contended allocation from several threads
//! - Build + sign with an allocated nonce

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ledger_orchestrator::{AccountAddress, ChainIdHash, KeyPair, NonceProvider, RawTransaction};
use std::sync::Arc;

fn address(i: u32) -> AccountAddress {
    let mut bytes = [0u8; 32];
    bytes[..4].copy_from_slice(&i.to_be_bytes());
    AccountAddress::from_public_key(bytes)
}

fn bench_single_identity(c: &mut Criterion) {
    let provider = NonceProvider::new();
    let identity = address(0);
    provider.bind(&identity, 0);

    c.bench_function("allocate_single_identity", |b| {
        b.iter(|| black_box(provider.allocate(black_box(&identity)).unwrap()));
    });
}

fn bench_many_identities(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_many_identities");

    for count in [10u32, 100, 1000].iter() {
        let provider = NonceProvider::with_capacity(*count as usize);
        let identities: Vec<AccountAddress> = (0..*count).map(address).collect();
        for identity in &identities {
            provider.bind(identity, 0);
        }

        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, _| {
            let mut i = 0usize;
            b.iter(|| {
                i = (i + 1) % identities.len();
                black_box(provider.allocate(&identities[i]).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_contended");

    for threads in [2usize, 4, 8].iter() {
        let provider = Arc::new(NonceProvider::new());
        let identity = address(7);
        provider.bind(&identity, 0);

        group.bench_with_input(BenchmarkId::from_parameter(threads), threads, |b, &threads| {
            b.iter(|| {
                std::thread::scope(|scope| {
                    for _ in 0..threads {
                        let provider = provider.clone();
                        let identity = identity.clone();
                        scope.spawn(move || {
                            for _ in 0..100 {
                                black_box(provider.allocate(&identity).unwrap());
                            }
                        });
                    }
                });
            });
        });
    }

    group.finish();
}

fn bench_build_and_sign(c: &mut Criterion) {
    let provider = NonceProvider::new();
    let key = KeyPair::generate();
    provider.bind(key.address(), 0);
    let chain = ChainIdHash::from([1u8; 32]);
    let receiver = address(9);

    c.bench_function("allocate_build_sign_transfer", |b| {
        b.iter(|| {
            let nonce = provider.allocate(key.address()).unwrap();
            let raw = RawTransaction::transfer()
                .chain_id_hash(chain)
                .from(key.address().clone())
                .to(receiver.clone())
                .amount(1)
                .nonce(nonce)
                .build()
                .unwrap();
            black_box(key.sign_digest_sync(&raw.hash()))
        });
    });
}

criterion_group!(
    benches,
    bench_single_identity,
    bench_many_identities,
    bench_contended,
    bench_build_and_sign,
);
criterion_main!(benches);
