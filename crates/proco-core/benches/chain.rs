use criterion::{criterion_group, criterion_main, Criterion};
use proco_core::{constants, crypto::KeyPair, genesis_block, ChainStore};

fn bench_chain(c: &mut Criterion) {
    let key = KeyPair::generate();
    let chain = ChainStore::new(genesis_block(
        constants::GENESIS_DATA,
        constants::GENESIS_TIMESTAMP,
    ));
    for i in 0..200u64 {
        let txs = (0..10).map(|j| key.transfer("bob", i * 10 + j)).collect();
        chain
            .append_local(format!("bench block {i}"), txs)
            .expect("append");
    }

    c.bench_function("validate_chain_200_blocks", |b| {
        b.iter(|| {
            let _validity = chain.validate_chain();
        });
    });

    c.bench_function("append_local_10_txs", |b| {
        let txs: Vec<_> = (0..10).map(|j| key.transfer("carol", j)).collect();
        b.iter(|| {
            let _block = chain.append_local("bench", txs.clone());
        });
    });
}

criterion_group!(benches, bench_chain);
criterion_main!(benches);
