#![allow(dead_code)]

use std::fs;

use proco_core::{constants, crypto::KeyPair, genesis_block, ChainStore, Snapshot};
use proco_storage::sled_store::SledStore;
use rand::Rng;
use tempfile::{tempdir, TempDir};

pub fn create_temp_dir() -> (TempDir, std::path::PathBuf) {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let db_path = temp_dir.path().to_path_buf();
    (temp_dir, db_path)
}

pub fn create_temp_store() -> (TempDir, SledStore) {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let db_path = temp_dir.path().to_path_buf();
    (
        temp_dir,
        SledStore::open(db_path.to_str().unwrap()).expect("Failed to open SledStore"),
    )
}

/// A chain of `num_blocks` signed blocks on top of the default genesis plus
/// `pending` transactions that no block includes.
pub fn sample_snapshot(num_blocks: usize, pending: usize) -> Snapshot {
    let mut rng = rand::thread_rng();
    let key = KeyPair::generate();
    let chain = ChainStore::new(genesis_block(
        constants::GENESIS_DATA,
        constants::GENESIS_TIMESTAMP,
    ));
    for i in 0..num_blocks {
        let txs = (0..3)
            .map(|_| key.transfer("bob", rng.gen_range(1..1_000)))
            .collect();
        chain
            .append_local(format!("Block with 3 TXs ({i})"), txs)
            .expect("append");
    }
    let mempool = (0..pending)
        .map(|_| key.transfer("carol", rng.gen_range(1..1_000)))
        .collect();
    Snapshot {
        blocks: chain.blocks(),
        mempool,
    }
}

pub fn teardown_store(temp_dir: TempDir, store: SledStore) {
    let db_path = temp_dir.path().to_path_buf();
    store.clear().expect("Failed to clear the store");
    drop(store);
    temp_dir.close().expect("Failed to delete temp dir");
    let _ = fs::remove_dir_all(&db_path);
    assert!(!db_path.exists(), "Database directory should be removed");
}
