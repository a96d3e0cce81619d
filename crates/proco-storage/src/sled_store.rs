use crate::SnapshotStore;
use anyhow::{Context, Result};
use proco_core::{Block, Snapshot, Transaction};
use sled::transaction::{ConflictableTransactionError, TransactionResult};
use sled::{Db, IVec, Transactional, Tree};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

const TREE_BLOCKS: &str = "blocks";
const TREE_MEMPOOL: &str = "mempool";
const KEY_TIP_HEIGHT: &[u8] = b"tip_height";
const KEY_TIP_HASH: &[u8] = b"tip_hash";

type Entries = Vec<(Vec<u8>, Vec<u8>)>;

/// A fully encoded snapshot that has not touched the database yet. Dropping
/// it leaves the stored snapshot as it was.
pub struct StagedSnapshot<'a> {
  store: &'a SledStore,
  blocks: Entries,
  mempool: Entries,
  stale_blocks: Vec<IVec>,
  stale_mempool: Vec<IVec>,
  tip: Option<(u64, String)>,
}

impl StagedSnapshot<'_> {
  /// Writes blocks, mempool and tip metadata in one sled transaction.
  pub fn commit(self) -> Result<()> {
    let store = self.store;
    let result: TransactionResult<(), ()> = (&store.blocks, &store.mempool, &*store.db)
      .transaction(|(blocks, mempool, meta)| {
        for key in &self.stale_blocks {
          blocks.remove(&key[..])?;
        }
        for key in &self.stale_mempool {
          mempool.remove(&key[..])?;
        }
        for (key, value) in &self.blocks {
          blocks.insert(key.as_slice(), value.as_slice())?;
        }
        for (key, value) in &self.mempool {
          mempool.insert(key.as_slice(), value.as_slice())?;
        }
        match &self.tip {
          Some((height, hash)) => {
            meta.insert(KEY_TIP_HEIGHT, &height.to_be_bytes()[..])?;
            meta.insert(KEY_TIP_HASH, hash.as_bytes())?;
          }
          None => {
            meta.remove(KEY_TIP_HEIGHT)?;
            meta.remove(KEY_TIP_HASH)?;
          }
        }
        Ok::<(), ConflictableTransactionError<()>>(())
      });
    result.map_err(|e| anyhow::anyhow!("sled snapshot transaction failed: {e:?}"))?;
    store.db.flush()?;
    Ok(())
  }
}

#[derive(Clone)]
pub struct SledStore {
  db: Db,
  blocks: Tree,
  mempool: Tree,
}

impl SledStore {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
    let db = sled::open(path).context("open sled database")?;
    let blocks = db.open_tree(TREE_BLOCKS).context("open blocks tree")?;
    let mempool = db.open_tree(TREE_MEMPOOL).context("open mempool tree")?;
    info!("sled store opened");
    Ok(Self {
      db,
      blocks,
      mempool,
    })
  }

  pub fn tip_height(&self) -> Result<Option<u64>> {
    Ok(self.db.get(KEY_TIP_HEIGHT)?.map(|v| {
      let mut arr = [0u8; 8];
      arr.copy_from_slice(&v);
      u64::from_be_bytes(arr)
    }))
  }

  pub fn tip_hash(&self) -> Result<Option<String>> {
    Ok(
      self
        .db
        .get(KEY_TIP_HASH)?
        .map(|v| String::from_utf8_lossy(&v).into_owned()),
    )
  }

  pub fn get_block(&self, index: u64) -> Result<Option<Block>> {
    match self.blocks.get(index.to_be_bytes())? {
      Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
      None => Ok(None),
    }
  }

  /// Encodes `snapshot` and works out which stored keys it drops.
  pub fn stage(&self, snapshot: &Snapshot) -> Result<StagedSnapshot<'_>> {
    let blocks = snapshot
      .blocks
      .iter()
      .map(|block| Ok((block.index.to_be_bytes().to_vec(), bincode::serialize(block)?)))
      .collect::<Result<Entries>>()?;
    let mempool = snapshot
      .mempool
      .iter()
      .map(|tx| Ok((tx.id().into_bytes(), bincode::serialize(tx)?)))
      .collect::<Result<Entries>>()?;
    Ok(StagedSnapshot {
      store: self,
      stale_blocks: stale_keys(&self.blocks, &blocks)?,
      stale_mempool: stale_keys(&self.mempool, &mempool)?,
      blocks,
      mempool,
      tip: snapshot.blocks.last().map(|tip| (tip.index, tip.hash.clone())),
    })
  }

  pub fn clear(&self) -> Result<()> {
    self.blocks.clear()?;
    self.mempool.clear()?;
    self.db.remove(KEY_TIP_HEIGHT)?;
    self.db.remove(KEY_TIP_HASH)?;
    self.db.flush()?;
    Ok(())
  }
}

impl SnapshotStore for SledStore {
  fn save(&self, snapshot: &Snapshot) -> Result<()> {
    self.stage(snapshot)?.commit()?;
    debug!(
      blocks = snapshot.blocks.len(),
      pending = snapshot.mempool.len(),
      "snapshot written to sled"
    );
    Ok(())
  }

  fn load(&self) -> Result<Option<Snapshot>> {
    if self.blocks.is_empty() {
      return Ok(None);
    }
    // Big-endian keys iterate in index order.
    let blocks = self
      .blocks
      .iter()
      .values()
      .map(|v| Ok(bincode::deserialize::<Block>(&v?)?))
      .collect::<Result<Vec<_>>>()?;
    let mempool = self
      .mempool
      .iter()
      .values()
      .map(|v| Ok(bincode::deserialize::<Transaction>(&v?)?))
      .collect::<Result<Vec<_>>>()?;
    Ok(Some(Snapshot { blocks, mempool }))
  }
}

/// Keys present in `tree` that `keep` does not rewrite.
fn stale_keys(tree: &Tree, keep: &Entries) -> Result<Vec<IVec>> {
  let keep: HashSet<&[u8]> = keep.iter().map(|(key, _)| key.as_slice()).collect();
  let mut stale = Vec::new();
  for key in tree.iter().keys() {
    let key = key?;
    if !keep.contains(&key[..]) {
      stale.push(key);
    }
  }
  Ok(stale)
}
