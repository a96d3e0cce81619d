//! Snapshot persistence for a node's chain and mempool.
//!
//! Both backends honour the same contract: `save` followed by `load` yields a
//! snapshot equivalent to the one saved. Failures are returned to the caller;
//! they never touch the in-memory state the snapshot was taken from.

pub mod json_store;
pub mod sled_store;

use anyhow::Result;
use proco_core::Snapshot;

pub trait SnapshotStore: Send + Sync {
    fn save(&self, snapshot: &Snapshot) -> Result<()>;

    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> Result<Option<Snapshot>>;
}
