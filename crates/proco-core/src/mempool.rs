use crate::{Transaction, TxId};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Deduplicated staging area for transactions that no accepted block includes yet.
#[derive(Default)]
pub struct Mempool {
    entries: Mutex<HashMap<TxId, Transaction>>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `id` was not present. An existing entry is never overwritten.
    pub fn add(&self, id: TxId, tx: Transaction) -> bool {
        let mut entries = self.entries.lock();
        if entries.contains_key(&id) {
            return false;
        }
        entries.insert(id, tx);
        true
    }

    pub fn remove(&self, id: &str) {
        self.entries.lock().remove(id);
    }

    /// Removes every listed id, returning how many were actually present.
    pub fn remove_all<'a>(&self, ids: impl IntoIterator<Item = &'a TxId>) -> usize {
        let mut entries = self.entries.lock();
        ids.into_iter()
            .filter(|id| entries.remove(id.as_str()).is_some())
            .count()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().contains_key(id)
    }

    /// Point-in-time copy of the pending payloads.
    pub fn list(&self) -> Vec<Transaction> {
        self.entries.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Signature;

    fn tx(amount: u64) -> Transaction {
        Transaction {
            sender: "alice".into(),
            recipient: "bob".into(),
            amount,
            signature: Signature::default(),
        }
    }

    #[test]
    fn add_is_idempotent() {
        let pool = Mempool::new();
        let t = tx(1);
        assert!(pool.add(t.id(), t.clone()));
        let after_first = pool.list().len();
        assert!(!pool.add(t.id(), t));
        assert_eq!(pool.list().len(), after_first);
    }

    #[test]
    fn add_never_overwrites() {
        let pool = Mempool::new();
        pool.add("same".into(), tx(1));
        pool.add("same".into(), tx(2));
        assert_eq!(pool.list(), vec![tx(1)]);
    }

    #[test]
    fn remove_absent_is_noop() {
        let pool = Mempool::new();
        pool.remove("missing");
        let t = tx(3);
        pool.add(t.id(), t.clone());
        pool.remove(&t.id());
        pool.remove(&t.id());
        assert!(pool.is_empty());
    }

    #[test]
    fn snapshot_is_not_affected_by_later_mutation() {
        let pool = Mempool::new();
        let a = tx(1);
        pool.add(a.id(), a.clone());
        let snapshot = pool.list();
        let b = tx(2);
        pool.add(b.id(), b);
        pool.remove(&a.id());
        assert_eq!(snapshot, vec![a]);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn remove_all_counts_present_ids() {
        let pool = Mempool::new();
        let txs: Vec<_> = (0..4).map(tx).collect();
        for t in &txs {
            pool.add(t.id(), t.clone());
        }
        let ids: Vec<TxId> = vec![txs[0].id(), txs[1].id(), "unknown".into()];
        assert_eq!(pool.remove_all(&ids), 2);
        assert_eq!(pool.remove_all(&ids), 0);
        assert_eq!(pool.len(), 2);
        assert!(pool.contains(&txs[2].id()));
    }
}
