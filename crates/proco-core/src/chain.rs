//! The canonical block log.
//!
//! A `ChainStore` owns one hash-linked sequence of blocks behind a single
//! mutex. Every operation that reads the tip or mutates the sequence runs under
//! that lock; digests of incoming blocks are computed before it is taken.
//!
//! Fork-choice: the store keeps the single longest valid chain it has seen. A
//! competing block at the tip's height replaces the tip only when its hash is
//! lexicographically smaller; shorter proposals are rejected outright.
//!
//! Alongside the blocks the store indexes every transaction id they carry, so
//! a transaction that already made it into the chain can be refused at the
//! mempool door.

use crate::{error::ChainError, now_secs, Block, Rejection, Transaction, TxId};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accepted {
    /// The block became the new tip.
    Extended,
    /// The block won the tie-break against the previous tip, which is returned.
    Replaced { displaced: Block },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainValidity {
    Valid,
    InvalidAt { index: u64, detail: String },
}

impl ChainValidity {
    pub fn is_valid(&self) -> bool {
        matches!(self, ChainValidity::Valid)
    }
}

impl fmt::Display for ChainValidity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainValidity::Valid => write!(f, "chain is valid"),
            ChainValidity::InvalidAt { detail, .. } => write!(f, "{detail}"),
        }
    }
}

struct Ledger {
    blocks: Vec<Block>,
    included: HashSet<TxId>,
}

impl Ledger {
    fn new(blocks: Vec<Block>) -> Self {
        let included = blocks.iter().flat_map(Block::tx_ids).collect();
        Self { blocks, included }
    }

    fn push(&mut self, block: Block) {
        self.included.extend(block.tx_ids());
        self.blocks.push(block);
    }
}

pub struct ChainStore {
    state: Mutex<Ledger>,
}

impl ChainStore {
    pub fn new(genesis: Block) -> Self {
        Self {
            state: Mutex::new(Ledger::new(vec![genesis])),
        }
    }

    /// Rebuilds a store from previously persisted blocks. The sequence must
    /// validate end to end.
    pub fn from_blocks(blocks: Vec<Block>) -> Result<Self, ChainError> {
        if blocks.is_empty() {
            return Err(ChainError::Empty);
        }
        if let ChainValidity::InvalidAt { detail, .. } = validate_blocks(&blocks) {
            return Err(ChainError::Corrupt(detail));
        }
        Ok(Self {
            state: Mutex::new(Ledger::new(blocks)),
        })
    }

    pub fn tip(&self) -> Result<Block, ChainError> {
        self.state.lock().blocks.last().cloned().ok_or(ChainError::Empty)
    }

    /// Index of the tip block.
    pub fn height(&self) -> u64 {
        self.state.lock().blocks.last().map(|b| b.index).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.state.lock().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().blocks.is_empty()
    }

    /// Point-in-time copy of the whole chain.
    pub fn blocks(&self) -> Vec<Block> {
        self.state.lock().blocks.clone()
    }

    pub fn block(&self, index: u64) -> Option<Block> {
        let state = self.state.lock();
        usize::try_from(index)
            .ok()
            .and_then(|i| state.blocks.get(i))
            .cloned()
    }

    pub fn genesis_hash(&self) -> Option<String> {
        self.state.lock().blocks.first().map(|b| b.hash.clone())
    }

    /// Whether some block on the current chain carries transaction `id`.
    pub fn contains_tx(&self, id: &str) -> bool {
        self.state.lock().included.contains(id)
    }

    /// Seals `transactions` into a new block on top of the current tip.
    pub fn append_local(
        &self,
        data: impl Into<String>,
        transactions: Vec<Transaction>,
    ) -> Result<Block, ChainError> {
        let data = data.into();
        let mut state = self.state.lock();
        let tip = state.blocks.last().ok_or(ChainError::Empty)?;
        let block = Block::new(
            tip.index + 1,
            tip.hash.clone(),
            now_secs(),
            data,
            transactions,
        );
        if !block.has_valid_hash() {
            return Err(ChainError::Corrupt(format!(
                "digest of freshly built block {} does not verify",
                block.index
            )));
        }
        state.push(block.clone());
        drop(state);

        info!(index = block.index, hash = %block.hash, txs = block.transactions.len(), "appended local block");
        Ok(block)
    }

    /// Decides whether a block proposed by someone else extends the chain.
    pub fn accept_remote(&self, block: Block) -> Result<Accepted, Rejection> {
        let computed = block.compute_hash();
        let mut state = self.state.lock();
        let tip = state.blocks.last().ok_or(Rejection::NoTip)?;
        let expected = tip.index + 1;

        if block.index == expected {
            if block.previous_hash != tip.hash {
                return Err(Rejection::BrokenLink {
                    index: block.index,
                    expected: tip.hash.clone(),
                    got: block.previous_hash,
                });
            }
            if computed != block.hash {
                return Err(Rejection::DigestMismatch {
                    index: block.index,
                    computed,
                    claimed: block.hash,
                });
            }
            debug!(index = block.index, hash = %block.hash, "remote block extends tip");
            state.push(block);
            return Ok(Accepted::Extended);
        }

        if block.index == tip.index && state.blocks.len() >= 2 {
            if computed != block.hash {
                return Err(Rejection::DigestMismatch {
                    index: block.index,
                    computed,
                    claimed: block.hash,
                });
            }
            if block.hash == tip.hash {
                return Err(Rejection::Duplicate {
                    index: block.index,
                    hash: block.hash,
                });
            }
            let parent = &state.blocks[state.blocks.len() - 2];
            if block.previous_hash != parent.hash {
                return Err(Rejection::BrokenLink {
                    index: block.index,
                    expected: parent.hash.clone(),
                    got: block.previous_hash,
                });
            }
            if block.hash >= tip.hash {
                return Err(Rejection::LostTieBreak {
                    index: block.index,
                    candidate: block.hash,
                    tip: tip.hash.clone(),
                });
            }
            let displaced = match state.blocks.pop() {
                Some(displaced) => displaced,
                None => return Err(Rejection::NoTip),
            };
            for id in displaced.tx_ids() {
                state.included.remove(&id);
            }
            state.push(block);
            info!(index = displaced.index, displaced = %displaced.hash, "tip replaced by competing block");
            return Ok(Accepted::Replaced { displaced });
        }

        if block.index <= tip.index {
            Err(Rejection::StaleIndex {
                expected,
                got: block.index,
            })
        } else {
            Err(Rejection::FutureIndex {
                expected,
                got: block.index,
            })
        }
    }

    /// Replaces the local chain with `candidate` if it shares our genesis,
    /// validates completely and is longer (or equally long with a smaller tip
    /// hash). Returns the new length.
    pub fn adopt_longer(&self, candidate: Vec<Block>) -> Result<usize, Rejection> {
        if let ChainValidity::InvalidAt { detail, .. } = validate_blocks(&candidate) {
            return Err(Rejection::InvalidChain(detail));
        }
        let mut state = self.state.lock();
        let (Some(ours), Some(theirs)) = (state.blocks.first(), candidate.first()) else {
            return Err(Rejection::InvalidChain("empty chain".into()));
        };
        if ours.hash != theirs.hash {
            return Err(Rejection::GenesisMismatch);
        }

        let local = state.blocks.len();
        let wins = match candidate.len().cmp(&local) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => match (candidate.last(), state.blocks.last()) {
                (Some(c), Some(t)) => c.hash < t.hash,
                _ => false,
            },
            std::cmp::Ordering::Less => false,
        };
        if !wins {
            return Err(Rejection::NotLonger {
                candidate: candidate.len(),
                local,
            });
        }

        *state = Ledger::new(candidate);
        let len = state.blocks.len();
        info!(len, "adopted longer chain");
        Ok(len)
    }

    pub fn validate_chain(&self) -> ChainValidity {
        validate_blocks(&self.state.lock().blocks)
    }
}

/// Walks `blocks` once, checking linkage then digest per block, and reports
/// the first failure. Later blocks are not looked at once one fails.
pub fn validate_blocks(blocks: &[Block]) -> ChainValidity {
    for (pos, block) in blocks.iter().enumerate() {
        let index = pos as u64;
        if pos == 0 {
            if block.index != 0 || !block.previous_hash.is_empty() {
                return ChainValidity::InvalidAt {
                    index,
                    detail: "malformed genesis at block 0".to_string(),
                };
            }
        } else {
            let previous = &blocks[pos - 1];
            if block.index != previous.index + 1 || block.previous_hash != previous.hash {
                return ChainValidity::InvalidAt {
                    index,
                    detail: format!("chain broken at block {index}"),
                };
            }
        }
        if !block.has_valid_hash() {
            return ChainValidity::InvalidAt {
                index,
                detail: format!("invalid hash at block {index}"),
            };
        }
    }
    ChainValidity::Valid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{constants, genesis_block, Signature};

    fn store() -> ChainStore {
        ChainStore::new(genesis_block(
            constants::GENESIS_DATA,
            constants::GENESIS_TIMESTAMP,
        ))
    }

    fn tx(amount: u64) -> Transaction {
        Transaction {
            sender: "alice".into(),
            recipient: "bob".into(),
            amount,
            signature: Signature::default(),
        }
    }

    #[test]
    fn append_local_increments_height_by_one() {
        let chain = store();
        for i in 1..=10u64 {
            let block = chain.append_local(format!("block {i}"), vec![tx(i)]).unwrap();
            assert_eq!(block.index, i);
            assert_eq!(chain.height(), i);
            assert_eq!(chain.len(), i as usize + 1);
        }
        for block in chain.blocks() {
            assert_eq!(block.compute_hash(), block.hash);
        }
    }

    #[test]
    fn append_links_to_previous_tip() {
        let chain = store();
        let genesis = chain.tip().unwrap();
        let block = chain.append_local("A", vec![]).unwrap();
        assert_eq!(block.previous_hash, genesis.hash);
        assert_eq!(chain.tip().unwrap(), block);
    }

    #[test]
    fn scenario_corrupted_data_reported_at_block_one() {
        let chain = store();
        let genesis = chain.block(0).unwrap();
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.previous_hash, "");

        let block = chain.append_local("A", vec![]).unwrap();
        assert_eq!(block.index, 1);
        assert_eq!(block.previous_hash, genesis.hash);

        chain.state.lock().blocks[1].data = "tampered".into();
        match chain.validate_chain() {
            ChainValidity::InvalidAt { index, detail } => {
                assert_eq!(index, 1);
                assert_eq!(detail, "invalid hash at block 1");
            }
            ChainValidity::Valid => panic!("tampering went unnoticed"),
        }
    }

    #[test]
    fn validate_reports_exactly_the_mutated_index() {
        for victim in 0..6usize {
            let chain = store();
            for i in 0..5 {
                chain.append_local(format!("{i}"), vec![tx(i)]).unwrap();
            }
            assert_eq!(chain.validate_chain(), ChainValidity::Valid);

            chain.state.lock().blocks[victim].data.push('!');
            match chain.validate_chain() {
                ChainValidity::InvalidAt { index, .. } => assert_eq!(index, victim as u64),
                ChainValidity::Valid => panic!("mutation of block {victim} not detected"),
            }
        }
    }

    #[test]
    fn validate_reports_broken_link() {
        let chain = store();
        chain.append_local("A", vec![]).unwrap();
        chain.append_local("B", vec![]).unwrap();
        {
            let mut state = chain.state.lock();
            let blocks = &mut state.blocks;
            blocks[2].previous_hash = "00".repeat(32);
            blocks[2].hash = blocks[2].compute_hash();
        }
        assert_eq!(
            chain.validate_chain(),
            ChainValidity::InvalidAt {
                index: 2,
                detail: "chain broken at block 2".into()
            }
        );
    }

    fn remote_successor(chain: &ChainStore, data: &str) -> Block {
        let tip = chain.tip().unwrap();
        Block::new(tip.index + 1, tip.hash, 1_700_000_000, data, vec![])
    }

    #[test]
    fn accept_remote_extends_tip() {
        let chain = store();
        let block = remote_successor(&chain, "remote");
        assert_eq!(chain.accept_remote(block.clone()), Ok(Accepted::Extended));
        assert_eq!(chain.tip().unwrap(), block);
    }

    #[test]
    fn accept_remote_rejects_wrong_index_without_change() {
        let chain = store();
        chain.append_local("A", vec![]).unwrap();
        chain.append_local("B", vec![]).unwrap();
        let before = chain.blocks();

        let tip = chain.tip().unwrap();
        let future = Block::new(tip.index + 2, tip.hash.clone(), 0, "x", vec![]);
        assert_eq!(
            chain.accept_remote(future),
            Err(Rejection::FutureIndex {
                expected: 3,
                got: 4
            })
        );

        let stale = Block::new(1, before[0].hash.clone(), 0, "x", vec![]);
        let err = chain.accept_remote(stale).unwrap_err();
        assert_eq!(
            err,
            Rejection::StaleIndex {
                expected: 3,
                got: 1
            }
        );
        assert_eq!(err.to_string(), "stale block: expected index 3, got 1");
        assert_eq!(chain.blocks(), before);
    }

    #[test]
    fn accept_remote_rejects_broken_link() {
        let chain = store();
        let before = chain.blocks();
        let block = Block::new(1, "ff".repeat(32), 0, "x", vec![]);
        assert!(matches!(
            chain.accept_remote(block),
            Err(Rejection::BrokenLink { index: 1, .. })
        ));
        assert_eq!(chain.blocks(), before);
    }

    #[test]
    fn accept_remote_rejects_digest_mismatch() {
        let chain = store();
        let mut block = remote_successor(&chain, "remote");
        block.data = "changed after sealing".into();
        assert!(matches!(
            chain.accept_remote(block),
            Err(Rejection::DigestMismatch { index: 1, .. })
        ));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn competing_tip_with_smaller_hash_wins() {
        let chain = store();
        let parent = chain.tip().unwrap();
        let mut candidates: Vec<Block> = (0..8)
            .map(|i| Block::new(1, parent.hash.clone(), 1_700_000_000 + i, "rival", vec![]))
            .collect();
        candidates.sort_by(|a, b| a.hash.cmp(&b.hash));
        let smallest = candidates.remove(0);
        let largest = candidates.pop().unwrap();

        assert_eq!(chain.accept_remote(largest.clone()), Ok(Accepted::Extended));
        assert_eq!(
            chain.accept_remote(smallest.clone()),
            Ok(Accepted::Replaced {
                displaced: largest.clone()
            })
        );
        assert_eq!(chain.tip().unwrap(), smallest);
        assert_eq!(chain.len(), 2);

        assert!(matches!(
            chain.accept_remote(largest),
            Err(Rejection::LostTieBreak { index: 1, .. })
        ));
        assert!(matches!(
            chain.accept_remote(smallest),
            Err(Rejection::Duplicate { index: 1, .. })
        ));
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn genesis_is_never_replaced() {
        let chain = store();
        let rival = genesis_block("other network", 1);
        assert!(matches!(
            chain.accept_remote(rival),
            Err(Rejection::StaleIndex { expected: 1, got: 0 })
        ));
    }

    #[test]
    fn adopt_longer_takes_longer_valid_chain() {
        let ours = store();
        let theirs = store();
        ours.append_local("mine", vec![]).unwrap();
        for i in 0..3 {
            theirs.append_local(format!("theirs {i}"), vec![]).unwrap();
        }
        assert_eq!(ours.adopt_longer(theirs.blocks()), Ok(4));
        assert_eq!(ours.blocks(), theirs.blocks());
    }

    #[test]
    fn adopt_longer_refuses_shorter_foreign_or_broken() {
        let ours = store();
        for i in 0..3 {
            ours.append_local(format!("{i}"), vec![]).unwrap();
        }
        let before = ours.blocks();

        let shorter = store();
        shorter.append_local("x", vec![]).unwrap();
        assert_eq!(
            ours.adopt_longer(shorter.blocks()),
            Err(Rejection::NotLonger {
                candidate: 2,
                local: 4
            })
        );

        let foreign = ChainStore::new(genesis_block("elsewhere", 5));
        for i in 0..6 {
            foreign.append_local(format!("{i}"), vec![]).unwrap();
        }
        assert_eq!(
            ours.adopt_longer(foreign.blocks()),
            Err(Rejection::GenesisMismatch)
        );

        let longer = store();
        for i in 0..6 {
            longer.append_local(format!("{i}"), vec![]).unwrap();
        }
        let mut broken = longer.blocks();
        broken[3].data = "forged".into();
        assert!(matches!(
            ours.adopt_longer(broken),
            Err(Rejection::InvalidChain(_))
        ));

        assert_eq!(ours.blocks(), before);
    }

    #[test]
    fn from_blocks_refuses_corrupt_history() {
        let chain = store();
        chain.append_local("A", vec![]).unwrap();
        let mut blocks = chain.blocks();
        assert!(ChainStore::from_blocks(blocks.clone()).is_ok());
        blocks[1].timestamp += 1;
        assert!(matches!(
            ChainStore::from_blocks(blocks),
            Err(ChainError::Corrupt(_))
        ));
        assert!(matches!(
            ChainStore::from_blocks(vec![]),
            Err(ChainError::Empty)
        ));
    }

    #[test]
    fn concurrent_appends_are_linearized() {
        let chain = std::sync::Arc::new(store());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let chain = chain.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        chain.append_local(format!("{t}-{i}"), vec![]).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(chain.height(), 200);
        assert_eq!(chain.validate_chain(), ChainValidity::Valid);
    }

    #[test]
    fn included_ids_follow_the_canonical_chain() {
        let chain = store();
        let local = chain.append_local("A", vec![tx(1)]).unwrap();
        assert!(chain.contains_tx(&tx(1).id()));
        assert!(!chain.contains_tx(&tx(2).id()));

        let remote = Block::new(2, local.hash.clone(), 1_700_000_000, "B", vec![tx(2)]);
        assert_eq!(chain.accept_remote(remote), Ok(Accepted::Extended));
        assert!(chain.contains_tx(&tx(2).id()));

        let restored = ChainStore::from_blocks(chain.blocks()).unwrap();
        assert!(restored.contains_tx(&tx(1).id()));
        assert!(restored.contains_tx(&tx(2).id()));
    }

    #[test]
    fn replaced_tip_releases_its_transactions() {
        let chain = store();
        let parent = chain.tip().unwrap();
        let mut rivals: Vec<Block> = (0..8)
            .map(|i| Block::new(1, parent.hash.clone(), 1_700_000_000 + i, "rival", vec![tx(i)]))
            .collect();
        rivals.sort_by(|a, b| a.hash.cmp(&b.hash));
        let winner = rivals.remove(0);
        let loser = rivals.pop().unwrap();

        chain.accept_remote(loser.clone()).unwrap();
        assert!(chain.contains_tx(&loser.transactions[0].id()));
        chain.accept_remote(winner.clone()).unwrap();
        assert!(!chain.contains_tx(&loser.transactions[0].id()));
        assert!(chain.contains_tx(&winner.transactions[0].id()));
    }

    #[test]
    fn adopted_chain_replaces_the_index() {
        let ours = store();
        ours.append_local("mine", vec![tx(1)]).unwrap();
        let theirs = store();
        theirs.append_local("a", vec![tx(2)]).unwrap();
        theirs.append_local("b", vec![tx(3)]).unwrap();

        ours.adopt_longer(theirs.blocks()).unwrap();
        assert!(!ours.contains_tx(&tx(1).id()));
        assert!(ours.contains_tx(&tx(2).id()));
        assert!(ours.contains_tx(&tx(3).id()));
    }
}
