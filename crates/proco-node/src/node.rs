use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::gossip::{Admission, Delivery, GossipEngine, StatsSnapshot};
use crate::message::Message;
use crate::peers::{PeerInfo, PeerTable};
use proco_core::crypto::{Secp256k1Verifier, TxVerifier};
use proco_core::{
    genesis_block, Accepted, Block, ChainStore, ChainValidity, Mempool, Snapshot, Transaction,
    TxId,
};
use proco_storage::SnapshotStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

/// A result together with the per-peer deliveries it triggered.
#[derive(Debug)]
pub struct Published<T> {
    pub value: T,
    pub deliveries: Vec<Delivery>,
}

impl<T> Published<T> {
    fn new(value: T, deliveries: Vec<Delivery>) -> Self {
        Self { value, deliveries }
    }

    fn quiet(value: T) -> Self {
        Self::new(value, Vec::new())
    }
}

/// One ledger node: chain, mempool, peers and the gossip engine that ties
/// them to the network.
pub struct Node {
    config: NodeConfig,
    chain: Arc<ChainStore>,
    mempool: Arc<Mempool>,
    peers: Arc<PeerTable>,
    gossip: Arc<GossipEngine>,
}

impl Node {
    pub fn new(config: NodeConfig) -> Self {
        Self::with_verifier(config, Arc::new(Secp256k1Verifier))
    }

    pub fn with_verifier(config: NodeConfig, verifier: Arc<dyn TxVerifier>) -> Self {
        let genesis = genesis_block(&config.genesis.data, config.genesis.timestamp);
        Self::assemble(config, ChainStore::new(genesis), Mempool::new(), verifier)
    }

    /// Restores chain and mempool from a persisted snapshot. The snapshot's
    /// genesis must match the configured one.
    pub fn with_snapshot(config: NodeConfig, snapshot: Snapshot) -> Result<Self, NodeError> {
        Self::restore(config, snapshot, Arc::new(Secp256k1Verifier))
    }

    /// Like [`Node::with_snapshot`], checking persisted transactions with
    /// `verifier`. Pending entries that fail it, or that a restored block
    /// already carries, are skipped.
    pub fn restore(
        config: NodeConfig,
        snapshot: Snapshot,
        verifier: Arc<dyn TxVerifier>,
    ) -> Result<Self, NodeError> {
        let chain = ChainStore::from_blocks(snapshot.blocks)?;
        let expected = genesis_block(&config.genesis.data, config.genesis.timestamp);
        if chain.genesis_hash().as_deref() != Some(expected.hash.as_str()) {
            return Err(proco_core::Rejection::GenesisMismatch.into());
        }
        let mempool = Mempool::new();
        for tx in snapshot.mempool {
            let id = tx.id();
            if let Err(e) = verifier.verify(&tx) {
                warn!(tx = %id, error = %e, "skipping persisted transaction");
                continue;
            }
            if chain.contains_tx(&id) {
                continue;
            }
            mempool.add(id, tx);
        }
        Ok(Self::assemble(config, chain, mempool, verifier))
    }

    /// Restores from `store` if it holds a snapshot, otherwise starts fresh.
    pub fn load(config: NodeConfig, store: &dyn SnapshotStore) -> Result<Self, NodeError> {
        match store.load().map_err(storage)? {
            Some(snapshot) => {
                let node = Self::with_snapshot(config, snapshot)?;
                info!(
                    height = node.chain.height(),
                    pending = node.mempool.len(),
                    "restored snapshot"
                );
                Ok(node)
            }
            None => Ok(Self::new(config)),
        }
    }

    fn assemble(
        config: NodeConfig,
        chain: ChainStore,
        mempool: Mempool,
        verifier: Arc<dyn TxVerifier>,
    ) -> Self {
        let chain = Arc::new(chain);
        let mempool = Arc::new(mempool);
        let peers = Arc::new(PeerTable::with_peers(&config.network.bootstrap_peers));
        let gossip = Arc::new(GossipEngine::new(
            config.network.clone(),
            chain.clone(),
            mempool.clone(),
            peers.clone(),
            verifier,
        ));
        Self {
            config,
            chain,
            mempool,
            peers,
            gossip,
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn chain(&self) -> &ChainStore {
        &self.chain
    }

    /// Address advertised to peers.
    pub fn address(&self) -> String {
        self.gossip.address()
    }

    pub fn gossip_stats(&self) -> StatsSnapshot {
        self.gossip.stats()
    }

    pub async fn start(&self) -> Result<SocketAddr, NodeError> {
        let bound = self.gossip.start().await?;
        info!(address = %self.address(), height = self.chain.height(), "node started");
        Ok(bound)
    }

    pub fn shutdown(&self) {
        self.gossip.shutdown();
    }

    /// Admits a locally submitted transaction and announces it.
    pub async fn create_transaction(
        &self,
        tx: Transaction,
    ) -> Result<Published<TxId>, NodeError> {
        let id = match self.gossip.admit_transaction(&tx)? {
            Admission::Added(id) => id,
            Admission::Pending(id) => return Err(NodeError::DuplicateTransaction(id)),
            Admission::Included(id) => return Err(NodeError::AlreadyIncluded(id)),
        };
        info!(tx = %id, amount = tx.amount, "transaction created");
        let deliveries = self.gossip.broadcast(&Message::Tx(tx)).await;
        Ok(Published::new(id, deliveries))
    }

    /// Seals every pending transaction into a new block and announces it.
    /// `data` defaults to a label counting the transactions; without it an
    /// empty mempool is refused.
    pub async fn create_block(&self, data: Option<String>) -> Result<Published<Block>, NodeError> {
        let pending = self.mempool.list();
        let data = match data {
            Some(data) => data,
            None if pending.is_empty() => return Err(NodeError::NothingToMine),
            None => format!("Block with {} TXs", pending.len()),
        };
        let block = self.chain.append_local(data, pending)?;
        self.mempool.remove_all(&block.tx_ids());
        let deliveries = self.gossip.broadcast(&Message::Block(block.clone())).await;
        Ok(Published::new(block, deliveries))
    }

    pub fn get_chain(&self) -> Vec<Block> {
        self.chain.blocks()
    }

    /// Same path as a `BLOCK` arriving over gossip, with no origin to skip.
    pub async fn receive_block(&self, block: Block) -> Result<Published<Accepted>, NodeError> {
        let accepted = self.gossip.admit_block(block.clone())?;
        let deliveries = self.gossip.relay(&Message::Block(block), None).await;
        Ok(Published::new(accepted, deliveries))
    }

    /// Same path as a `TX` arriving over gossip. `false` means it was
    /// already pending; one already in a block is refused.
    pub async fn receive_transaction(
        &self,
        tx: Transaction,
    ) -> Result<Published<bool>, NodeError> {
        match self.gossip.admit_transaction(&tx)? {
            Admission::Added(_) => {
                let deliveries = self.gossip.relay(&Message::Tx(tx), None).await;
                Ok(Published::new(true, deliveries))
            }
            Admission::Pending(_) => Ok(Published::quiet(false)),
            Admission::Included(id) => Err(NodeError::AlreadyIncluded(id)),
        }
    }

    /// Replaces the local chain with `blocks` if they form a longer valid
    /// chain from the same genesis. Returns the new length.
    pub fn sync_chain(&self, blocks: Vec<Block>) -> Result<usize, NodeError> {
        let included: Vec<TxId> = blocks.iter().flat_map(Block::tx_ids).collect();
        let len = self.chain.adopt_longer(blocks)?;
        self.mempool.remove_all(&included);
        Ok(len)
    }

    pub fn validate_chain(&self) -> ChainValidity {
        self.chain.validate_chain()
    }

    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.mempool.list()
    }

    pub fn peers(&self) -> Vec<PeerInfo> {
        self.peers.snapshot()
    }

    /// Registers `address`; the reconnect loop dials it. Returns `false` for
    /// an address already known or this node's own.
    pub fn add_peer(&self, address: &str) -> bool {
        if address.trim() == self.address() {
            return false;
        }
        self.peers.add(address)
    }

    pub fn remove_peer(&self, address: &str) -> bool {
        self.peers.remove(address)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            blocks: self.chain.blocks(),
            mempool: self.mempool.list(),
        }
    }

    pub fn save(&self, store: &dyn SnapshotStore) -> Result<(), NodeError> {
        let snapshot = self.snapshot();
        store.save(&snapshot).map_err(|e| {
            warn!(error = %e, "snapshot save failed");
            storage(e)
        })
    }
}

fn storage(error: anyhow::Error) -> NodeError {
    NodeError::Storage(format!("{error:#}"))
}
