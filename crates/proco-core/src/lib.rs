use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod chain;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod mempool;

pub use chain::{Accepted, ChainStore, ChainValidity};
pub use error::{ChainError, Rejection, TxError};
pub use mempool::Mempool;

pub type Hash = [u8; 32];

/// Hex digest identifying a transaction for dedup purposes.
pub type TxId = String;

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

pub(crate) fn sha256(bytes: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..]);
    out
}

fn put_str(bytes: &mut Vec<u8>, s: &str) {
    bytes.extend_from_slice(&(s.len() as u64).to_le_bytes());
    bytes.extend_from_slice(s.as_bytes());
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub r: String,
    pub s: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: String,
    pub recipient: String,
    pub amount: u64,
    pub signature: Signature,
}

impl Transaction {
    /// The bytes a sender signs: sender, recipient and decimal amount, concatenated.
    pub fn signing_bytes(&self) -> Vec<u8> {
        format!("{}{}{}", self.sender, self.recipient, self.amount).into_bytes()
    }

    pub fn id_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(
            8 * 5 + self.sender.len() + self.recipient.len() + self.signature.r.len() + self.signature.s.len(),
        );
        put_str(&mut bytes, &self.sender);
        put_str(&mut bytes, &self.recipient);
        bytes.extend_from_slice(&self.amount.to_le_bytes());
        put_str(&mut bytes, &self.signature.r);
        put_str(&mut bytes, &self.signature.s);
        bytes
    }

    pub fn digest(&self) -> Hash {
        sha256(&self.id_bytes())
    }

    pub fn id(&self) -> TxId {
        hex::encode(self.digest())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub index: u64,
    pub previous_hash: String,
    pub timestamp: u64,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    pub hash: String,
}

impl Block {
    /// Builds a block and seals it with its digest.
    pub fn new(
        index: u64,
        previous_hash: impl Into<String>,
        timestamp: u64,
        data: impl Into<String>,
        transactions: Vec<Transaction>,
    ) -> Self {
        let mut block = Self {
            index,
            previous_hash: previous_hash.into(),
            timestamp,
            data: data.into(),
            transactions,
            hash: String::new(),
        };
        block.hash = block.compute_hash();
        block
    }

    pub fn hash_bytes(&self) -> Vec<u8> {
        let mut bytes =
            Vec::with_capacity(8 + 8 + 8 + self.previous_hash.len() + 8 + self.data.len() + 32);
        bytes.extend_from_slice(&self.index.to_le_bytes());
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        put_str(&mut bytes, &self.previous_hash);
        put_str(&mut bytes, &self.data);
        bytes.extend_from_slice(&merkle_root(&self.transactions));
        bytes
    }

    pub fn compute_hash(&self) -> String {
        hex::encode(sha256(&self.hash_bytes()))
    }

    pub fn has_valid_hash(&self) -> bool {
        self.compute_hash() == self.hash
    }

    pub fn tx_ids(&self) -> Vec<TxId> {
        self.transactions.iter().map(Transaction::id).collect()
    }
}

pub fn merkle_root(txs: &[Transaction]) -> Hash {
    if txs.is_empty() {
        return [0u8; 32];
    }
    let mut level: Vec<Hash> = txs.iter().map(Transaction::digest).collect();

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let (a, b) = if pair.len() == 2 {
                (pair[0], pair[1])
            } else {
                (pair[0], pair[0])
            };
            let mut joined = [0u8; 64];
            joined[..32].copy_from_slice(&a);
            joined[32..].copy_from_slice(&b);
            next.push(sha256(&joined));
        }
        level = next;
    }
    level[0]
}

/// Genesis is derived purely from configuration so that every node sharing a
/// configuration agrees on block 0.
pub fn genesis_block(data: &str, timestamp: u64) -> Block {
    Block::new(0, "", timestamp, data, vec![])
}

/// Everything a node persists between runs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub blocks: Vec<Block>,
    pub mempool: Vec<Transaction>,
}
