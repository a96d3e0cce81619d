use thiserror::Error;

/// Why a proposed block or chain was not applied. The local chain is unchanged
/// whenever one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("stale block: expected index {expected}, got {got}")]
    StaleIndex { expected: u64, got: u64 },

    #[error("future block: expected index {expected}, got {got}")]
    FutureIndex { expected: u64, got: u64 },

    #[error("chain broken at block {index}: expected previous hash {expected:?}, got {got:?}")]
    BrokenLink {
        index: u64,
        expected: String,
        got: String,
    },

    #[error("invalid hash at block {index}: computed {computed}, claimed {claimed}")]
    DigestMismatch {
        index: u64,
        computed: String,
        claimed: String,
    },

    #[error("block {index} with hash {hash} is already the tip")]
    Duplicate { index: u64, hash: String },

    #[error("competing block {index} lost the tie-break: {candidate} is not below tip {tip}")]
    LostTieBreak {
        index: u64,
        candidate: String,
        tip: String,
    },

    #[error("candidate chain starts from a different genesis")]
    GenesisMismatch,

    #[error("candidate chain of length {candidate} does not beat local chain of length {local}")]
    NotLonger { candidate: usize, local: usize },

    #[error("candidate chain invalid: {0}")]
    InvalidChain(String),

    #[error("local chain has no tip")]
    NoTip,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxError {
    #[error("invalid sender key: {0}")]
    InvalidKey(String),

    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    #[error("signature does not match sender {0}")]
    BadSignature(String),
}

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("chain has no blocks")]
    Empty,

    #[error("stored chain is invalid: {0}")]
    Corrupt(String),
}
