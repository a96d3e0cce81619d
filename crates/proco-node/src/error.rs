use proco_core::{ChainError, Rejection, TxError};
use thiserror::Error;

/// Transport failures. A peer that produces one is marked disconnected and
/// picked up again by the reconnect loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("dial {addr} timed out")]
    DialTimeout { addr: String },

    #[error("dial {addr} failed: {reason}")]
    Dial { addr: String, reason: String },

    #[error("write timed out")]
    WriteTimeout,

    #[error("io error: {0}")]
    Io(String),

    #[error("outbound queue is full")]
    QueueFull,

    #[error("connection closed")]
    Closed,
}

/// A line that could not be turned into a message. The line is dropped and
/// the connection stays up.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Envelope(#[from] serde_json::Error),

    #[error("{0} message has no body")]
    MissingBody(&'static str),

    #[error("invalid {kind} body: {source}")]
    Body {
        kind: &'static str,
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    InvalidTransaction(#[from] TxError),

    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("transaction {0} is already pending")]
    DuplicateTransaction(String),

    #[error("transaction {0} is already in a block")]
    AlreadyIncluded(String),

    #[error("no pending transactions to put in a block")]
    NothingToMine,

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("storage: {0}")]
    Storage(String),
}

impl NodeError {
    /// Whether the caller sent something the node refused, as opposed to the
    /// node failing on its own.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            NodeError::InvalidTransaction(_)
                | NodeError::Rejected(_)
                | NodeError::DuplicateTransaction(_)
                | NodeError::AlreadyIncluded(_)
                | NodeError::NothingToMine
        )
    }
}
