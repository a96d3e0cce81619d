//! A small proof-of-concept ledger node: a hash-linked chain, a mempool and
//! newline-delimited JSON gossip over TCP.

pub mod api;
pub mod config;
mod constants;
pub mod error;
pub mod gossip;
pub mod message;
pub mod node;
pub mod peers;

pub use config::NodeConfig;
pub use error::{DecodeError, NetworkError, NodeError};
pub use gossip::{settle, Admission, Delivery, GossipEngine, StatsSnapshot};
pub use node::{Node, Published};
pub use peers::{PeerHandle, PeerInfo, PeerTable};
