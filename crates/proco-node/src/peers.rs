//! Known peers and the live connection bound to each.
//!
//! An entry survives disconnects; only [`PeerTable::remove`] deletes it. At
//! most one [`PeerHandle`] is bound per address, and replacing or removing a
//! binding closes the old handle.

use crate::error::NetworkError;
use parking_lot::Mutex;
use proco_core::now_secs;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A queued line and the channel its write result is reported on.
pub struct Outgoing {
    pub line: Arc<Vec<u8>>,
    pub done: oneshot::Sender<Result<(), NetworkError>>,
}

/// Sending side of one TCP connection. Cloning shares the same connection.
#[derive(Clone, Debug)]
pub struct PeerHandle {
    id: ConnectionId,
    remote: SocketAddr,
    outbound: mpsc::Sender<Outgoing>,
    close: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl PeerHandle {
    /// Creates a handle plus the receiving ends the connection's writer task
    /// drains.
    pub fn new(
        remote: SocketAddr,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Outgoing>, oneshot::Receiver<()>) {
        let (outbound, queue) = mpsc::channel(capacity.max(1));
        let (close_tx, close_rx) = oneshot::channel();
        let handle = Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            remote,
            outbound,
            close: Arc::new(Mutex::new(Some(close_tx))),
        };
        (handle, queue, close_rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed() || self.close.lock().is_none()
    }

    /// Stops the writer. Idempotent.
    pub fn close(&self) {
        if let Some(signal) = self.close.lock().take() {
            let _ = signal.send(());
        }
    }

    /// Queues `line` without waiting. The receiver resolves once the writer
    /// has written it or given up.
    pub fn enqueue(
        &self,
        line: Arc<Vec<u8>>,
    ) -> Result<oneshot::Receiver<Result<(), NetworkError>>, NetworkError> {
        if self.is_closed() {
            return Err(NetworkError::Closed);
        }
        let (done, result) = oneshot::channel();
        self.outbound
            .try_send(Outgoing { line, done })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => NetworkError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => NetworkError::Closed,
            })?;
        Ok(result)
    }
}

#[derive(Debug)]
struct Peer {
    last_seen: u64,
    handle: Option<PeerHandle>,
}

impl Peer {
    fn new() -> Self {
        Self {
            last_seen: now_secs(),
            handle: None,
        }
    }

    fn live_handle(&self) -> Option<&PeerHandle> {
        self.handle.as_ref().filter(|h| !h.is_closed())
    }
}

/// Rendering of one entry for the HTTP surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub address: String,
    pub last_seen: u64,
    pub connected: bool,
}

#[derive(Default)]
pub struct PeerTable {
    peers: Mutex<HashMap<String, Peer>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peers<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let table = Self::new();
        for address in addresses {
            table.add(address.as_ref());
        }
        table
    }

    /// Inserts `address` or refreshes its last-seen time. Returns `true` for
    /// a new entry.
    pub fn add(&self, address: &str) -> bool {
        let address = address.trim();
        if address.is_empty() {
            return false;
        }
        let mut peers = self.peers.lock();
        match peers.get_mut(address) {
            Some(peer) => {
                peer.last_seen = now_secs();
                false
            }
            None => {
                peers.insert(address.to_string(), Peer::new());
                drop(peers);
                info!(peer = %address, "peer added");
                true
            }
        }
    }

    /// Deletes the entry and closes its connection, if any.
    pub fn remove(&self, address: &str) -> bool {
        let removed = self.peers.lock().remove(address);
        match removed {
            Some(peer) => {
                if let Some(handle) = peer.handle {
                    handle.close();
                }
                info!(peer = %address, "peer removed");
                true
            }
            None => false,
        }
    }

    /// Binds `handle` to `address`, creating the entry if needed. A previously
    /// bound handle is closed.
    pub fn update_connection(&self, address: &str, handle: PeerHandle) {
        let old = {
            let mut peers = self.peers.lock();
            let peer = peers.entry(address.to_string()).or_insert_with(Peer::new);
            peer.last_seen = now_secs();
            peer.handle.replace(handle)
        };
        if let Some(old) = old {
            debug!(peer = %address, connection = old.id(), "replacing connection");
            old.close();
        }
    }

    /// Binds `handle` only if `address` has no live connection.
    pub fn bind_if_vacant(&self, address: &str, handle: PeerHandle) -> bool {
        let stale = {
            let mut peers = self.peers.lock();
            let peer = peers.entry(address.to_string()).or_insert_with(Peer::new);
            peer.last_seen = now_secs();
            if peer.live_handle().is_some() {
                return false;
            }
            peer.handle.replace(handle)
        };
        if let Some(stale) = stale {
            stale.close();
        }
        true
    }

    /// Drops the connection but keeps the entry for the reconnect loop.
    pub fn mark_disconnected(&self, address: &str) {
        let handle = self
            .peers
            .lock()
            .get_mut(address)
            .and_then(|peer| peer.handle.take());
        if let Some(handle) = handle {
            handle.close();
            info!(peer = %address, "peer disconnected");
        }
    }

    /// Marks `address` disconnected only while `connection` is still the
    /// bound one, so a dying connection cannot unbind its replacement.
    pub fn release(&self, address: &str, connection: ConnectionId) -> bool {
        let handle = {
            let mut peers = self.peers.lock();
            match peers.get_mut(address) {
                Some(peer) if peer.handle.as_ref().map(PeerHandle::id) == Some(connection) => {
                    peer.handle.take()
                }
                _ => None,
            }
        };
        match handle {
            Some(handle) => {
                handle.close();
                info!(peer = %address, connection, "peer disconnected");
                true
            }
            None => false,
        }
    }

    pub fn list(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.peers.lock().keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn contains(&self, address: &str) -> bool {
        self.peers.lock().contains_key(address)
    }

    pub fn handle(&self, address: &str) -> Option<PeerHandle> {
        self.peers
            .lock()
            .get(address)
            .and_then(|peer| peer.live_handle().cloned())
    }

    pub fn is_connected(&self, address: &str) -> bool {
        self.handle(address).is_some()
    }

    /// Every address with its live handle, if it has one.
    pub fn targets(&self) -> Vec<(String, Option<PeerHandle>)> {
        self.peers
            .lock()
            .iter()
            .map(|(address, peer)| (address.clone(), peer.live_handle().cloned()))
            .collect()
    }

    /// Addresses without a live connection.
    pub fn disconnected(&self) -> Vec<String> {
        self.peers
            .lock()
            .iter()
            .filter(|(_, peer)| peer.live_handle().is_none())
            .map(|(address, _)| address.clone())
            .collect()
    }

    pub fn snapshot(&self) -> Vec<PeerInfo> {
        let mut infos: Vec<PeerInfo> = self
            .peers
            .lock()
            .iter()
            .map(|(address, peer)| PeerInfo {
                address: address.clone(),
                last_seen: peer.last_seen,
                connected: peer.live_handle().is_some(),
            })
            .collect();
        infos.sort_by(|a, b| a.address.cmp(&b.address));
        infos
    }

    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.lock().is_empty()
    }
}
