//! TCP gossip between nodes.
//!
//! Each connection gets a reader task and a writer task. The writer drains a
//! bounded queue owned by the connection's [`PeerHandle`]; the reader decodes
//! one envelope per line and dispatches it. A transaction or block that is new
//! to this node is forwarded to every peer except the one it came from, and a
//! second arrival of the same item is a no-op, which is what stops the flood.

use crate::config::NetworkConfig;
use crate::error::NetworkError;
use crate::message::{decode_line, encode_line, Inbound, Message};
use crate::peers::{Outgoing, PeerHandle, PeerTable};
use futures::future::join_all;
use parking_lot::RwLock;
use proco_core::crypto::TxVerifier;
use proco_core::{Accepted, Block, ChainStore, Mempool, Rejection, Transaction, TxError, TxId};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, interval_at, sleep, timeout, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// The eventual result of handing one message to one peer.
#[derive(Debug)]
pub struct Delivery {
    peer: String,
    state: DeliveryState,
}

#[derive(Debug)]
enum DeliveryState {
    Queued(oneshot::Receiver<Result<(), NetworkError>>),
    Failed(NetworkError),
}

impl Delivery {
    fn queued(peer: String, result: oneshot::Receiver<Result<(), NetworkError>>) -> Self {
        Self {
            peer,
            state: DeliveryState::Queued(result),
        }
    }

    fn failed(peer: String, error: NetworkError) -> Self {
        Self {
            peer,
            state: DeliveryState::Failed(error),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Waits for the writer to report. A connection torn down before the
    /// line was written reports [`NetworkError::Closed`].
    pub async fn outcome(self) -> Result<(), NetworkError> {
        match self.state {
            DeliveryState::Queued(result) => result.await.unwrap_or(Err(NetworkError::Closed)),
            DeliveryState::Failed(error) => Err(error),
        }
    }
}

/// Resolves every delivery, pairing each result with its peer address.
pub async fn settle(deliveries: Vec<Delivery>) -> Vec<(String, Result<(), NetworkError>)> {
    join_all(deliveries.into_iter().map(|delivery| async move {
        let peer = delivery.peer.clone();
        (peer, delivery.outcome().await)
    }))
    .await
}

/// Resolves once shutdown has been raised. Yields nothing borrowed from the
/// channel, so callers may keep awaiting in the same `select!` arm.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// What became of a transaction offered to this node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// New to this node and now pending.
    Added(TxId),
    /// Already waiting in the mempool.
    Pending(TxId),
    /// Already carried by a block on the chain.
    Included(TxId),
}

#[derive(Debug, Default)]
pub struct GossipStats {
    received: AtomicU64,
    forwarded: AtomicU64,
    dropped: AtomicU64,
    duplicates: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Lines read from any connection.
    pub received: u64,
    /// Transactions and blocks relayed onward after being accepted.
    pub forwarded: u64,
    /// Lines that failed to decode or carried an invalid payload.
    pub dropped: u64,
    /// Transactions or blocks that arrived again after this node had them.
    pub duplicates: u64,
}

impl GossipStats {
    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
        }
    }
}

pub struct GossipEngine {
    network: NetworkConfig,
    address: RwLock<String>,
    chain: Arc<ChainStore>,
    mempool: Arc<Mempool>,
    peers: Arc<PeerTable>,
    verifier: Arc<dyn TxVerifier>,
    stats: GossipStats,
    shutdown: watch::Sender<bool>,
}

impl GossipEngine {
    pub fn new(
        network: NetworkConfig,
        chain: Arc<ChainStore>,
        mempool: Arc<Mempool>,
        peers: Arc<PeerTable>,
        verifier: Arc<dyn TxVerifier>,
    ) -> Self {
        let address = network
            .public_addr
            .clone()
            .unwrap_or_else(|| network.listen_addr.clone());
        let (shutdown, _) = watch::channel(false);
        Self {
            network,
            address: RwLock::new(address),
            chain,
            mempool,
            peers,
            verifier,
            stats: GossipStats::default(),
            shutdown,
        }
    }

    /// The address this node stamps into outgoing envelopes.
    pub fn address(&self) -> String {
        self.address.read().clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Binds the listener and spawns the accept, reconnect and peer-exchange
    /// loops. Failing to bind is the one fatal network error.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr, NetworkError> {
        let listen = self.network.listen_addr.as_str();
        let listener = TcpListener::bind(listen)
            .await
            .map_err(|e| NetworkError::Bind {
                addr: listen.to_string(),
                reason: e.to_string(),
            })?;
        let local = listener
            .local_addr()
            .map_err(|e| NetworkError::Io(e.to_string()))?;

        let advertised = self
            .network
            .public_addr
            .clone()
            .unwrap_or_else(|| local.to_string());
        *self.address.write() = advertised.clone();
        // A shared bootstrap list may name this node too.
        self.peers.remove(&advertised);
        info!(listen = %local, address = %advertised, "p2p listener bound");

        tokio::spawn(self.clone().accept_loop(listener));
        tokio::spawn(self.clone().reconnect_loop());
        tokio::spawn(self.clone().peer_exchange_loop());
        Ok(local)
    }

    /// Stops the listener and both timers and closes every bound connection.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        for address in self.peers.list() {
            self.peers.mark_disconnected(&address);
        }
        info!("gossip shutting down");
    }

    /// Signature check, then mempool insert. Transactions already on the
    /// chain never re-enter the mempool.
    pub fn admit_transaction(&self, tx: &Transaction) -> Result<Admission, TxError> {
        self.verifier.verify(tx)?;
        let id = tx.id();
        if self.chain.contains_tx(&id) {
            return Ok(Admission::Included(id));
        }
        if !self.mempool.add(id.clone(), tx.clone()) {
            return Ok(Admission::Pending(id));
        }
        // A block carrying it may have landed between the check and the insert.
        if self.chain.contains_tx(&id) {
            self.mempool.remove(&id);
            return Ok(Admission::Included(id));
        }
        Ok(Admission::Added(id))
    }

    /// Fork-choice, then removal of the included transactions from the mempool.
    pub fn admit_block(&self, block: Block) -> Result<Accepted, Rejection> {
        let ids = block.tx_ids();
        let outcome = self.chain.accept_remote(block)?;
        let cleared = self.mempool.remove_all(&ids);
        if cleared > 0 {
            debug!(cleared, "pending transactions included by accepted block");
        }
        Ok(outcome)
    }

    pub async fn broadcast(self: &Arc<Self>, message: &Message) -> Vec<Delivery> {
        self.broadcast_except(message, None).await
    }

    /// Sends `message` to every known peer except `excluded`, dialing peers
    /// that have no live connection first.
    pub async fn broadcast_except(
        self: &Arc<Self>,
        message: &Message,
        excluded: Option<&str>,
    ) -> Vec<Delivery> {
        let me = self.address();
        let line = match encode_line(message, &me) {
            Ok(line) => Arc::new(line),
            Err(e) => {
                warn!(kind = message.kind(), error = %e, "failed to encode message");
                return Vec::new();
            }
        };

        let sends = self
            .peers
            .targets()
            .into_iter()
            .filter(|(address, _)| *address != me && Some(address.as_str()) != excluded)
            .map(|(address, handle)| {
                let line = line.clone();
                async move {
                    let handle = match handle {
                        Some(handle) => handle,
                        None => match self.dial(&address).await {
                            Ok(handle) => handle,
                            Err(e) => return Delivery::failed(address, e),
                        },
                    };
                    match handle.enqueue(line) {
                        Ok(result) => Delivery::queued(address, result),
                        Err(e) => Delivery::failed(address, e),
                    }
                }
            });
        join_all(sends).await
    }

    /// Forwards an item this node just accepted. `origin` is skipped.
    pub async fn relay(self: &Arc<Self>, message: &Message, origin: Option<&str>) -> Vec<Delivery> {
        self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
        self.broadcast_except(message, origin).await
    }

    fn spawn_relay(self: &Arc<Self>, message: Message, origin: String) {
        let engine = self.clone();
        tokio::spawn(async move {
            let deliveries = engine.relay(&message, Some(&origin)).await;
            for (peer, result) in settle(deliveries).await {
                if let Err(e) = result {
                    debug!(peer = %peer, kind = message.kind(), error = %e, "relay failed");
                }
            }
        });
    }

    /// Opens an outbound connection to `address`, binds it in the peer table
    /// and announces this node with a `PING`.
    pub async fn dial(self: &Arc<Self>, address: &str) -> Result<PeerHandle, NetworkError> {
        let stream = match timeout(self.network.dial_timeout(), TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(NetworkError::Dial {
                    addr: address.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(NetworkError::DialTimeout {
                    addr: address.to_string(),
                })
            }
        };
        let remote = stream
            .peer_addr()
            .map_err(|e| NetworkError::Io(e.to_string()))?;
        let handle = self.spawn_connection(stream, remote, Some(address.to_string()));

        let hello = encode_line(&Message::Ping, &self.address())
            .map_err(|e| NetworkError::Io(e.to_string()))?;
        handle.enqueue(Arc::new(hello))?;
        info!(peer = %address, connection = handle.id(), "connected");
        Ok(handle)
    }

    /// Dials every known peer that lacks a live connection. Returns how many
    /// came up.
    pub async fn reconnect(self: &Arc<Self>) -> usize {
        let me = self.address();
        let dials = self
            .peers
            .disconnected()
            .into_iter()
            .filter(|address| *address != me)
            .map(|address| async move {
                let result = self.dial(&address).await;
                (address, result)
            });
        let mut connected = 0;
        for (address, result) in join_all(dials).await {
            match result {
                Ok(_) => connected += 1,
                Err(e) => debug!(peer = %address, error = %e, "reconnect failed"),
            }
        }
        connected
    }

    fn spawn_connection(
        self: &Arc<Self>,
        stream: TcpStream,
        remote: SocketAddr,
        bound: Option<String>,
    ) -> PeerHandle {
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        let (handle, queue, close) = PeerHandle::new(remote, self.network.outbound_queue);
        if let Some(address) = &bound {
            self.peers.update_connection(address, handle.clone());
        }
        tokio::spawn(write_loop(writer, queue, close, self.network.write_timeout()));
        tokio::spawn(self.clone().read_loop(reader, handle.clone(), bound));
        handle
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        debug!(remote = %remote, "inbound connection");
                        self.spawn_connection(stream, remote, None);
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }
        info!("p2p listener stopped");
    }

    async fn read_loop(
        self: Arc<Self>,
        reader: OwnedReadHalf,
        handle: PeerHandle,
        mut bound: Option<String>,
    ) {
        let mut reader = BufReader::new(reader);
        let mut shutdown = self.shutdown.subscribe();
        let mut line = Vec::with_capacity(1024);
        let max = self.network.max_message_bytes;
        let deadline = self.network.read_timeout();

        let reason = loop {
            if line.len() >= max {
                break format!("message exceeds {max} bytes");
            }
            // Partial bytes stay in `line` across deadlines and cancellation.
            let mut limited = (&mut reader).take((max - line.len()) as u64);
            let read = tokio::select! {
                _ = stopped(&mut shutdown) => break "shutting down".to_string(),
                read = timeout(deadline, limited.read_until(b'\n', &mut line)) => read,
            };
            match read {
                Err(_) => trace!(remote = %handle.remote(), "read deadline passed, still waiting"),
                Ok(Ok(0)) => break "closed by remote".to_string(),
                Ok(Ok(_)) if line.last() == Some(&b'\n') => {
                    let complete = std::mem::take(&mut line);
                    self.handle_line(&complete, &handle, &mut bound);
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => break e.to_string(),
            }
        };

        handle.close();
        if let Some(address) = &bound {
            self.peers.release(address, handle.id());
        }
        debug!(remote = %handle.remote(), peer = ?bound, reason = %reason, "connection closed");
    }

    fn handle_line(self: &Arc<Self>, line: &[u8], handle: &PeerHandle, bound: &mut Option<String>) {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        let (from, message) = match decode_line(line) {
            Ok(Inbound::Known { from, message }) => (from, message),
            Ok(Inbound::Unknown { from, kind }) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(peer = %from, kind = %kind, "dropping message of unknown type");
                return;
            }
            Err(e) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(remote = %handle.remote(), error = %e, "dropping undecodable message");
                return;
            }
        };

        if !from.is_empty() && from != self.address() {
            self.peers.add(&from);
            if bound.is_none() && self.peers.bind_if_vacant(&from, handle.clone()) {
                debug!(peer = %from, connection = handle.id(), "inbound connection bound");
                *bound = Some(from.clone());
            }
        }
        self.dispatch(from, message, handle);
    }

    fn dispatch(self: &Arc<Self>, from: String, message: Message, handle: &PeerHandle) {
        match message {
            Message::Ping => {
                let reply = encode_line(&Message::Pong, &self.address())
                    .map_err(|e| NetworkError::Io(e.to_string()))
                    .and_then(|line| handle.enqueue(Arc::new(line)));
                if let Err(e) = reply {
                    debug!(peer = %from, error = %e, "could not answer ping");
                }
            }
            Message::Pong => trace!(peer = %from, "pong"),
            Message::PeerList(addresses) => {
                let me = self.address();
                let learned = addresses
                    .iter()
                    .filter(|address| **address != me)
                    .filter(|address| self.peers.add(address))
                    .count();
                if learned > 0 {
                    debug!(peer = %from, learned, "learned peers");
                }
            }
            Message::Tx(tx) => match self.admit_transaction(&tx) {
                Ok(Admission::Added(id)) => {
                    debug!(peer = %from, tx = %id, "transaction accepted");
                    self.spawn_relay(Message::Tx(tx), from);
                }
                Ok(Admission::Pending(id)) => {
                    self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
                    trace!(peer = %from, tx = %id, "transaction already pending");
                }
                Ok(Admission::Included(id)) => {
                    self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
                    debug!(peer = %from, tx = %id, "transaction already in a block");
                }
                Err(e) => {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(peer = %from, error = %e, "rejected transaction");
                }
            },
            Message::Block(block) => {
                let index = block.index;
                match self.admit_block(block.clone()) {
                    Ok(Accepted::Extended) => {
                        info!(peer = %from, index, hash = %block.hash, "block accepted");
                        self.spawn_relay(Message::Block(block), from);
                    }
                    Ok(Accepted::Replaced { displaced }) => {
                        info!(peer = %from, index, hash = %block.hash, displaced = %displaced.hash, "tip replaced");
                        self.spawn_relay(Message::Block(block), from);
                    }
                    Err(e @ Rejection::Duplicate { .. }) => {
                        self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
                        trace!(peer = %from, index, reason = %e, "block ignored");
                    }
                    Err(e @ Rejection::StaleIndex { .. }) => {
                        trace!(peer = %from, index, reason = %e, "block ignored");
                    }
                    Err(e) => {
                        info!(peer = %from, index, reason = %e, "block rejected");
                    }
                }
            }
        }
    }

    async fn reconnect_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = interval(self.network.reconnect_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }
            let connected = self.reconnect().await;
            if connected > 0 {
                debug!(connected, "reconnected peers");
            }
        }
    }

    async fn peer_exchange_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let period = self.network.peer_exchange_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }
            let known = self.peers.list();
            let deliveries = self.broadcast(&Message::PeerList(known)).await;
            let failed = settle(deliveries)
                .await
                .into_iter()
                .filter(|(_, result)| result.is_err())
                .count();
            trace!(failed, "peer list exchanged");
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::Receiver<Outgoing>,
    mut close: oneshot::Receiver<()>,
    write_timeout: Duration,
) {
    loop {
        let outgoing = tokio::select! {
            _ = &mut close => break,
            next = queue.recv() => match next {
                Some(outgoing) => outgoing,
                None => break,
            },
        };
        let result = match timeout(write_timeout, writer.write_all(&outgoing.line)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(NetworkError::Io(e.to_string())),
            Err(_) => Err(NetworkError::WriteTimeout),
        };
        let failed = result.is_err();
        let _ = outgoing.done.send(result);
        if failed {
            break;
        }
    }
    // Anything still queued resolves as closed once the receiver drops.
    queue.close();
    let _ = writer.shutdown().await;
}
