#![allow(dead_code)]

use proco_node::config::{NodeConfig, StorageBackend};
use proco_node::Node;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

pub const WAIT: Duration = Duration::from_secs(10);

/// Loopback node with an ephemeral port and short timers.
pub fn test_config(bootstrap: &[&str]) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.network.listen_addr = "127.0.0.1:0".into();
    config.network.bootstrap_peers = bootstrap.iter().map(|s| s.to_string()).collect();
    config.network.reconnect_interval_ms = 100;
    config.network.peer_exchange_interval_ms = 200;
    config.network.dial_timeout_ms = 500;
    config.network.read_timeout_ms = 250;
    config.network.write_timeout_ms = 1_000;
    config.storage.backend = StorageBackend::Memory;
    config.http.enabled = false;
    config
}

pub async fn start_node(bootstrap: &[&str]) -> anyhow::Result<Arc<Node>> {
    start_with(test_config(bootstrap)).await
}

pub async fn start_with(config: NodeConfig) -> anyhow::Result<Arc<Node>> {
    let node = Arc::new(Node::new(config));
    node.start().await?;
    Ok(node)
}

/// Polls `check` until it holds or `WAIT` elapses.
pub async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    check()
}

pub async fn eventually_async<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if check().await {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    false
}

pub fn is_connected(node: &Node, address: &str) -> bool {
    node.peers()
        .iter()
        .any(|peer| peer.address == address && peer.connected)
}

pub fn knows(node: &Node, address: &str) -> bool {
    node.peers().iter().any(|peer| peer.address == address)
}

/// Chain `a <- b <- c`: each node bootstraps from the previous one, and the
/// call returns once every link is up in both directions.
pub async fn line_of_three() -> anyhow::Result<(Arc<Node>, Arc<Node>, Arc<Node>)> {
    let a = start_node(&[]).await?;
    let b = start_node(&[a.address().as_str()]).await?;
    let c = start_node(&[b.address().as_str()]).await?;
    assert!(eventually(|| is_connected(&b, &a.address()) && is_connected(&c, &b.address())).await);
    assert!(eventually(|| knows(&a, &b.address()) && knows(&b, &c.address())).await);
    Ok((a, b, c))
}

/// Three nodes, each connected to the other two.
pub async fn triangle() -> anyhow::Result<(Arc<Node>, Arc<Node>, Arc<Node>)> {
    let a = start_node(&[]).await?;
    let b = start_node(&[a.address().as_str()]).await?;
    let c = start_node(&[a.address().as_str(), b.address().as_str()]).await?;
    let nodes = [&a, &b, &c];
    assert!(
        eventually(|| nodes.iter().all(|x| nodes
            .iter()
            .filter(|y| x.address() != y.address())
            .all(|y| is_connected(x, &y.address()))))
        .await
    );
    Ok((a, b, c))
}
