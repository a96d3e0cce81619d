use anyhow::Context;
use clap::Parser;
use proco_node::config::{NodeConfig, StorageBackend};
use proco_node::{api, Node};
use proco_storage::{json_store::JsonFileStore, sled_store::SledStore, SnapshotStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};

#[derive(Parser, Debug)]
#[command(name = "proco-node", version, about = "ProCo ledger node")]
struct Args {
    /// Optional TOML config file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// P2P listen address, e.g. 127.0.0.1:6001
    #[arg(long)]
    listen: Option<String>,

    /// Address advertised to peers when it differs from the listen address
    #[arg(long)]
    public_addr: Option<String>,

    /// HTTP API address, e.g. 127.0.0.1:8080
    #[arg(long)]
    http: Option<String>,

    /// Bootstrap peer, repeatable
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Data directory for snapshots
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Snapshot backend: json, sled or memory
    #[arg(long, value_parser = parse_backend)]
    storage: Option<StorageBackend>,

    /// Disable the HTTP API
    #[arg(long)]
    no_http: bool,
}

fn parse_backend(raw: &str) -> Result<StorageBackend, String> {
    match raw {
        "json" => Ok(StorageBackend::Json),
        "sled" => Ok(StorageBackend::Sled),
        "memory" => Ok(StorageBackend::Memory),
        other => Err(format!("unknown storage backend {other:?}")),
    }
}

impl Args {
    fn into_config(self) -> anyhow::Result<NodeConfig> {
        let mut config = NodeConfig::load(self.config.as_deref())?;
        if let Some(listen) = self.listen {
            config.network.listen_addr = listen;
        }
        if let Some(public_addr) = self.public_addr {
            config.network.public_addr = Some(public_addr);
        }
        if let Some(http) = self.http {
            config.http.listen_addr = http;
        }
        if self.no_http {
            config.http.enabled = false;
        }
        config.network.bootstrap_peers.extend(self.peers);
        if let Some(data_dir) = self.data_dir {
            config.storage.data_dir = data_dir;
        }
        if let Some(backend) = self.storage {
            config.storage.backend = backend;
        }
        config.validate()?;
        Ok(config)
    }
}

fn open_store(config: &NodeConfig) -> anyhow::Result<Option<Arc<dyn SnapshotStore>>> {
    let dir = &config.storage.data_dir;
    let store: Arc<dyn SnapshotStore> = match config.storage.backend {
        StorageBackend::Json => Arc::new(JsonFileStore::in_dir(dir)?),
        StorageBackend::Sled => Arc::new(SledStore::open(dir.join("sled"))?),
        StorageBackend::Memory => return Ok(None),
    };
    Ok(Some(store))
}

fn save(node: &Node, store: Option<&Arc<dyn SnapshotStore>>) {
    if let Some(store) = store {
        if let Err(e) = node.save(store.as_ref()) {
            error!(error = %e, "failed to save snapshot");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Args::parse().into_config()?;
    let store = open_store(&config)?;
    let node = Arc::new(match &store {
        Some(store) => Node::load(config.clone(), store.as_ref())?,
        None => Node::new(config.clone()),
    });

    let p2p = node.start().await.context("start p2p listener")?;
    info!(p2p = %p2p, address = %node.address(), "proco-node running");

    if config.http.enabled {
        let listener = tokio::net::TcpListener::bind(&config.http.listen_addr)
            .await
            .with_context(|| format!("bind http {}", config.http.listen_addr))?;
        info!("http api listening on http://{}", listener.local_addr()?);
        let app = api::router(node.clone());
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "http server stopped");
            }
        });
    }

    if store.is_some() && config.storage.autosave_interval_secs > 0 {
        let node = node.clone();
        let store = store.clone();
        let period = Duration::from_secs(config.storage.autosave_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                save(&node, store.as_ref());
            }
        });
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not listen for ctrl-c, shutting down");
    }
    info!("shutting down");
    node.shutdown();
    save(&node, store.as_ref());
    Ok(())
}
