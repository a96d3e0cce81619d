//! Node configuration, read from an optional TOML file.
//!
//! Every field has a default, so an empty file (or none at all) yields a
//! working single-node setup on localhost.

use crate::constants::*;
use anyhow::{bail, Context, Result};
use proco_core::constants::{GENESIS_DATA, GENESIS_TIMESTAMP};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub genesis: GenesisConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Address advertised to peers. Defaults to the bound listen address.
    #[serde(default)]
    pub public_addr: Option<String>,
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,
    #[serde(default = "default_peer_exchange_ms")]
    pub peer_exchange_interval_ms: u64,
    #[serde(default = "default_reconnect_ms")]
    pub reconnect_interval_ms: u64,
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            public_addr: None,
            bootstrap_peers: Vec::new(),
            peer_exchange_interval_ms: default_peer_exchange_ms(),
            reconnect_interval_ms: default_reconnect_ms(),
            dial_timeout_ms: default_dial_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            outbound_queue: default_outbound_queue(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

impl NetworkConfig {
    pub fn peer_exchange_interval(&self) -> Duration {
        Duration::from_millis(self.peer_exchange_interval_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Block 0 is rebuilt from these two values on every node, so peers only
/// agree on a chain when they share them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisConfig {
    #[serde(default = "default_genesis_data")]
    pub data: String,
    #[serde(default = "default_genesis_timestamp")]
    pub timestamp: u64,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self {
            data: default_genesis_data(),
            timestamp: default_genesis_timestamp(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Json,
    Sled,
    /// Nothing is persisted.
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Zero disables periodic saves; the snapshot is still written on exit.
    #[serde(default = "default_autosave_secs")]
    pub autosave_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            data_dir: default_data_dir(),
            autosave_interval_secs: default_autosave_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_http_addr")]
    pub listen_addr: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: default_http_addr(),
        }
    }
}

impl NodeConfig {
    /// Reads `path` when given, otherwise returns the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("read config {}", path.display()))?;
                Self::from_toml(&raw).with_context(|| format!("parse config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.network
            .listen_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("network.listen_addr {:?}", self.network.listen_addr))?;
        if self.http.enabled {
            self.http
                .listen_addr
                .parse::<SocketAddr>()
                .with_context(|| format!("http.listen_addr {:?}", self.http.listen_addr))?;
        }
        let intervals = [
            ("peer_exchange_interval_ms", self.network.peer_exchange_interval_ms),
            ("reconnect_interval_ms", self.network.reconnect_interval_ms),
            ("dial_timeout_ms", self.network.dial_timeout_ms),
            ("read_timeout_ms", self.network.read_timeout_ms),
            ("write_timeout_ms", self.network.write_timeout_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                bail!("network.{name} must be greater than zero");
            }
        }
        if self.network.outbound_queue == 0 {
            bail!("network.outbound_queue must be greater than zero");
        }
        if self.storage.backend != StorageBackend::Memory
            && self.storage.data_dir.as_os_str().is_empty()
        {
            bail!("storage.data_dir must be set");
        }
        Ok(())
    }
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

fn default_http_addr() -> String {
    DEFAULT_HTTP_ADDR.to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

fn default_genesis_data() -> String {
    GENESIS_DATA.to_string()
}

fn default_genesis_timestamp() -> u64 {
    GENESIS_TIMESTAMP
}

fn default_peer_exchange_ms() -> u64 {
    PEER_EXCHANGE_INTERVAL.as_millis() as u64
}

fn default_reconnect_ms() -> u64 {
    RECONNECT_INTERVAL.as_millis() as u64
}

fn default_dial_timeout_ms() -> u64 {
    DIAL_TIMEOUT.as_millis() as u64
}

fn default_read_timeout_ms() -> u64 {
    READ_TIMEOUT.as_millis() as u64
}

fn default_write_timeout_ms() -> u64 {
    WRITE_TIMEOUT.as_millis() as u64
}

fn default_autosave_secs() -> u64 {
    AUTOSAVE_INTERVAL.as_secs()
}

fn default_outbound_queue() -> usize {
    OUTBOUND_QUEUE_CAPACITY
}

fn default_max_message_bytes() -> usize {
    MAX_MESSAGE_BYTES
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = NodeConfig::from_toml("").unwrap();
        assert_eq!(config, NodeConfig::default());
        assert_eq!(config.network.reconnect_interval(), Duration::from_secs(5));
        assert_eq!(config.network.outbound_queue, 64);
        assert_eq!(config.genesis.data, "Genesis Block");
        config.validate().unwrap();
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = NodeConfig::from_toml(
            r#"
            [network]
            listen_addr = "0.0.0.0:7000"
            public_addr = "10.0.0.5:7000"
            bootstrap_peers = ["10.0.0.6:7000"]

            [storage]
            backend = "sled"
            "#,
        )
        .unwrap();
        assert_eq!(config.network.public_addr.as_deref(), Some("10.0.0.5:7000"));
        assert_eq!(config.network.bootstrap_peers.len(), 1);
        assert_eq!(config.network.dial_timeout_ms, 3_000);
        assert_eq!(config.storage.backend, StorageBackend::Sled);
        assert_eq!(config.storage.data_dir, PathBuf::from("./data"));
        assert!(config.http.enabled);
    }

    #[test]
    fn zero_interval_is_refused() {
        let mut config = NodeConfig::default();
        config.network.reconnect_interval_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reconnect_interval_ms"));
    }

    #[test]
    fn bad_listen_addr_is_refused() {
        let mut config = NodeConfig::default();
        config.network.listen_addr = "nowhere".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        fs::write(&path, "[genesis]\ndata = \"devnet\"\ntimestamp = 42\n").unwrap();
        let config = NodeConfig::load(Some(&path)).unwrap();
        assert_eq!(config.genesis.data, "devnet");
        assert_eq!(config.genesis.timestamp, 42);
        assert!(NodeConfig::load(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
