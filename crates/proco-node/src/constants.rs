use std::time::Duration;

pub(crate) const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:6001";
pub(crate) const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:8080";
pub(crate) const DEFAULT_DATA_DIR: &str = "./data";

pub(crate) const PEER_EXCHANGE_INTERVAL: Duration = Duration::from_secs(15);
pub(crate) const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);
pub(crate) const DIAL_TIMEOUT: Duration = Duration::from_secs(3);
pub(crate) const READ_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
pub(crate) const AUTOSAVE_INTERVAL: Duration = Duration::from_secs(30);

pub(crate) const OUTBOUND_QUEUE_CAPACITY: usize = 64;
pub(crate) const MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;
