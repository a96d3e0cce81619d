use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use proco_core::crypto::KeyPair;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "proco-cli")]
#[command(about = "CLI client for a ProCo ledger node")]
struct Cli {
    /// Node base URL (e.g. http://127.0.0.1:8080)
    #[arg(long, global = true, default_value = "http://127.0.0.1:8080")]
    node: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a key pair; the public key is the address
    Keygen,
    /// Sign a transfer locally and submit it
    Send {
        /// Hex secret key of the sender
        #[arg(long, env = "PROCO_SECRET_KEY")]
        secret: String,
        /// Recipient address
        #[arg(long)]
        to: String,
        /// Amount
        #[arg(long)]
        amount: u64,
    },
    /// Seal pending transactions into a block
    Mine {
        /// Block label; required when the mempool is empty
        #[arg(long)]
        data: Option<String>,
    },
    /// Print the full chain
    Chain,
    /// Check every block's link and hash
    Validate,
    /// List pending transactions
    Mempool,
    /// List known peers
    Peers,
    /// Register a peer address (host:port)
    AddPeer { address: String },
    /// Forget a peer address
    RemovePeer { address: String },
}

struct Client {
    base: String,
    http: reqwest::Client,
}

impl Client {
    fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    async fn get(&self, path: &str) -> Result<Value> {
        debug!(path, "GET");
        let res = self.http.get(format!("{}{path}", self.base)).send().await?;
        Self::body(res).await
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Value> {
        debug!(path, "POST");
        let res = self
            .http
            .post(format!("{}{path}", self.base))
            .json(body)
            .send()
            .await?;
        Self::body(res).await
    }

    async fn delete(&self, path: &str) -> Result<Value> {
        debug!(path, "DELETE");
        let res = self.http.delete(format!("{}{path}", self.base)).send().await?;
        Self::body(res).await
    }

    async fn body(res: reqwest::Response) -> Result<Value> {
        let status = res.status();
        let text = res.text().await?;
        let value = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).with_context(|| format!("unexpected response: {text}"))?
        };
        println!("status: {status}");
        Ok(value)
    }
}

fn print(value: &Value) -> Result<()> {
    if !value.is_null() {
        println!("{}", serde_json::to_string_pretty(value)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .init();

    let cli = Cli::parse();
    let client = Client::new(&cli.node);
    let value = match cli.cmd {
        Command::Keygen => {
            let key = KeyPair::generate();
            json!({ "address": key.address(), "secret": key.secret_key_hex() })
        }
        Command::Send { secret, to, amount } => {
            let key = KeyPair::from_secret_hex(&secret)?;
            let tx = key.transfer(to, amount);
            client.post("/tx", &tx).await?
        }
        Command::Mine { data } => client.post("/blocks", &json!({ "data": data })).await?,
        Command::Chain => client.get("/chain").await?,
        Command::Validate => client.get("/chain/validate").await?,
        Command::Mempool => client.get("/mempool").await?,
        Command::Peers => client.get("/peers").await?,
        Command::AddPeer { address } => {
            client.post("/peers", &json!({ "address": address })).await?
        }
        Command::RemovePeer { address } => {
            client
                .delete(&format!("/peers/{}", urlencoding::encode(&address)))
                .await?
        }
    };
    print(&value)
}
