//! kadnet - a standalone Kademlia DHT node

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kad_core::{Id, Peer, UdpTransport};
use kad_dht::Node;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
use config::Config;

#[derive(Parser)]
#[command(name = "kad-node")]
#[command(about = "Run or query a kadnet Kademlia DHT node", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "~/.kadnet/config.toml")]
    config: String,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a default config file
    Init,

    /// Run a node: bind the socket, bootstrap, and serve RPCs forever
    Serve {
        /// Override the bind address from the config file
        #[arg(long)]
        bind: Option<String>,
    },

    /// Store a value under a key, via a short-lived node
    Put {
        /// Hex-encoded 20-byte key
        key: String,
        /// Value to store
        value: String,
        /// Bootstrap peer, "ip:port/hex-id"
        #[arg(short, long)]
        bootstrap: String,
    },

    /// Look up a value by key, via a short-lived node
    Get {
        /// Hex-encoded 20-byte key
        key: String,
        #[arg(short, long)]
        bootstrap: String,
    },

    /// Print a freshly generated node id and exit
    Id,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { EnvFilter::new("debug") } else { EnvFilter::new("info") };
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    match cli.command {
        Commands::Init => init_config(&cli.config),
        Commands::Serve { bind } => serve(&cli.config, bind).await,
        Commands::Put { key, value, bootstrap } => put(&cli.config, &key, value.into_bytes(), &bootstrap).await,
        Commands::Get { key, bootstrap } => get(&cli.config, &key, &bootstrap).await,
        Commands::Id => {
            println!("{}", Id::random());
            Ok(())
        }
    }
}

fn init_config(path: &str) -> Result<()> {
    let path = config::expand_path(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if path.exists() {
        println!("config already exists at {}", path.display());
        return Ok(());
    }
    let toml = toml::to_string_pretty(&Config::default())?;
    std::fs::write(&path, toml)?;
    println!("wrote default config to {}", path.display());
    Ok(())
}

fn load_config(path: &str) -> Config {
    let path = config::expand_path(path);
    Config::load(&path).unwrap_or_else(|_| {
        tracing::warn!(path = %path.display(), "no config file found, using defaults");
        Config::default()
    })
}

fn parse_id(hex_str: &str) -> Result<Id> {
    let bytes = hex::decode(hex_str).context("key/id must be hex-encoded")?;
    let array: [u8; kad_core::ID_LEN] =
        bytes.try_into().map_err(|_| anyhow::anyhow!("key/id must decode to exactly {} bytes", kad_core::ID_LEN))?;
    Ok(Id::from_bytes(array))
}

/// Parses `ip:port/hex-id` into a [`Peer`].
fn parse_peer(spec: &str) -> Result<Peer> {
    let (addr_part, id_part) = spec
        .split_once('/')
        .ok_or_else(|| anyhow::anyhow!("peer must be formatted as ip:port/hex-id"))?;
    let addr: SocketAddr = addr_part.parse().context("invalid peer address")?;
    let id = parse_id(id_part)?;
    Ok(Peer::new(addr.ip().to_string(), addr.port(), id))
}

async fn build_node(config: &Config, bind_override: Option<String>) -> Result<std::sync::Arc<Node<UdpTransport>>> {
    let bind_addr: SocketAddr = bind_override.unwrap_or_else(|| config.bind.clone()).parse().context("invalid bind address")?;
    let transport = UdpTransport::bind(bind_addr).await.context("failed to bind UDP socket")?;
    let local_id = kad_dht::generate_node_id();
    let local = Peer::new(bind_addr.ip().to_string(), bind_addr.port(), local_id);
    tracing::info!(id = %local_id, addr = %bind_addr, "node identity generated");
    Ok(Node::new(transport, local, config.node_config()))
}

async fn serve(config_path: &str, bind: Option<String>) -> Result<()> {
    let config = load_config(config_path);
    let node = build_node(&config, bind).await?;
    node.listen().await;

    for peer_spec in &config.bootstrap_peers {
        match parse_peer(peer_spec) {
            Ok(peer) => match node.bootstrap(peer).await {
                Ok(()) => {
                    tracing::info!(peer = %peer_spec, "bootstrapped");
                    break;
                }
                Err(error) => tracing::warn!(%error, peer = %peer_spec, "bootstrap attempt failed"),
            },
            Err(error) => tracing::warn!(%error, peer = %peer_spec, "unparseable bootstrap peer, skipping"),
        }
    }

    tracing::info!("node serving. press ctrl+c to stop");
    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    Ok(())
}

async fn put(config_path: &str, key_hex: &str, value: Vec<u8>, bootstrap: &str) -> Result<()> {
    let config = load_config(config_path);
    let key = parse_id(key_hex)?;
    let bootstrap_peer = parse_peer(bootstrap)?;

    let node = build_node(&config, None).await?;
    node.listen().await;
    node.bootstrap(bootstrap_peer).await.context("bootstrap failed")?;
    node.store_value(key, value).await.context("store failed")?;
    println!("stored {key_hex}");
    Ok(())
}

async fn get(config_path: &str, key_hex: &str, bootstrap: &str) -> Result<()> {
    let config = load_config(config_path);
    let key = parse_id(key_hex)?;
    let bootstrap_peer = parse_peer(bootstrap)?;

    let node = build_node(&config, None).await?;
    node.listen().await;
    node.bootstrap(bootstrap_peer).await.context("bootstrap failed")?;

    match node.find_value(key).await {
        Ok(value) => {
            println!("{}", String::from_utf8_lossy(&value));
            Ok(())
        }
        Err(error) => {
            println!("not found: {error}");
            Ok(())
        }
    }
}
