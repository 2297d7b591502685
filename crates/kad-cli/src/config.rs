//! On-disk CLI configuration: a loadable TOML file with sensible defaults.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address this node binds its UDP socket to.
    pub bind: String,

    /// Peers to try, in order, when bootstrapping onto the network.
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,

    pub dht: DhtSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhtSection {
    pub k: usize,
    pub alpha: usize,
    pub request_timeout_secs: u64,
    pub refresh_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let defaults = kad_dht::NodeConfig::default();
        Config {
            bind: "0.0.0.0:9876".to_string(),
            bootstrap_peers: vec![],
            dht: DhtSection {
                k: defaults.k,
                alpha: defaults.alpha,
                request_timeout_secs: defaults.request_timeout.as_secs(),
                refresh_interval_secs: defaults.refresh_interval.as_secs(),
            },
        }
    }
}

impl Config {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn node_config(&self) -> kad_dht::NodeConfig {
        kad_dht::NodeConfig {
            k: self.dht.k,
            alpha: self.dht.alpha,
            request_timeout: std::time::Duration::from_secs(self.dht.request_timeout_secs),
            refresh_interval: std::time::Duration::from_secs(self.dht.refresh_interval_secs),
        }
    }
}

pub fn expand_path(path: &str) -> std::path::PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    std::path::PathBuf::from(path)
}
