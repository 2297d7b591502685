//! Node configuration constants: replication factor, lookup concurrency,
//! and the two timing constants that bound an RPC and a bucket refresh.

use std::time::Duration;

use kad_core::Id;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Replication factor / bucket capacity.
    pub k: usize,
    /// Lookup concurrency degree.
    pub alpha: usize,
    /// Per-RPC request timeout.
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    /// Interval after which an inactive bucket is due for a refresh.
    #[serde(with = "duration_secs")]
    pub refresh_interval: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            k: 20,
            alpha: 3,
            request_timeout: Duration::from_secs(5),
            refresh_interval: Duration::from_secs(3600),
        }
    }
}

/// A node's own id is generated once, at process start, not read from
/// config — identifiers are immutable once created.
pub fn generate_node_id() -> Id {
    Id::random()
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
