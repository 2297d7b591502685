pub mod config;
pub mod error;
pub mod lookup;
pub mod multiplexer;
pub mod node;
pub mod routing;
pub mod storage;

pub use config::{generate_node_id, NodeConfig};
pub use error::{DhtError, Result};
pub use lookup::{LookupEngine, LookupMode, LookupOutcome};
pub use multiplexer::Multiplexer;
pub use node::Node;
pub use routing::{ObserveOutcome, RoutingEntry, RoutingTable};
pub use storage::ValueStore;
