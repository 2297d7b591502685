//! kad-core — identifier algebra, the message algebra and its wire codec,
//! and the datagram transport abstraction underneath a `kadnet` DHT node.
//!
//! This crate is the leaf of the workspace: everything else (`kad-dht`) is
//! built on top of the types here.

pub mod error;
pub mod id;
pub mod message;
pub mod transport;
pub mod wire;

pub use error::{Error, Result};
pub use id::{Distance, Id, ID_BITS, ID_LEN};
pub use message::{Body, Message, Nonce, Peer};
pub use transport::{Transport, UdpTransport};
