//! The abstract message algebra: a tagged union of eight verbs, every
//! message carrying a nonce and a sender descriptor. Encoding to/from bytes
//! is delegated to [`crate::wire`].

use crate::id::{Id, ID_LEN};

/// Opaque 20-byte per-exchange correlation token. Requests generate a fresh
/// nonce; responses echo the request's nonce back.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Nonce([u8; ID_LEN]);

impl Nonce {
    pub fn random() -> Self {
        Nonce(Id::random().into_bytes())
    }

    pub fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        Nonce(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for Nonce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Nonce({})", hex::encode(self.0))
    }
}

/// A peer descriptor: `(ip, port, id)`. Used both as a message's `sender`
/// field and as an entry in a `FIND_NODE_RESPONSE` neighbor list.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Peer {
    pub ip: String,
    pub port: u16,
    pub id: Id,
}

impl Peer {
    pub fn new(ip: impl Into<String>, port: u16, id: Id) -> Self {
        Peer {
            ip: ip.into(),
            port,
            id,
        }
    }

    pub fn socket_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(
            self.ip.parse().expect("peer ip must be a valid address"),
            self.port,
        )
    }
}

/// The eight protocol verbs, carrying only their payload; nonce and sender
/// live on the enclosing [`Message`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Body {
    Ping,
    Pong,
    Store { key: Id, value: Vec<u8> },
    StoreResponse,
    FindNode { key: Id },
    FindNodeResponse { neighbors: Vec<Peer> },
    FindValue { key: Id },
    FoundValue { key: Id, value: Vec<u8> },
}

impl Body {
    /// True for the four response variants.
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            Body::Pong | Body::StoreResponse | Body::FindNodeResponse { .. } | Body::FoundValue { .. }
        )
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Body::Ping => "PING",
            Body::Pong => "PONG",
            Body::Store { .. } => "STORE",
            Body::StoreResponse => "STORE_RESPONSE",
            Body::FindNode { .. } => "FIND_NODE",
            Body::FindNodeResponse { .. } => "FIND_NODE_RESPONSE",
            Body::FindValue { .. } => "FIND_VALUE",
            Body::FoundValue { .. } => "FOUND_VALUE",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub nonce: Nonce,
    pub sender: Peer,
    pub body: Body,
}

impl Message {
    pub fn request(sender: Peer, body: Body) -> Self {
        debug_assert!(!body.is_response());
        Message {
            nonce: Nonce::random(),
            sender,
            body,
        }
    }

    pub fn response_to(request_nonce: Nonce, sender: Peer, body: Body) -> Self {
        debug_assert!(body.is_response());
        Message {
            nonce: request_nonce,
            sender,
            body,
        }
    }

    pub fn is_response(&self) -> bool {
        self.body.is_response()
    }
}
