//! Wire codec: bit-exact encode/decode of [`Message`] to/from a byte buffer.
//!
//! The wire format is treated as a replaceable, external collaborator —
//! this is the one `kadnet` ships by default: a hand-written `prost`
//! envelope and oneof, built without a `.proto` file or a `protoc` build
//! dependency.

use prost::Message as _;

use crate::error::{Error, Result};
use crate::id::{Id, ID_LEN};
use crate::message::{Body, Message, Nonce, Peer};

#[derive(Clone, PartialEq, ::prost::Message)]
struct WireEnvelope {
    #[prost(bytes, tag = "1")]
    nonce: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    sender: Option<WirePeer>,
    #[prost(oneof = "WirePayload", tags = "10, 11, 20, 21, 30, 31, 40, 41")]
    payload: Option<WirePayload>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct WirePeer {
    #[prost(string, tag = "1")]
    ip: String,
    #[prost(uint32, tag = "2")]
    port: u32,
    #[prost(bytes, tag = "3")]
    id: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Oneof)]
enum WirePayload {
    #[prost(message, tag = "10")]
    Ping(WireEmpty),
    #[prost(message, tag = "11")]
    Pong(WireEmpty),
    #[prost(message, tag = "20")]
    Store(WireKeyValue),
    #[prost(message, tag = "21")]
    StoreResponse(WireEmpty),
    #[prost(message, tag = "30")]
    FindNode(WireKey),
    #[prost(message, tag = "31")]
    FindNodeResponse(WireNeighbors),
    #[prost(message, tag = "40")]
    FindValue(WireKey),
    #[prost(message, tag = "41")]
    FoundValue(WireKeyValue),
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct WireEmpty {}

#[derive(Clone, PartialEq, ::prost::Message)]
struct WireKey {
    #[prost(bytes, tag = "1")]
    key: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct WireKeyValue {
    #[prost(bytes, tag = "1")]
    key: Vec<u8>,
    #[prost(bytes, tag = "2")]
    value: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct WireNeighbors {
    #[prost(message, repeated, tag = "1")]
    neighbors: Vec<WirePeer>,
}

fn read_id(bytes: &[u8]) -> Result<Id> {
    let array: [u8; ID_LEN] = bytes
        .try_into()
        .map_err(|_| Error::Decode(prost::DecodeError::new("id field is not 20 bytes")))?;
    Ok(Id::from_bytes(array))
}

/// Rejects a peer whose `ip` field wouldn't parse as a socket address later —
/// malformed self-declared senders and neighbor-list entries are refused
/// here rather than surviving into the routing table.
fn read_peer(peer: WirePeer) -> Result<Peer> {
    peer.ip
        .parse::<std::net::IpAddr>()
        .map_err(|_| Error::Decode(prost::DecodeError::new("peer ip is not a valid address")))?;
    Ok(Peer::new(peer.ip, peer.port as u16, read_id(&peer.id)?))
}

fn write_peer(peer: &Peer) -> WirePeer {
    WirePeer {
        ip: peer.ip.clone(),
        port: peer.port as u32,
        id: peer.id.as_bytes().to_vec(),
    }
}

/// Encodes a [`Message`] into a self-contained frame.
pub fn encode(message: &Message) -> Vec<u8> {
    let payload = match &message.body {
        Body::Ping => WirePayload::Ping(WireEmpty {}),
        Body::Pong => WirePayload::Pong(WireEmpty {}),
        Body::Store { key, value } => WirePayload::Store(WireKeyValue {
            key: key.as_bytes().to_vec(),
            value: value.clone(),
        }),
        Body::StoreResponse => WirePayload::StoreResponse(WireEmpty {}),
        Body::FindNode { key } => WirePayload::FindNode(WireKey {
            key: key.as_bytes().to_vec(),
        }),
        Body::FindNodeResponse { neighbors } => WirePayload::FindNodeResponse(WireNeighbors {
            neighbors: neighbors.iter().map(write_peer).collect(),
        }),
        Body::FindValue { key } => WirePayload::FindValue(WireKey {
            key: key.as_bytes().to_vec(),
        }),
        Body::FoundValue { key, value } => WirePayload::FoundValue(WireKeyValue {
            key: key.as_bytes().to_vec(),
            value: value.clone(),
        }),
    };

    let envelope = WireEnvelope {
        nonce: message.nonce.as_bytes().to_vec(),
        sender: Some(write_peer(&message.sender)),
        payload: Some(payload),
    };

    envelope.encode_to_vec()
}

/// Decodes a frame into a [`Message`], or reports a decode error.
///
/// The caller is responsible for logging and dropping a decode error —
/// this function never panics on malformed input.
pub fn decode(buf: &[u8]) -> Result<Message> {
    let envelope = WireEnvelope::decode(buf)?;

    let nonce_bytes: [u8; ID_LEN] = envelope
        .nonce
        .as_slice()
        .try_into()
        .map_err(|_| Error::Decode(prost::DecodeError::new("nonce is not 20 bytes")))?;
    let nonce = Nonce::from_bytes(nonce_bytes);

    let sender = envelope
        .sender
        .ok_or_else(|| Error::Decode(prost::DecodeError::new("missing sender")))
        .and_then(read_peer)?;

    let payload = envelope
        .payload
        .ok_or_else(|| Error::Decode(prost::DecodeError::new("missing payload")))?;

    let body = match payload {
        WirePayload::Ping(_) => Body::Ping,
        WirePayload::Pong(_) => Body::Pong,
        WirePayload::Store(kv) => Body::Store {
            key: read_id(&kv.key)?,
            value: kv.value,
        },
        WirePayload::StoreResponse(_) => Body::StoreResponse,
        WirePayload::FindNode(k) => Body::FindNode {
            key: read_id(&k.key)?,
        },
        WirePayload::FindNodeResponse(n) => Body::FindNodeResponse {
            neighbors: n
                .neighbors
                .into_iter()
                .map(read_peer)
                .collect::<Result<Vec<_>>>()?,
        },
        WirePayload::FindValue(k) => Body::FindValue {
            key: read_id(&k.key)?,
        },
        WirePayload::FoundValue(kv) => Body::FoundValue {
            key: read_id(&kv.key)?,
            value: kv.value,
        },
    };

    Ok(Message { nonce, sender, body })
}
