//! The RPC multiplexer: decodes inbound frames, feeds the routing table,
//! and either completes an in-flight request (by nonce) or dispatches a
//! verb handler. In-flight requests are tracked in a nonce-keyed map of
//! one-shot completion channels, so an arbitrary number of requests can be
//! outstanding on one socket at once.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use kad_core::{wire, Body, Message, Nonce, Peer, Transport};

use crate::error::{DhtError, Result};
use crate::routing::{ObserveOutcome, RoutingTable};
use crate::storage::ValueStore;

/// Owns the socket, the in-flight request map, and the local value store;
/// dispatches verb handlers and feeds every observed remote into the
/// routing table.
pub struct Multiplexer<T: Transport> {
    transport: Arc<T>,
    local: Peer,
    k: usize,
    table: Arc<Mutex<RoutingTable>>,
    storage: Mutex<ValueStore>,
    in_flight: Mutex<HashMap<Nonce, oneshot::Sender<Message>>>,
}

impl<T: Transport + Send + Sync + 'static> Multiplexer<T> {
    pub fn new(transport: Arc<T>, local: Peer, k: usize, table: Arc<Mutex<RoutingTable>>) -> Arc<Self> {
        Arc::new(Multiplexer {
            transport,
            local,
            k,
            table,
            storage: Mutex::new(ValueStore::new()),
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    pub fn local(&self) -> &Peer {
        &self.local
    }

    pub fn storage(&self) -> &Mutex<ValueStore> {
        &self.storage
    }

    /// Drives the receive loop until the transport reports an error.
    /// Each inbound datagram is handled on its own task so one slow verb
    /// handler can't stall correlation of unrelated responses.
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.transport.recv().await {
                Ok((data, addr)) => {
                    let this = Arc::clone(&self);
                    tokio::spawn(async move { this.handle_datagram(data, addr).await });
                }
                Err(error) => {
                    warn!(%error, "transport receive failed; multiplexer loop exiting");
                    return;
                }
            }
        }
    }

    async fn handle_datagram(self: Arc<Self>, data: Vec<u8>, addr: SocketAddr) {
        let message = match wire::decode(&data) {
            Ok(message) => message,
            Err(error) => {
                warn!(%error, %addr, "dropping malformed frame");
                return;
            }
        };

        if message.sender.id == self.local.id {
            debug!(%addr, "dropping self-reflected frame");
            return;
        }

        // The datagram's observed source `addr` is a stronger witness of
        // reachability than the self-declared sender, but the core trusts
        // `sender` for table membership and reply targeting. `addr` is
        // only used here for the debug log.
        debug!(%addr, sender = %message.sender.id, tag = message.body.tag(), "received frame");

        self.observe_and_maybe_probe(message.sender.clone());

        if message.is_response() {
            self.complete_in_flight(message);
        } else {
            self.dispatch_request(message).await;
        }
    }

    fn observe_and_maybe_probe(self: &Arc<Self>, peer: Peer) {
        let outcome = self.table.lock().unwrap().observe(peer);
        if let ObserveOutcome::Full { candidate } = outcome {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.probe_eviction_candidate(candidate).await });
        }
    }

    /// On a full bucket, probe the least-recently-seen entry and only
    /// evict it if it fails to respond — preferring old, reachable peers
    /// over new, unverified ones.
    async fn probe_eviction_candidate(self: Arc<Self>, candidate: Peer) {
        let timeout = Duration::from_secs(5);
        match self.send_request(&candidate, Body::Ping, timeout).await {
            Ok(_) => debug!(peer = %candidate.id, "eviction candidate answered, keeping it"),
            Err(_) => {
                let mut table = self.table.lock().unwrap();
                if table.contains(&candidate.id) {
                    table.evict(&candidate.id);
                    debug!(peer = %candidate.id, "eviction candidate unresponsive, evicted");
                }
            }
        }
    }

    fn complete_in_flight(&self, message: Message) {
        let sender = self.in_flight.lock().unwrap().remove(&message.nonce);
        match sender {
            Some(tx) => {
                // A dropped receiver means the request already timed out
                // and the caller stopped listening; nothing to do.
                let _ = tx.send(message);
            }
            None => warn!(nonce = ?message.nonce, "dropping response with unrecognized nonce"),
        }
    }

    async fn dispatch_request(&self, request: Message) {
        let response_body = match &request.body {
            Body::Ping => Body::Pong,
            Body::Store { key, value } => {
                self.storage.lock().unwrap().put(*key, value.clone());
                Body::StoreResponse
            }
            Body::FindNode { key } => Body::FindNodeResponse {
                neighbors: self.table.lock().unwrap().closest_to(key, self.k),
            },
            Body::FindValue { key } => match self.storage.lock().unwrap().get(key).cloned() {
                Some(value) => Body::FoundValue { key: *key, value },
                None => Body::FindNodeResponse {
                    neighbors: self.table.lock().unwrap().closest_to(key, self.k),
                },
            },
            other => {
                warn!(tag = other.tag(), "received a response-shaped message as a request");
                return;
            }
        };

        let response = Message::response_to(request.nonce, self.local.clone(), response_body);
        let bytes = wire::encode(&response);
        if let Err(error) = self.transport.send_to(request.sender.socket_addr(), bytes).await {
            warn!(%error, peer = %request.sender.id, "failed to send response");
        }
    }

    /// Sends a request and awaits its response or `timeout`. Refuses to
    /// send to self.
    pub async fn send_request(&self, dest: &Peer, body: Body, timeout: Duration) -> Result<Message> {
        assert_ne!(dest.id, self.local.id, "refusing to send a request to self");

        let request = Message::request(self.local.clone(), body);
        let nonce = request.nonce;
        let (tx, rx) = oneshot::channel();
        self.in_flight.lock().unwrap().insert(nonce, tx);

        let bytes = wire::encode(&request);
        if let Err(error) = self.transport.send_to(dest.socket_addr(), bytes).await {
            self.in_flight.lock().unwrap().remove(&nonce);
            return Err(DhtError::Transport(error));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                // The sender was dropped without completing — treated the
                // same as a timeout since no response will ever arrive.
                self.in_flight.lock().unwrap().remove(&nonce);
                Err(DhtError::Timeout)
            }
            Err(_) => {
                self.in_flight.lock().unwrap().remove(&nonce);
                Err(DhtError::Timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kad_core::transport::mock::MockNetwork;
    use kad_core::Id;

    fn peer(addr: &str, id: Id) -> Peer {
        let sock: SocketAddr = addr.parse().unwrap();
        Peer::new(sock.ip().to_string(), sock.port(), id)
    }

    #[tokio::test]
    async fn ping_pong_round_trip() {
        let network = MockNetwork::new();
        let a_addr = "127.0.0.1:9101";
        let b_addr = "127.0.0.1:9102";
        let a_id = Id::random();
        let b_id = Id::random();

        let a_peer = peer(a_addr, a_id);
        let b_peer = peer(b_addr, b_id);

        let a_transport = Arc::new(network.register(a_addr.parse().unwrap()));
        let b_transport = Arc::new(network.register(b_addr.parse().unwrap()));

        let a_table = Arc::new(Mutex::new(RoutingTable::new(a_id, 20)));
        let b_table = Arc::new(Mutex::new(RoutingTable::new(b_id, 20)));

        let a_mux = Multiplexer::new(a_transport, a_peer.clone(), 20, a_table);
        let b_mux = Multiplexer::new(b_transport, b_peer.clone(), 20, b_table.clone());

        // a's own mux must run too, to receive b's response to its request.
        tokio::spawn(Arc::clone(&a_mux).run());
        tokio::spawn(Arc::clone(&b_mux).run());

        let response = a_mux
            .send_request(&b_peer, Body::Ping, Duration::from_secs(1))
            .await
            .expect("ping should succeed");
        assert_eq!(response.body, Body::Pong);

        // b's receive path must have observed a into its table.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(b_table.lock().unwrap().contains(&a_id));
    }

    #[tokio::test]
    async fn send_request_times_out_without_a_response() {
        let network = MockNetwork::new();
        let a_addr: SocketAddr = "127.0.0.1:9111".parse().unwrap();
        let b_addr: SocketAddr = "127.0.0.1:9112".parse().unwrap();
        let a_id = Id::random();
        let b_id = Id::random();

        let a_transport = Arc::new(network.register(a_addr));
        let _b_transport = network.register(b_addr);

        let a_table = Arc::new(Mutex::new(RoutingTable::new(a_id, 20)));
        let a_mux = Multiplexer::new(a_transport, peer(&a_addr.to_string(), a_id), 20, a_table);

        let b_peer = peer(&b_addr.to_string(), b_id);
        let result = a_mux.send_request(&b_peer, Body::Ping, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(DhtError::Timeout)));
    }

    #[tokio::test]
    async fn response_with_mismatched_nonce_does_not_complete_the_request() {
        let network = MockNetwork::new();
        let a_addr: SocketAddr = "127.0.0.1:9121".parse().unwrap();
        let b_addr: SocketAddr = "127.0.0.1:9122".parse().unwrap();
        let a_id = Id::random();
        let b_id = Id::random();

        let a_transport = Arc::new(network.register(a_addr));
        let b_transport = network.register(b_addr);

        let a_table = Arc::new(Mutex::new(RoutingTable::new(a_id, 20)));
        let a_mux = Multiplexer::new(a_transport, peer(&a_addr.to_string(), a_id), 20, a_table);
        tokio::spawn(Arc::clone(&a_mux).run());

        let b_peer = peer(&b_addr.to_string(), b_id);
        let request_handle = tokio::spawn({
            let a_mux = Arc::clone(&a_mux);
            let b_peer = b_peer.clone();
            async move { a_mux.send_request(&b_peer, Body::Ping, Duration::from_millis(500)).await }
        });

        let (data, from) = b_transport.recv().await.expect("a's request should arrive");
        let request = wire::decode(&data).expect("request should decode");

        // A response carrying some other nonce must not complete a's request.
        let wrong = Message::response_to(Nonce::random(), b_peer.clone(), Body::Pong);
        b_transport.send_to(from, wire::encode(&wrong)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!request_handle.is_finished(), "mismatched nonce must not resolve the request");

        // The response actually carrying the request's nonce completes it.
        let right = Message::response_to(request.nonce, b_peer, Body::Pong);
        b_transport.send_to(from, wire::encode(&right)).await.unwrap();

        let result = request_handle.await.unwrap();
        assert_eq!(result.expect("matching nonce should complete the request").body, Body::Pong);
    }
}
