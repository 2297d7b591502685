//! End-to-end node façade scenarios over the in-memory mock transport,
//! covering the store/find and bootstrap flows.

use std::sync::Arc;
use std::time::Duration;

use kad_core::transport::mock::MockNetwork;
use kad_core::{Id, Peer};
use kad_dht::{Node, NodeConfig};

fn config() -> NodeConfig {
    NodeConfig {
        k: 20,
        alpha: 3,
        request_timeout: Duration::from_millis(200),
        refresh_interval: Duration::from_secs(3600),
    }
}

fn peer_at(addr: &str, id: Id) -> Peer {
    let sock: std::net::SocketAddr = addr.parse().unwrap();
    Peer::new(sock.ip().to_string(), sock.port(), id)
}

#[tokio::test]
async fn bootstrap_then_store_and_find_round_trips_across_three_nodes() {
    let network = MockNetwork::new();

    let seed_addr = "127.0.0.1:9301";
    let mid_addr = "127.0.0.1:9302";
    let client_addr = "127.0.0.1:9303";

    let seed_id = Id::random();
    let mid_id = Id::random();
    let client_id = Id::random();

    let seed_peer = peer_at(seed_addr, seed_id);
    let mid_peer = peer_at(mid_addr, mid_id);
    let client_peer = peer_at(client_addr, client_id);

    let seed_transport = network.register(seed_addr.parse().unwrap());
    let mid_transport = network.register(mid_addr.parse().unwrap());
    let client_transport = network.register(client_addr.parse().unwrap());

    let seed_node = Node::new(seed_transport, seed_peer.clone(), config());
    let mid_node = Node::new(mid_transport, mid_peer.clone(), config());
    let client_node = Node::new(client_transport, client_peer.clone(), config());

    seed_node.listen().await;
    mid_node.listen().await;
    client_node.listen().await;

    // mid bootstraps through seed first, so mid's table (and therefore its
    // FIND_NODE answers) include seed by the time client bootstraps through
    // mid alone.
    mid_node.bootstrap(seed_peer).await.expect("mid should bootstrap through seed");
    client_node.bootstrap(mid_peer).await.expect("client should bootstrap through mid");

    let key = Id::random();
    client_node
        .store_value(key, b"hello kademlia".to_vec())
        .await
        .expect("store should succeed");

    let found = client_node.find_value(key).await.expect("value should be discoverable");
    assert_eq!(found, b"hello kademlia".to_vec());
}

#[tokio::test]
async fn find_value_on_unknown_key_with_no_peers_returns_not_found() {
    let network = MockNetwork::new();
    let addr = "127.0.0.1:9311";
    let id = Id::random();
    let peer = peer_at(addr, id);
    let transport = network.register(addr.parse().unwrap());

    let node = Node::new(transport, peer, config());
    node.listen().await;

    let result = node.find_value(Id::random()).await;
    assert!(matches!(result, Err(kad_dht::DhtError::NotFound)));
}

#[tokio::test]
async fn operations_before_listen_report_not_running() {
    let network = MockNetwork::new();
    let addr = "127.0.0.1:9321";
    let peer = peer_at(addr, Id::random());
    let transport = network.register(addr.parse().unwrap());

    let node = Node::new(transport, peer, config());
    let result = node.find_value(Id::random()).await;
    assert!(matches!(result, Err(kad_dht::DhtError::NotRunning)));
}
