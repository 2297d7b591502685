//! The iterative lookup engine: an alpha-bounded parallel walk toward the
//! nodes closest to a target, terminating once a round adds no new,
//! unqueried candidates (or, in value mode, as soon as a peer answers
//! FOUND_VALUE). Seeded from `closest_to(target, …)` rather than the
//! node's own neighbors, for faster convergence on a distant target.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use kad_core::{Body, Id, Peer, Transport};

use crate::multiplexer::Multiplexer;
use crate::routing::RoutingTable;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LookupMode {
    Node,
    Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    /// The k closest peers known after convergence (node-mode result, or
    /// a value-mode lookup that never found the value).
    Nodes(Vec<Peer>),
    Value(Vec<u8>),
}

pub struct LookupEngine<T: Transport> {
    mux: Arc<Multiplexer<T>>,
    table: Arc<Mutex<RoutingTable>>,
    local_id: Id,
    k: usize,
    alpha: usize,
    request_timeout: Duration,
}

impl<T: Transport + Send + Sync + 'static> LookupEngine<T> {
    pub fn new(
        mux: Arc<Multiplexer<T>>,
        table: Arc<Mutex<RoutingTable>>,
        k: usize,
        alpha: usize,
        request_timeout: Duration,
    ) -> Self {
        let local_id = table.lock().unwrap().local_id();
        LookupEngine {
            mux,
            table,
            local_id,
            k,
            alpha,
            request_timeout,
        }
    }

    /// Drives the parallel search. Returns
    /// `LookupOutcome::Value` as soon as any queried peer responds
    /// `FOUND_VALUE` (only reachable in [`LookupMode::Value`]); otherwise
    /// returns the converged k-closest shortlist.
    pub async fn run(&self, target: Id, mode: LookupMode) -> LookupOutcome {
        let mut shortlist = self.table.lock().unwrap().closest_to(&target, self.k);
        let mut queried: HashSet<Id> = HashSet::new();

        loop {
            let to_query: Vec<Peer> = shortlist
                .iter()
                .filter(|p| !queried.contains(&p.id))
                .take(self.alpha)
                .cloned()
                .collect();

            if to_query.is_empty() {
                debug!(target = %target, shortlist_len = shortlist.len(), "lookup converged");
                return LookupOutcome::Nodes(shortlist);
            }

            for peer in &to_query {
                queried.insert(peer.id);
            }

            let mut round = tokio::task::JoinSet::new();
            for peer in to_query {
                let mux = Arc::clone(&self.mux);
                let timeout = self.request_timeout;
                let body = match mode {
                    LookupMode::Node => Body::FindNode { key: target },
                    LookupMode::Value => Body::FindValue { key: target },
                };
                round.spawn(async move {
                    let result = mux.send_request(&peer, body, timeout).await;
                    (peer, result)
                });
            }

            while let Some(joined) = round.join_next().await {
                let (peer, result) = match joined {
                    Ok(pair) => pair,
                    Err(_) => continue,
                };

                match result {
                    Ok(message) => match message.body {
                        Body::FoundValue { value, .. } if mode == LookupMode::Value => {
                            round.abort_all();
                            return LookupOutcome::Value(value);
                        }
                        Body::FindNodeResponse { neighbors } => {
                            for neighbor in neighbors {
                                if neighbor.id != self.local_id
                                    && !shortlist.iter().any(|p| p.id == neighbor.id)
                                {
                                    shortlist.push(neighbor);
                                }
                            }
                        }
                        _ => debug!(peer = %peer.id, "unexpected response shape during lookup"),
                    },
                    Err(_) => {
                        // Timed out or failed: drop from the shortlist for
                        // the remainder of this invocation.
                        self.table.lock().unwrap().note_unreachable(&peer.id);
                        shortlist.retain(|p| p.id != peer.id);
                    }
                }
            }

            shortlist.sort_by_key(|p| p.id.distance(&target));
            shortlist.truncate(self.k);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::RoutingTable;
    use kad_core::transport::mock::MockNetwork;
    use std::net::SocketAddr;

    fn peer_at(addr: &str, id: Id) -> Peer {
        let sock: SocketAddr = addr.parse().unwrap();
        Peer::new(sock.ip().to_string(), sock.port(), id)
    }

    /// A four-node chain A -> H1 -> H2 -> F: looking up F's id from A
    /// should converge on F (and pick up H2 along the way) even though A
    /// starts out only knowing H1.
    #[tokio::test]
    async fn node_lookup_discovers_a_chain_of_peers() {
        let network = MockNetwork::new();

        let a_id = Id::random();
        let h1_id = Id::random();
        let h2_id = Id::random();
        let f_id = Id::random();

        let a_addr = "127.0.0.1:9201";
        let h1_addr = "127.0.0.1:9202";
        let h2_addr = "127.0.0.1:9203";
        let f_addr = "127.0.0.1:9204";

        let a_peer = peer_at(a_addr, a_id);
        let h1_peer = peer_at(h1_addr, h1_id);
        let h2_peer = peer_at(h2_addr, h2_id);
        let f_peer = peer_at(f_addr, f_id);

        let a_transport = Arc::new(network.register(a_addr.parse().unwrap()));
        let h1_transport = Arc::new(network.register(h1_addr.parse().unwrap()));
        let h2_transport = Arc::new(network.register(h2_addr.parse().unwrap()));
        let f_transport = Arc::new(network.register(f_addr.parse().unwrap()));

        let a_table = Arc::new(Mutex::new(RoutingTable::new(a_id, 20)));
        a_table.lock().unwrap().observe(h1_peer.clone());

        let h1_table = Arc::new(Mutex::new(RoutingTable::new(h1_id, 20)));
        h1_table.lock().unwrap().observe(h2_peer.clone());

        let h2_table = Arc::new(Mutex::new(RoutingTable::new(h2_id, 20)));
        h2_table.lock().unwrap().observe(f_peer.clone());

        let f_table = Arc::new(Mutex::new(RoutingTable::new(f_id, 20)));

        let a_mux = Multiplexer::new(a_transport, a_peer, 20, a_table.clone());
        let h1_mux = Multiplexer::new(h1_transport, h1_peer, 20, h1_table);
        let h2_mux = Multiplexer::new(h2_transport, h2_peer, 20, h2_table);
        let f_mux = Multiplexer::new(f_transport, f_peer, 20, f_table);

        // A's own mux must run too, so the responses its lookup requests are
        // waiting on actually get received rather than timing out.
        tokio::spawn(Arc::clone(&a_mux).run());
        tokio::spawn(Arc::clone(&h1_mux).run());
        tokio::spawn(Arc::clone(&h2_mux).run());
        tokio::spawn(Arc::clone(&f_mux).run());

        let engine = LookupEngine::new(a_mux, a_table.clone(), 20, 3, Duration::from_secs(1));
        let outcome = engine.run(f_id, LookupMode::Node).await;

        match outcome {
            LookupOutcome::Nodes(peers) => {
                assert!(peers.iter().any(|p| p.id == f_id), "F should be discovered");
            }
            LookupOutcome::Value(_) => panic!("node lookup must not return a value"),
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(a_table.lock().unwrap().contains(&h2_id), "A should learn about H2 along the way");
    }
}
