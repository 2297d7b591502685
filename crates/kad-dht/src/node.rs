//! The node façade: wires the routing table, multiplexer, and lookup
//! engine into the four operations a caller actually needs — `listen`,
//! `bootstrap`, `store_value`, `find_value` — and owns the periodic
//! bucket-refresh background task.

use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use kad_core::{Body, Id, Peer, Transport};

use crate::config::NodeConfig;
use crate::error::{DhtError, Result};
use crate::lookup::{LookupEngine, LookupMode, LookupOutcome};
use crate::multiplexer::Multiplexer;
use crate::routing::RoutingTable;
use std::sync::Mutex;

pub struct Node<T: Transport> {
    mux: Arc<Multiplexer<T>>,
    table: Arc<Mutex<RoutingTable>>,
    engine: LookupEngine<T>,
    config: NodeConfig,
    running: AsyncMutex<bool>,
}

impl<T: Transport + Send + Sync + 'static> Node<T> {
    /// Builds a node around an already-bound transport. `local` must carry
    /// the address the transport is reachable at and the id generated for
    /// this process.
    pub fn new(transport: T, local: Peer, config: NodeConfig) -> Arc<Self> {
        let table = Arc::new(Mutex::new(RoutingTable::new(local.id, config.k)));
        let mux = Multiplexer::new(Arc::new(transport), local, config.k, table.clone());
        let engine = LookupEngine::new(
            Arc::clone(&mux),
            table.clone(),
            config.k,
            config.alpha,
            config.request_timeout,
        );
        Arc::new(Node {
            mux,
            table,
            engine,
            config,
            running: AsyncMutex::new(false),
        })
    }

    pub fn local(&self) -> &Peer {
        self.mux.local()
    }

    /// Starts the receive loop and the periodic bucket-refresh task.
    /// Idempotent: calling it twice on the same node is a no-op.
    pub async fn listen(self: &Arc<Self>) {
        let mut running = self.running.lock().await;
        if *running {
            return;
        }
        *running = true;

        tokio::spawn(Arc::clone(&self.mux).run());

        let this = Arc::clone(self);
        tokio::spawn(async move { this.refresh_loop().await });

        info!(local = %self.local().id, addr = %self.local().socket_addr(), "node listening");
    }

    /// Joins the network through `bootstrap_peer` in three steps: PING it
    /// (a timeout here is a bootstrap failure, not a retryable error), run a
    /// full node-lookup of our own id to converge the table around our
    /// position, then sweep every bucket from the first occupied one out to
    /// the far edge of the id space with a refresh lookup, so buckets the
    /// self-lookup never touches aren't left empty.
    pub async fn bootstrap(&self, bootstrap_peer: Peer) -> Result<()> {
        if !*self.running.lock().await {
            return Err(DhtError::NotRunning);
        }

        self.mux
            .send_request(&bootstrap_peer, Body::Ping, self.config.request_timeout)
            .await
            .map_err(|_| DhtError::BootstrapFailed)?;

        let local_id = self.local().id;
        self.engine.run(local_id, LookupMode::Node).await;

        let start = self.table.lock().unwrap().first_occupied_bucket().unwrap_or(0);
        let bucket_count = self.table.lock().unwrap().bucket_count();
        for bucket in start..bucket_count {
            let target = self.local().id.random_in_bucket(bucket);
            self.engine.run(target, LookupMode::Node).await;
        }

        Ok(())
    }

    /// Stores `value` at the k nodes closest to `key`, per the paper's
    /// store-at-lookup-result strategy.
    pub async fn store_value(&self, key: Id, value: Vec<u8>) -> Result<()> {
        if !*self.running.lock().await {
            return Err(DhtError::NotRunning);
        }

        if key == self.local().id {
            self.mux.storage().lock().unwrap().put(key, value);
            return Ok(());
        }

        let holders = match self.engine.run(key, LookupMode::Node).await {
            LookupOutcome::Nodes(peers) => peers,
            LookupOutcome::Value(_) => unreachable!("node-mode lookup never returns a value"),
        };

        if holders.is_empty() {
            self.mux.storage().lock().unwrap().put(key, value);
            return Ok(());
        }

        for peer in holders {
            let result = self
                .mux
                .send_request(
                    &peer,
                    Body::Store { key, value: value.clone() },
                    self.config.request_timeout,
                )
                .await;
            if let Err(error) = result {
                warn!(%error, peer = %peer.id, "store rpc failed, continuing with remaining holders");
            }
        }
        Ok(())
    }

    /// Checks the local store first, then runs a value-mode lookup across
    /// the network.
    pub async fn find_value(&self, key: Id) -> Result<Vec<u8>> {
        if !*self.running.lock().await {
            return Err(DhtError::NotRunning);
        }

        if let Some(value) = self.mux.storage().lock().unwrap().get(&key).cloned() {
            return Ok(value);
        }

        match self.engine.run(key, LookupMode::Value).await {
            LookupOutcome::Value(value) => Ok(value),
            LookupOutcome::Nodes(_) => Err(DhtError::NotFound),
        }
    }

    /// Every `refresh_interval`, looks up a random id in each bucket that
    /// hasn't seen activity in over `refresh_interval`.
    async fn refresh_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.refresh_interval);
        ticker.tick().await; // first tick fires immediately; skip it.
        loop {
            ticker.tick().await;
            let stale = self.table.lock().unwrap().stale_buckets(self.config.refresh_interval);
            for bucket in stale {
                let target = self.local().id.random_in_bucket(bucket);
                self.engine.run(target, LookupMode::Node).await;
            }
        }
    }
}
