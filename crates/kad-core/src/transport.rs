//! Datagram transport abstraction.
//!
//! Binding a socket and sending/receiving opaque payloads to `(ip, port)`
//! is kept behind a trait rather than hard-wired to `tokio::net::UdpSocket`,
//! so the RPC layer above it can run against an in-memory network in tests.

use std::net::SocketAddr;

use crate::error::{Error, Result};

/// A bound datagram endpoint.
///
/// Implementations need not guarantee delivery, ordering, or deduplication
/// — the RPC multiplexer above this trait tolerates all three.
#[allow(async_fn_in_trait)]
pub trait Transport: Send + Sync {
    /// Send one complete datagram to `addr`.
    async fn send_to(&self, addr: SocketAddr, data: Vec<u8>) -> Result<()>;

    /// Receive the next datagram and the address it arrived from.
    async fn recv(&self) -> Result<(Vec<u8>, SocketAddr)>;

    /// The local address this transport is bound to.
    fn local_addr(&self) -> SocketAddr;
}

/// A real UDP socket, via `tokio::net::UdpSocket`.
pub struct UdpTransport {
    socket: tokio::net::UdpSocket,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = tokio::net::UdpSocket::bind(addr).await?;
        Ok(UdpTransport { socket })
    }
}

impl Transport for UdpTransport {
    async fn send_to(&self, addr: SocketAddr, data: Vec<u8>) -> Result<()> {
        self.socket.send_to(&data, addr).await?;
        Ok(())
    }

    async fn recv(&self) -> Result<(Vec<u8>, SocketAddr)> {
        // MTU is the caller's concern; 64 KiB comfortably covers any UDP
        // datagram that could have arrived intact.
        let mut buf = vec![0u8; 65_536];
        let (len, addr) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(len);
        Ok((buf, addr))
    }

    fn local_addr(&self) -> SocketAddr {
        self.socket
            .local_addr()
            .expect("a bound socket always has a local address")
    }
}

/// An in-memory transport for tests: several [`mock::MockTransport`]s
/// sharing one [`mock::MockNetwork`] can exchange frames exactly like real
/// sockets, without binding to the loopback interface.
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::sync::{mpsc, Mutex as AsyncMutex};

    type Inbox = mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>;

    /// The shared "wire" that registered [`MockTransport`]s send datagrams
    /// across. Cloning it is cheap; all clones refer to the same network.
    #[derive(Clone, Default)]
    pub struct MockNetwork(Arc<Mutex<HashMap<SocketAddr, Inbox>>>);

    impl MockNetwork {
        pub fn new() -> Self {
            Self::default()
        }

        /// Registers a new endpoint at `addr` and returns a transport for
        /// it. Panics if `addr` is already registered.
        pub fn register(&self, addr: SocketAddr) -> MockTransport {
            let (tx, rx) = mpsc::unbounded_channel();
            let mut endpoints = self.0.lock().unwrap();
            assert!(
                endpoints.insert(addr, tx).is_none(),
                "address {addr} already registered on this mock network"
            );
            drop(endpoints);
            MockTransport {
                local: addr,
                network: self.clone(),
                inbound: AsyncMutex::new(rx),
            }
        }
    }

    pub struct MockTransport {
        local: SocketAddr,
        network: MockNetwork,
        inbound: AsyncMutex<mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>>,
    }

    impl Transport for MockTransport {
        async fn send_to(&self, addr: SocketAddr, data: Vec<u8>) -> Result<()> {
            let endpoint = self.network.0.lock().unwrap().get(&addr).cloned();
            match endpoint {
                Some(tx) => {
                    // A disconnected receiver models an unreachable peer:
                    // best-effort UDP semantics, so this is not an error.
                    let _ = tx.send((data, self.local));
                    Ok(())
                }
                None => Ok(()),
            }
        }

        async fn recv(&self) -> Result<(Vec<u8>, SocketAddr)> {
            let mut rx = self.inbound.lock().await;
            rx.recv().await.ok_or(Error::NotConnected)
        }

        fn local_addr(&self) -> SocketAddr {
            self.local
        }
    }

}
