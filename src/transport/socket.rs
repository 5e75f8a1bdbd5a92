//! UDP transport.
//!
//! The socket is bound through tokio and then driven in non-blocking mode,
//! so the synchronous [`Transport`] calls never wait on reactor readiness.
//! Peers are identified by their socket address folded into a [`PeerId`].
//! The directory is learned from inbound datagrams and from
//! [`UdpTransport::add_peer`]; there is no discovery protocol.

use std::collections::BTreeMap;
use std::io;
use std::net::{SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

use crate::core::constants::DEFAULT_MAX_DATAGRAM_SIZE;
use crate::core::{PeerId, Transport};

/// Datagram transport on a bound UDP socket.
#[derive(Debug, Clone)]
pub struct UdpTransport {
    socket: Arc<StdUdpSocket>,
    local: PeerId,
    local_addr: SocketAddr,
    peers: Arc<Mutex<BTreeMap<PeerId, SocketAddr>>>,
    max_datagram: usize,
}

impl UdpTransport {
    /// Bind a socket at `addr`.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Self::from_socket(socket)
    }

    /// Wrap an already bound tokio socket.
    ///
    /// The socket leaves the tokio reactor; sends and receives are plain
    /// non-blocking calls from then on.
    pub fn from_socket(socket: UdpSocket) -> io::Result<Self> {
        Self::from_std(socket.into_std()?)
    }

    /// Wrap an already bound std socket. Switches it to non-blocking mode.
    pub fn from_std(socket: StdUdpSocket) -> io::Result<Self> {
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;
        Ok(Self {
            socket: Arc::new(socket),
            local: PeerId::from_addr(local_addr),
            local_addr,
            peers: Arc::new(Mutex::new(BTreeMap::new())),
            max_datagram: DEFAULT_MAX_DATAGRAM_SIZE,
        })
    }

    /// Set the largest datagram `send` accepts.
    pub fn with_max_datagram(mut self, max_datagram: usize) -> Self {
        self.max_datagram = max_datagram;
        self
    }

    /// Local socket address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn directory(&self) -> MutexGuard<'_, BTreeMap<PeerId, SocketAddr>> {
        self.peers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a remote endpoint, e.g. the server a client dials.
    pub fn add_peer(&self, addr: SocketAddr) -> PeerId {
        let peer = PeerId::from_addr(addr);
        self.directory().insert(peer, addr);
        peer
    }

    /// Forget a remote endpoint.
    pub fn remove_peer(&self, peer: PeerId) -> bool {
        self.directory().remove(&peer).is_some()
    }

    /// Address of a known peer.
    pub fn peer_addr(&self, peer: PeerId) -> Option<SocketAddr> {
        self.directory().get(&peer).copied()
    }
}

impl Transport for UdpTransport {
    fn init(&self) -> bool {
        self.socket.local_addr().is_ok()
    }

    fn local_peer_id(&self) -> PeerId {
        self.local
    }

    fn send(&self, peer: PeerId, bytes: &[u8]) -> bool {
        if bytes.len() > self.max_datagram {
            return false;
        }
        let Some(addr) = self.peer_addr(peer) else {
            debug!(peer = %peer, "send to unknown peer");
            return false;
        };
        match self.socket.send_to(bytes, addr) {
            Ok(sent) => sent == bytes.len(),
            Err(e) => {
                warn!(peer = %peer, error = %e, "udp send failed");
                false
            }
        }
    }

    fn try_receive(&self, max_len: usize) -> Option<(PeerId, Vec<u8>)> {
        let mut buf = vec![0u8; max_len];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, addr)) => {
                    buf.truncate(len);
                    let peer = PeerId::from_addr(addr);
                    self.directory().entry(peer).or_insert(addr);
                    return Some((peer, buf));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return None,
                // ICMP port unreachable from an earlier send surfaces here
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => {
                    trace!("skipping connection reset");
                }
                Err(e) => {
                    debug!(error = %e, "udp receive failed");
                    return None;
                }
            }
        }
    }

    fn current_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.directory().keys().copied().collect();
        peers.push(self.local);
        peers.sort();
        peers.dedup();
        peers
    }

    fn max_datagram_size(&self) -> usize {
        self.max_datagram
    }

    fn forget_peer(&self, peer: PeerId) {
        if self.remove_peer(peer) {
            debug!(peer = %peer, "peer dropped from directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn localhost() -> UdpTransport {
        UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap()
    }

    async fn receive(transport: &UdpTransport) -> (PeerId, Vec<u8>) {
        for _ in 0..200 {
            if let Some(received) = transport.try_receive(1500) {
                return received;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no datagram received");
    }

    #[tokio::test]
    async fn test_first_send_after_bind() {
        let server = localhost().await;
        let client = localhost().await;
        let server_id = client.add_peer(server.local_addr());

        // No yield to the runtime between bind and send
        assert!(client.send(server_id, b"hello"));
        assert!(client.send(server_id, b"again"));

        assert_eq!(receive(&server).await.1, b"hello");
        assert_eq!(receive(&server).await.1, b"again");
    }

    #[test]
    fn test_from_std_outside_runtime() {
        let socket = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        let transport = UdpTransport::from_std(socket).unwrap();
        assert!(transport.init());
        assert!(transport.try_receive(1500).is_none());
    }

    #[tokio::test]
    async fn test_roundtrip_learns_peer() {
        let server = localhost().await;
        let client = localhost().await;
        assert!(server.init());

        let server_id = client.add_peer(server.local_addr());
        assert_eq!(server_id, server.local_peer_id());
        assert!(client.send(server_id, b"ping"));

        let (from, bytes) = receive(&server).await;
        assert_eq!(from, client.local_peer_id());
        assert_eq!(bytes, b"ping");
        assert!(server.current_peers().contains(&from));

        assert!(server.send(from, b"pong"));
        let (from, bytes) = receive(&client).await;
        assert_eq!(from, server_id);
        assert_eq!(bytes, b"pong");
    }

    #[tokio::test]
    async fn test_send_refusals() {
        let transport = localhost().await.with_max_datagram(8);
        let other = localhost().await;

        assert!(!transport.send(other.local_peer_id(), b"x"));
        let peer = transport.add_peer(other.local_addr());
        assert!(!transport.send(peer, b"more than eight"));
        assert!(transport.send(peer, b"short"));

        assert!(transport.remove_peer(peer));
        assert!(!transport.send(peer, b"short"));
    }

    #[tokio::test]
    async fn test_forget_peer_prunes_directory() {
        let server = localhost().await;
        let client = localhost().await;
        let server_id = client.add_peer(server.local_addr());
        assert!(client.send(server_id, b"hi"));

        let (from, _) = receive(&server).await;
        assert!(server.current_peers().contains(&from));

        server.forget_peer(from);
        assert!(!server.current_peers().contains(&from));
        assert!(!server.send(from, b"late"));
    }

    #[tokio::test]
    async fn test_empty_receive() {
        let transport = localhost().await;
        assert!(transport.try_receive(1500).is_none());
        assert_eq!(transport.current_peers(), vec![transport.local_peer_id()]);
    }
}
