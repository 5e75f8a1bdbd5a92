//! In-process transport.
//!
//! A [`MemoryNetwork`] is a hub of per-peer datagram queues. Endpoints share
//! the hub, so a server and several clients can run in one process for tests
//! and local play. Loss and reordering are injected with [`MemoryNetwork::retain`]
//! and [`MemoryNetwork::reverse`].

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::trace;

use crate::core::{PeerId, Transport};

type Filter = Box<dyn Fn(PeerId, PeerId, &[u8]) -> bool + Send>;

struct Hub {
    max_datagram: usize,
    queues: BTreeMap<PeerId, VecDeque<(PeerId, Vec<u8>)>>,
    filter: Option<Filter>,
    reverse: bool,
}

/// Shared in-memory datagram network.
#[derive(Clone)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hub = self.lock();
        f.debug_struct("MemoryNetwork")
            .field("max_datagram", &hub.max_datagram)
            .field("peers", &hub.queues.keys().collect::<Vec<_>>())
            .field("reverse", &hub.reverse)
            .finish()
    }
}

impl MemoryNetwork {
    /// Create an empty network accepting datagrams up to `max_datagram` bytes.
    pub fn new(max_datagram: usize) -> Self {
        Self {
            hub: Arc::new(Mutex::new(Hub {
                max_datagram,
                queues: BTreeMap::new(),
                filter: None,
                reverse: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Join the network as `peer`.
    pub fn endpoint(&self, peer: PeerId) -> MemoryTransport {
        self.lock().queues.entry(peer).or_default();
        MemoryTransport {
            peer,
            network: self.clone(),
        }
    }

    /// Remove `peer` and drop its queued datagrams.
    pub fn disconnect(&self, peer: PeerId) {
        self.lock().queues.remove(&peer);
    }

    /// Datagrams queued for `peer`.
    pub fn pending(&self, peer: PeerId) -> usize {
        self.lock().queues.get(&peer).map_or(0, VecDeque::len)
    }

    /// Deliver only datagrams for which `filter(from, to, bytes)` holds.
    pub fn retain<F>(&self, filter: F)
    where
        F: Fn(PeerId, PeerId, &[u8]) -> bool + Send + 'static,
    {
        self.lock().filter = Some(Box::new(filter));
    }

    /// Remove the delivery filter.
    pub fn clear_filter(&self) {
        self.lock().filter = None;
    }

    /// Deliver queued datagrams newest first.
    pub fn reverse(&self, reverse: bool) {
        self.lock().reverse = reverse;
    }
}

/// One peer's handle on a [`MemoryNetwork`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    peer: PeerId,
    network: MemoryNetwork,
}

impl MemoryTransport {
    /// The network this endpoint belongs to.
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

impl Transport for MemoryTransport {
    fn init(&self) -> bool {
        self.network.lock().queues.contains_key(&self.peer)
    }

    fn local_peer_id(&self) -> PeerId {
        self.peer
    }

    fn send(&self, peer: PeerId, bytes: &[u8]) -> bool {
        let mut hub = self.network.lock();
        if bytes.len() > hub.max_datagram {
            return false;
        }
        let delivered = hub.filter.as_ref().is_none_or(|filter| filter(self.peer, peer, bytes));
        if !delivered {
            trace!(from = %self.peer, to = %peer, len = bytes.len(), "dropped by filter");
            return true;
        }
        match hub.queues.get_mut(&peer) {
            Some(queue) => {
                queue.push_back((self.peer, bytes.to_vec()));
                true
            }
            None => false,
        }
    }

    fn try_receive(&self, max_len: usize) -> Option<(PeerId, Vec<u8>)> {
        let mut hub = self.network.lock();
        let reverse = hub.reverse;
        let queue = hub.queues.get_mut(&self.peer)?;
        loop {
            let (from, bytes) = if reverse {
                queue.pop_back()?
            } else {
                queue.pop_front()?
            };
            if bytes.len() <= max_len {
                return Some((from, bytes));
            }
            trace!(from = %from, len = bytes.len(), max_len, "dropping oversized datagram");
        }
    }

    fn current_peers(&self) -> Vec<PeerId> {
        self.network.lock().queues.keys().copied().collect()
    }

    fn max_datagram_size(&self) -> usize {
        self.network.lock().max_datagram
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_and_receive() {
        let network = MemoryNetwork::new(64);
        let a = network.endpoint(PeerId(1));
        let b = network.endpoint(PeerId(2));

        assert!(a.init());
        assert!(a.send(PeerId(2), b"hello"));
        assert_eq!(network.pending(PeerId(2)), 1);
        assert_eq!(b.try_receive(64), Some((PeerId(1), b"hello".to_vec())));
        assert_eq!(b.try_receive(64), None);
    }

    #[test]
    fn test_oversized_send_refused() {
        let network = MemoryNetwork::new(4);
        let a = network.endpoint(PeerId(1));
        network.endpoint(PeerId(2));
        assert!(!a.send(PeerId(2), b"too long"));
    }

    #[test]
    fn test_unknown_peer_refused() {
        let network = MemoryNetwork::new(64);
        let a = network.endpoint(PeerId(1));
        assert!(!a.send(PeerId(9), b"x"));
    }

    #[test]
    fn test_disconnect_removes_peer() {
        let network = MemoryNetwork::new(64);
        let a = network.endpoint(PeerId(1));
        network.endpoint(PeerId(2));
        assert_eq!(a.current_peers(), vec![PeerId(1), PeerId(2)]);

        network.disconnect(PeerId(2));
        assert_eq!(a.current_peers(), vec![PeerId(1)]);
        assert!(!a.send(PeerId(2), b"x"));
    }

    #[test]
    fn test_filter_drops_silently() {
        let network = MemoryNetwork::new(64);
        let a = network.endpoint(PeerId(1));
        let b = network.endpoint(PeerId(2));

        network.retain(|_, _, bytes| bytes != b"drop");
        assert!(a.send(PeerId(2), b"drop"));
        assert!(a.send(PeerId(2), b"keep"));
        assert_eq!(b.try_receive(64), Some((PeerId(1), b"keep".to_vec())));
        assert_eq!(b.try_receive(64), None);
    }

    #[test]
    fn test_oversized_receive_skipped() {
        let network = MemoryNetwork::new(64);
        let a = network.endpoint(PeerId(1));
        let b = network.endpoint(PeerId(2));

        a.send(PeerId(2), b"a long datagram");
        a.send(PeerId(2), b"ok");
        assert_eq!(b.try_receive(4), Some((PeerId(1), b"ok".to_vec())));
        assert_eq!(network.pending(PeerId(2)), 0);
    }

    #[test]
    fn test_reverse_delivery() {
        let network = MemoryNetwork::new(64);
        let a = network.endpoint(PeerId(1));
        let b = network.endpoint(PeerId(2));

        network.reverse(true);
        a.send(PeerId(2), b"1");
        a.send(PeerId(2), b"2");
        assert_eq!(b.try_receive(64).map(|(_, d)| d), Some(b"2".to_vec()));
        assert_eq!(b.try_receive(64).map(|(_, d)| d), Some(b"1".to_vec()));
    }
}
