//! Authority-side peer bookkeeping.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::inbound::Inbound;
use crate::core::{NetError, PeerId, Transport};

/// What the authority knows about one client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeerInfo {
    /// When the peer was first seen.
    pub joined_at: f64,
    /// Time of the last message from the peer.
    pub last_contact: f64,
    /// The peer finished reconciliation.
    pub synced: bool,
}

/// Clients known to the authority.
#[derive(Debug, Clone)]
pub struct PeerTable {
    peers: BTreeMap<PeerId, PeerInfo>,
    timeout: f64,
}

impl PeerTable {
    /// Create a table that expires peers silent for `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            peers: BTreeMap::new(),
            timeout: timeout.as_secs_f64(),
        }
    }

    /// Add a peer. Returns `false` if it was already known.
    pub fn join(&mut self, peer: PeerId, now: f64) -> bool {
        if self.peers.contains_key(&peer) {
            return false;
        }
        info!(peer = %peer, "peer joined");
        self.peers.insert(
            peer,
            PeerInfo {
                joined_at: now,
                last_contact: now,
                synced: false,
            },
        );
        true
    }

    /// Record contact, adding the peer if unknown. Returns `true` if added.
    pub fn touch(&mut self, peer: PeerId, now: f64) -> bool {
        match self.peers.get_mut(&peer) {
            Some(info) => {
                info.last_contact = info.last_contact.max(now);
                false
            }
            None => self.join(peer, now),
        }
    }

    /// Remove a peer. Returns `false` if it was unknown.
    pub fn leave(&mut self, peer: PeerId) -> bool {
        let removed = self.peers.remove(&peer).is_some();
        if removed {
            info!(peer = %peer, "peer left");
        }
        removed
    }

    /// Mark a peer as reconciled.
    pub fn mark_synced(&mut self, peer: PeerId) {
        if let Some(info) = self.peers.get_mut(&peer) {
            info.synced = true;
        }
    }

    /// Remove and return peers silent for at least the timeout.
    pub fn expire(&mut self, now: f64) -> Vec<PeerId> {
        let timeout = self.timeout;
        let expired: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|(_, info)| now - info.last_contact >= timeout)
            .map(|(peer, _)| *peer)
            .collect();
        for peer in &expired {
            info!(peer = %peer, "peer timed out");
            self.peers.remove(peer);
        }
        expired
    }

    /// Look up a peer.
    pub fn get(&self, peer: PeerId) -> Option<&PeerInfo> {
        self.peers.get(&peer)
    }

    /// Check if a peer is known.
    pub fn contains(&self, peer: PeerId) -> bool {
        self.peers.contains_key(&peer)
    }

    /// Known peers in id order.
    pub fn peers(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.peers.keys().copied()
    }

    /// Number of known peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Check if no peer is known.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Forget every peer.
    pub fn clear(&mut self) {
        self.peers.clear();
    }
}

/// Diffs the transport's peer directory into join and leave notifications.
pub struct PeerWatcher {
    transport: Arc<dyn Transport>,
    known: BTreeSet<PeerId>,
    tx: mpsc::UnboundedSender<Inbound>,
}

impl PeerWatcher {
    /// Create a watcher feeding the session queue.
    pub fn new(transport: Arc<dyn Transport>, tx: mpsc::UnboundedSender<Inbound>) -> Self {
        Self {
            transport,
            known: BTreeSet::new(),
            tx,
        }
    }

    /// Compare the directory with the last poll and enqueue the changes.
    ///
    /// Returns the number of notifications sent.
    pub fn poll_once(&mut self) -> Result<usize, NetError> {
        let local = self.transport.local_peer_id();
        let current: BTreeSet<PeerId> = self
            .transport
            .current_peers()
            .into_iter()
            .filter(|peer| *peer != local)
            .collect();

        let mut sent = 0;
        for peer in current.difference(&self.known) {
            debug!(peer = %peer, "directory gained peer");
            self.tx.send(Inbound::PeerJoined(*peer)).map_err(|_| NetError::QueueClosed)?;
            sent += 1;
        }
        for peer in self.known.difference(&current) {
            debug!(peer = %peer, "directory lost peer");
            self.tx.send(Inbound::PeerLeft(*peer)).map_err(|_| NetError::QueueClosed)?;
            sent += 1;
        }
        self.known = current;
        Ok(sent)
    }
}
