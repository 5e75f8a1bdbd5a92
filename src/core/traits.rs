//! Core traits for netweave.
//!
//! The transport contract is the only way the session talks to the network.
//! Peer discovery, lobbies and platform identity live behind it.

use super::ids::PeerId;

/// Opaque datagram transport between peers.
///
/// Implementations must be usable from several threads at once: the receive
/// loop, the heartbeat loop and the simulation tick all hold the same handle.
///
/// # Requirements
///
/// - `send` MUST refuse (return `false`) payloads larger than
///   `max_datagram_size`
/// - `try_receive` MUST NOT block
/// - no ordering or delivery guarantee is assumed
pub trait Transport: Send + Sync {
    /// Prepare the transport. Returns `false` if it cannot be used.
    fn init(&self) -> bool;

    /// Identifier of this endpoint.
    fn local_peer_id(&self) -> PeerId;

    /// Send one datagram. Returns `false` if it was refused.
    fn send(&self, peer: PeerId, bytes: &[u8]) -> bool;

    /// Take one pending datagram of at most `max_len` bytes, if any.
    fn try_receive(&self, max_len: usize) -> Option<(PeerId, Vec<u8>)>;

    /// Peers currently in the session, possibly including this endpoint.
    fn current_peers(&self) -> Vec<PeerId>;

    /// Largest datagram `send` accepts.
    fn max_datagram_size(&self) -> usize;

    /// Drop `peer` from a directory learned from traffic.
    ///
    /// Called once the session stops tracking the peer. Transports whose
    /// directory is managed elsewhere keep the default no-op.
    fn forget_peer(&self, _peer: PeerId) {}
}
