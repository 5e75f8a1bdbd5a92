//! Session events reported to the host.

use crate::core::{ConnectionError, NetworkId, PeerId};

/// Something the host may want to react to, produced during [`tick`].
///
/// [`tick`]: super::NetSession::tick
#[derive(Debug, Clone, PartialEq)]
pub enum NetEvent {
    /// Client reached `Connected`.
    Connected,

    /// Connection ended.
    Disconnected {
        /// Why.
        reason: ConnectionError,
    },

    /// New heartbeat sample.
    LatencyUpdated {
        /// Measured round trip in seconds.
        rtt: f64,
        /// Smoothed one-way latency in seconds.
        latency: f64,
    },

    /// A networked entity was created.
    EntitySpawned {
        /// Entity id.
        network_id: NetworkId,
        /// Factory type name.
        type_name: String,
        /// Owning peer.
        owner_id: PeerId,
    },

    /// A networked entity was removed.
    EntityRemoved {
        /// Entity id.
        network_id: NetworkId,
    },

    /// The authority switched this client to another scene.
    SceneChanged {
        /// New scene.
        scene_id: String,
    },

    /// Full-state catch-up applied.
    ReconciliationComplete {
        /// Entities instantiated from the snapshot.
        entities: usize,
    },

    /// A peer appeared in the session.
    PeerJoined(PeerId),

    /// A peer left the session.
    PeerLeft(PeerId),

    /// A peer went silent past the disconnect timeout.
    PeerTimedOut(PeerId),

    /// A client finished reconciliation and received the baseline.
    ClientSynced(PeerId),

    /// Recovery of a missing entity was given up.
    MissingObjectAbandoned {
        /// Entity id.
        network_id: NetworkId,
        /// Requests sent.
        attempts: u32,
    },
}
