//! # netweave
//!
//! Transport and state replication core for server-authoritative multiplayer
//! simulations over small, unreliable datagrams.
//!
//! - **Fragmentation**: large messages (full scene listings) split into
//!   datagram-sized fragments and reassembled in any arrival order
//! - **Heartbeat**: connection lifecycle with smoothed latency estimation
//! - **Entities**: registry and factory for networked objects
//! - **Delta sync**: per-component change detection, diff broadcast and
//!   diff application
//! - **Reconciliation**: full-state catch-up for late joiners and recovery
//!   of entities a client never saw spawned
//!
//! ## Concurrency
//!
//! A [`NetSession`](session::NetSession) is the only writer of replicated
//! state. Background loops started by [`NetDriver`](runtime::NetDriver)
//! only enqueue decoded messages; the host calls
//! [`tick`](session::NetSession::tick) on its simulation thread.
//!
//! ## Feature Flags
//!
//! - `udp` (default): [`UdpTransport`](transport::UdpTransport) over tokio
//!
//! ## Modules
//!
//! - [`core`]: identifiers, clocks, configuration, errors and the transport contract
//! - [`transport`]: wire codec, fragmentation, heartbeat and transport adapters
//! - [`sync`]: sync fields and the delta sync engine
//! - [`world`]: networked entities, registry and factory
//! - [`session`]: the single-writer session and reconciliation
//! - [`runtime`]: tokio background loops
//!
//! ## Example Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use netweave::prelude::*;
//!
//! #[derive(Default)]
//! struct Food {
//!     value: u32,
//! }
//!
//! let factory = EntityFactory::new().with("Food", |owner, id| {
//!     let engine = SyncEngine::builder("food_update")
//!         .bind("value", |f: &Food| f.value, |f: &mut Food, v| f.value = v)
//!         .build()?;
//!     Ok(NetEntity::new("Food", owner, id, Food::default()).with_engine(engine).boxed())
//! });
//!
//! let network = MemoryNetwork::new(1200);
//! let transport: Arc<dyn Transport> = Arc::new(network.endpoint(PeerId(1)));
//! let mut server = NetSession::builder(transport).factory(factory).server()?;
//!
//! let id = server.spawn("Food", PeerId(1))?;
//! if let Some(food) = server.entity_state_mut::<Food>(id) {
//!     food.value = 3;
//! }
//! server.tick()?;
//! # Ok::<(), netweave::NetError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod core;
pub mod runtime;
pub mod session;
pub mod sync;
pub mod transport;
pub mod world;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::{
        Clock, ManualClock, NetConfig, NetError, NetworkId, PeerId, SystemClock, Transport,
    };

    pub use crate::runtime::NetDriver;
    pub use crate::session::{NetEvent, NetSession, Role};
    pub use crate::sync::{ComponentUpdate, FieldMap, SyncEngine, SyncField};
    pub use crate::transport::{ConnectionPhase, MemoryNetwork, Message};
    pub use crate::world::{EntityFactory, NetEntity, NetworkObject};

    #[cfg(feature = "udp")]
    pub use crate::transport::UdpTransport;
}

// Re-export commonly used items at crate root
pub use crate::core::{NetConfig, NetError, NetworkId, PeerId, Transport};
pub use crate::session::{NetEvent, NetSession};
