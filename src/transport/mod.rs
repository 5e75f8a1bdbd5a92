//! netweave - Transport Layer
//!
//! Everything between the raw datagram contract and the session:
//!
//! - **Wire codec**: [`Message`], a closed union decoded from JSON objects
//! - **Fragmentation**: [`Fragmenter`] and [`Reassembler`] for messages larger
//!   than one datagram
//! - **Heartbeat**: [`ConnectionManager`] with [`LatencyEstimator`]
//! - **Adapters**: [`MemoryNetwork`] in process, [`UdpTransport`] over tokio
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Session / Sync Layer             │
//! ├─────────────────────────────────────────┤
//! │         Transport Layer                 │  ← This module
//! │   codec, fragments, heartbeat           │
//! ├─────────────────────────────────────────┤
//! │   Transport contract (memory, UDP, …)   │
//! └─────────────────────────────────────────┘
//! ```

mod connection;
mod fragment;
mod memory;
mod message;
#[cfg(feature = "udp")]
mod socket;
mod timing;

pub use connection::*;
pub use fragment::*;
pub use memory::*;
pub use message::*;
#[cfg(feature = "udp")]
pub use socket::*;
pub use timing::*;
