//! Session identifiers.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Authority-assigned identifier of one live networked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkId(pub u64);

impl NetworkId {
    /// Raw value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NetworkId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Opaque identifier of a connected participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub u64);

impl PeerId {
    /// Raw value.
    pub fn get(self) -> u64 {
        self.0
    }

    /// Derive a stable peer id from a socket address.
    ///
    /// IPv4 addresses map to `ip << 16 | port`; IPv6 addresses fold the
    /// octets with FNV-1a before mixing in the port.
    pub fn from_addr(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => {
                let ip = u32::from(*v4.ip()) as u64;
                Self((ip << 16) | v4.port() as u64)
            }
            SocketAddr::V6(v6) => {
                let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
                for byte in v6.ip().octets() {
                    hash ^= byte as u64;
                    hash = hash.wrapping_mul(0x0100_0000_01b3);
                }
                Self((hash << 16) | v6.port() as u64)
            }
        }
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl From<u64> for PeerId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Hands out network ids on the authority.
///
/// Ids start at 1 and strictly increase; an id is never handed out twice.
#[derive(Debug, Clone)]
pub struct NetworkIdAllocator {
    next: u64,
}

impl Default for NetworkIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkIdAllocator {
    /// Create an allocator starting at 1.
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Allocate the next id.
    pub fn allocate(&mut self) -> NetworkId {
        let id = NetworkId(self.next);
        self.next = self.next.saturating_add(1);
        id
    }

    /// The id the next call to `allocate` will return.
    pub fn peek(&self) -> NetworkId {
        NetworkId(self.next)
    }
}
