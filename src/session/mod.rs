//! netweave - Session Layer
//!
//! Implements:
//! - The single-writer session driving connection, entities and sync
//! - The inbound queue fed by background loops
//! - Scene reconciliation and missing-object recovery
//! - Authority-side peer bookkeeping

mod event;
mod inbound;
mod peers;
mod reconcile;
#[allow(clippy::module_inception)]
mod session;

pub use event::*;
pub use inbound::*;
pub use peers::*;
pub use reconcile::*;
pub use session::*;
