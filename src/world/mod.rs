//! netweave - World
//!
//! Networked entities and their lifecycle bookkeeping:
//! - [`NetworkObject`] and [`NetEntity`]: state plus sync components
//! - [`EntityRegistry`]: live entities by network id
//! - [`EntityFactory`]: constructs entities from type names on every peer

mod entity;
mod factory;
mod registry;

pub use entity::*;
pub use factory::*;
pub use registry::*;
