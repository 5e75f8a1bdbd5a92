//! Entity factory.

use std::collections::BTreeMap;
use std::fmt;

use super::entity::NetworkObject;
use crate::core::{NetworkId, PeerId, WorldError};

/// Result of an entity constructor.
pub type Constructed = Result<Box<dyn NetworkObject>, WorldError>;

type Constructor = Box<dyn Fn(PeerId, NetworkId) -> Constructed + Send + Sync>;

/// Type name to constructor table, populated at startup.
///
/// Every peer must register the same type names; spawn messages only carry
/// the name.
#[derive(Default)]
pub struct EntityFactory {
    constructors: BTreeMap<String, Constructor>,
}

impl fmt::Debug for EntityFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityFactory")
            .field("types", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EntityFactory {
    /// Create an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor. Replaces any previous one for `type_name`.
    pub fn register<F>(&mut self, type_name: impl Into<String>, constructor: F)
    where
        F: Fn(PeerId, NetworkId) -> Constructed + Send + Sync + 'static,
    {
        self.constructors.insert(type_name.into(), Box::new(constructor));
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<F>(mut self, type_name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(PeerId, NetworkId) -> Constructed + Send + Sync + 'static,
    {
        self.register(type_name, constructor);
        self
    }

    /// Construct an entity of `type_name`.
    pub fn create(&self, type_name: &str, owner: PeerId, id: NetworkId) -> Constructed {
        let constructor = self
            .constructors
            .get(type_name)
            .ok_or_else(|| WorldError::UnknownType(type_name.to_string()))?;
        constructor(owner, id)
    }

    /// Check if `type_name` is registered.
    pub fn contains(&self, type_name: &str) -> bool {
        self.constructors.contains_key(type_name)
    }

    /// Registered type names.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }
}
