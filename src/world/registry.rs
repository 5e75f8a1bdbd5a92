//! Entity registry.

use std::collections::BTreeMap;

use tracing::debug;

use super::entity::NetworkObject;
use crate::core::{NetworkId, WorldError};

/// Live networked entities by id.
///
/// Iteration is in id order, which is also spawn order since the authority
/// allocates ids monotonically.
#[derive(Default)]
pub struct EntityRegistry {
    entities: BTreeMap<NetworkId, Box<dyn NetworkObject>>,
}

impl std::fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityRegistry")
            .field("ids", &self.entities.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EntityRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entity under its own id.
    pub fn register(&mut self, entity: Box<dyn NetworkObject>) -> Result<(), WorldError> {
        let id = entity.network_id();
        if self.entities.contains_key(&id) {
            return Err(WorldError::DuplicateId(id));
        }
        debug!(id = %id, type_name = entity.type_name(), "registered entity");
        self.entities.insert(id, entity);
        Ok(())
    }

    /// Remove an entity. Unknown ids are a no-op.
    pub fn unregister(&mut self, id: NetworkId) -> Option<Box<dyn NetworkObject>> {
        let removed = self.entities.remove(&id);
        if removed.is_some() {
            debug!(id = %id, "unregistered entity");
        }
        removed
    }

    /// Look up an entity.
    pub fn lookup(&self, id: NetworkId) -> Option<&dyn NetworkObject> {
        self.entities.get(&id).map(|entity| entity.as_ref())
    }

    /// Look up an entity mutably.
    pub fn lookup_mut(&mut self, id: NetworkId) -> Option<&mut (dyn NetworkObject + 'static)> {
        self.entities.get_mut(&id).map(|entity| entity.as_mut())
    }

    /// Check if `id` is registered.
    pub fn contains(&self, id: NetworkId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Snapshot of the registered ids.
    ///
    /// Iterate over this rather than the registry when entities may be added
    /// or removed along the way.
    pub fn ids(&self) -> Vec<NetworkId> {
        self.entities.keys().copied().collect()
    }

    /// Iterate over entities in id order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn NetworkObject> {
        self.entities.values().map(|entity| entity.as_ref())
    }

    /// Remove every entity, returning them in id order.
    pub fn clear(&mut self) -> Vec<Box<dyn NetworkObject>> {
        std::mem::take(&mut self.entities).into_values().collect()
    }

    /// Number of registered entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PeerId;
    use crate::world::NetEntity;

    fn entity(id: u64) -> Box<dyn NetworkObject> {
        NetEntity::new("Food", PeerId(1), NetworkId(id), ()).boxed()
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = EntityRegistry::new();
        registry.register(entity(7)).unwrap();

        let found = registry.lookup(NetworkId(7)).unwrap();
        assert_eq!(found.type_name(), "Food");
        assert!(registry.lookup(NetworkId(8)).is_none());
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = EntityRegistry::new();
        registry.register(entity(7)).unwrap();
        let err = registry.register(entity(7)).unwrap_err();
        assert_eq!(err, WorldError::DuplicateId(NetworkId(7)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_unknown_is_noop() {
        let mut registry = EntityRegistry::new();
        assert!(registry.unregister(NetworkId(3)).is_none());

        registry.register(entity(3)).unwrap();
        assert!(registry.unregister(NetworkId(3)).is_some());
        assert!(registry.lookup(NetworkId(3)).is_none());
        assert!(registry.unregister(NetworkId(3)).is_none());
    }

    #[test]
    fn test_ids_snapshot_allows_removal() {
        let mut registry = EntityRegistry::new();
        for id in [5, 1, 3] {
            registry.register(entity(id)).unwrap();
        }
        assert_eq!(registry.ids(), vec![NetworkId(1), NetworkId(3), NetworkId(5)]);

        for id in registry.ids() {
            registry.unregister(id);
        }
        assert!(registry.is_empty());
    }
}
