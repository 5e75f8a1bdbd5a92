//! Networked entities.
//!
//! An entity is a state value plus the sync components bound to it. The
//! session sees entities only through [`NetworkObject`], so one registry can
//! hold players, food and projectiles of unrelated state types.

use std::any::Any;
use std::time::Duration;

use tracing::trace;

use crate::core::{NetworkId, PeerId};
use crate::sync::{ComponentUpdate, SyncEngine};

/// Identity of a networked entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMeta {
    /// Session-unique id assigned by the authority.
    pub network_id: NetworkId,
    /// Peer that owns the entity.
    pub owner_id: PeerId,
    /// Factory type name.
    pub type_name: String,
}

/// Object-safe view of a networked entity.
pub trait NetworkObject: Send + 'static {
    /// Session-unique id.
    fn network_id(&self) -> NetworkId;

    /// Owning peer.
    fn owner_id(&self) -> PeerId;

    /// Factory type name, sent as `class_name`.
    fn type_name(&self) -> &str;

    /// Advance every component by `dt` and collect the due diffs.
    fn poll_sync(&mut self, dt: Duration) -> Vec<ComponentUpdate>;

    /// Full snapshot of every component.
    fn force_sync(&mut self) -> Vec<ComponentUpdate>;

    /// Current values of every component, leaving change detection alone.
    fn snapshot(&self) -> Vec<ComponentUpdate>;

    /// Give components built without an explicit interval this one.
    fn set_default_sync_interval(&mut self, interval: Duration);

    /// Apply an update to the component with the matching sync type.
    ///
    /// Returns the number of fields applied, or `None` if no component
    /// accepts this sync type.
    fn apply_sync(&mut self, update: &ComponentUpdate) -> Option<usize>;

    /// Downcast support.
    fn as_any(&self) -> &dyn Any;

    /// Mutable downcast support.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Entity with state `S` and its sync components.
#[derive(Debug)]
pub struct NetEntity<S> {
    meta: EntityMeta,
    state: S,
    engines: Vec<SyncEngine<S>>,
}

impl<S: Send + 'static> NetEntity<S> {
    /// Create an entity without components.
    pub fn new(
        type_name: impl Into<String>,
        owner_id: PeerId,
        network_id: NetworkId,
        state: S,
    ) -> Self {
        Self {
            meta: EntityMeta {
                network_id,
                owner_id,
                type_name: type_name.into(),
            },
            state,
            engines: Vec::new(),
        }
    }

    /// Attach a component. Its fields start out as already broadcast.
    pub fn with_engine(mut self, mut engine: SyncEngine<S>) -> Self {
        engine.prime(&self.state);
        self.engines.push(engine);
        self
    }

    /// Identity.
    pub fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    /// Current state.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Mutable state. Changes are picked up at the next sync interval.
    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    /// Attached components.
    pub fn engines(&self) -> &[SyncEngine<S>] {
        &self.engines
    }

    /// Box as a trait object.
    pub fn boxed(self) -> Box<dyn NetworkObject> {
        Box::new(self)
    }
}

impl<S: Send + 'static> NetworkObject for NetEntity<S> {
    fn network_id(&self) -> NetworkId {
        self.meta.network_id
    }

    fn owner_id(&self) -> PeerId {
        self.meta.owner_id
    }

    fn type_name(&self) -> &str {
        &self.meta.type_name
    }

    fn poll_sync(&mut self, dt: Duration) -> Vec<ComponentUpdate> {
        let id = self.meta.network_id;
        let state = &self.state;
        self.engines
            .iter_mut()
            .filter_map(|engine| {
                engine
                    .poll(state, dt)
                    .map(|fields| ComponentUpdate::new(engine.sync_type(), id, fields))
            })
            .collect()
    }

    fn force_sync(&mut self) -> Vec<ComponentUpdate> {
        let id = self.meta.network_id;
        let state = &self.state;
        self.engines
            .iter_mut()
            .filter(|engine| !engine.is_empty())
            .map(|engine| {
                let fields = engine.force_broadcast(state);
                ComponentUpdate::new(engine.sync_type(), id, fields)
            })
            .collect()
    }

    fn snapshot(&self) -> Vec<ComponentUpdate> {
        let id = self.meta.network_id;
        self.engines
            .iter()
            .filter(|engine| !engine.is_empty())
            .map(|engine| {
                ComponentUpdate::new(engine.sync_type(), id, engine.snapshot(&self.state))
            })
            .collect()
    }

    fn set_default_sync_interval(&mut self, interval: Duration) {
        for engine in &mut self.engines {
            engine.inherit_interval(interval);
        }
    }

    fn apply_sync(&mut self, update: &ComponentUpdate) -> Option<usize> {
        let engine = self
            .engines
            .iter_mut()
            .find(|engine| engine.sync_type() == update.sync_type)?;
        let applied = engine.apply(&mut self.state, &update.fields);
        trace!(
            id = %self.meta.network_id,
            sync_type = %update.sync_type,
            applied,
            "applied update"
        );
        Some(applied)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
