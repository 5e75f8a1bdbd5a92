//! Sync engine
//!
//! Delta-state synchronization for one component of an entity.
//! Generic over the state type `S` the component's fields are bound to.
//!
//! The authority calls [`SyncEngine::poll`] every tick; once per sync interval
//! it compares each field with the value last broadcast and emits only the
//! fields that changed. [`SyncEngine::force_broadcast`] skips the comparison and
//! emits every field, giving late joiners an authoritative baseline.

use std::collections::HashSet;
use std::time::Duration;

use tracing::warn;

use super::field::SyncField;
use super::update::FieldMap;
use crate::core::constants::{DEFAULT_SYNC_INTERVAL, RESERVED_FIELD_NAMES, UPDATE_KIND_SUFFIX};
use crate::core::SyncError;

/// Per-component delta synchronization.
#[derive(Debug)]
pub struct SyncEngine<S> {
    /// Message kind, e.g. `transform_update`.
    sync_type: String,

    /// Minimum time between change checks.
    interval: Duration,

    /// Interval was declared on the builder or set by the host.
    explicit_interval: bool,

    /// Time accumulated since the last check.
    elapsed: Duration,

    /// Declared fields, in declaration order.
    fields: Vec<SyncField<S>>,
}

impl<S: 'static> SyncEngine<S> {
    /// Start declaring a component.
    pub fn builder(sync_type: impl Into<String>) -> SyncEngineBuilder<S> {
        SyncEngineBuilder {
            sync_type: sync_type.into(),
            interval: None,
            fields: Vec::new(),
        }
    }
}

impl<S> SyncEngine<S> {
    /// Message kind this component sends and accepts.
    pub fn sync_type(&self) -> &str {
        &self.sync_type
    }

    /// Sync interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Change the sync interval.
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
        self.explicit_interval = true;
    }

    /// Use `interval` unless one was declared explicitly.
    pub fn inherit_interval(&mut self, interval: Duration) {
        if !self.explicit_interval {
            self.interval = interval;
        }
    }

    /// Declared field names, in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name())
    }

    /// Number of declared fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if no field is declared.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Record the current values as already broadcast.
    ///
    /// Called when the component is attached so construction values are not
    /// sent as changes.
    pub fn prime(&mut self, state: &S) {
        for field in &mut self.fields {
            let value = field.current(state);
            field.mark_sent(value);
        }
    }

    /// Advance the interval timer and, when due, compute the diff.
    ///
    /// Returns `None` when the interval has not elapsed or nothing changed.
    pub fn poll(&mut self, state: &S, dt: Duration) -> Option<FieldMap> {
        self.elapsed += dt;
        if self.elapsed < self.interval {
            return None;
        }
        self.elapsed = Duration::ZERO;

        let diff = self.diff(state);
        if diff.is_empty() { None } else { Some(diff) }
    }

    /// Compute the fields whose value differs from the last broadcast and
    /// mark them as sent.
    pub fn diff(&mut self, state: &S) -> FieldMap {
        let mut diff = FieldMap::new();
        for field in &mut self.fields {
            if let Some(value) = field.changed(state) {
                field.mark_sent(value.clone());
                diff.insert(field.name().to_string(), value);
            }
        }
        diff
    }

    /// Emit every declared field regardless of change state.
    pub fn force_broadcast(&mut self, state: &S) -> FieldMap {
        let mut all = FieldMap::new();
        for field in &mut self.fields {
            let value = field.current(state);
            field.mark_sent(value.clone());
            all.insert(field.name().to_string(), value);
        }
        self.elapsed = Duration::ZERO;
        all
    }

    /// Current value of every field, without touching change state.
    pub fn snapshot(&self, state: &S) -> FieldMap {
        self.fields
            .iter()
            .map(|field| (field.name().to_string(), field.current(state)))
            .collect()
    }

    /// Apply received values.
    ///
    /// Fields absent from `values` are left untouched; keys that are not
    /// declared fields are ignored. A value of the wrong type is skipped
    /// without affecting the other fields. Returns the number applied.
    pub fn apply(&mut self, state: &mut S, values: &FieldMap) -> usize {
        let mut applied = 0;
        for field in &mut self.fields {
            let Some(value) = values.get(field.name()) else {
                continue;
            };
            match field.apply(state, value) {
                Ok(()) => applied += 1,
                Err(e) => {
                    warn!(sync_type = %self.sync_type, error = %e, "rejected sync value");
                }
            }
        }
        applied
    }
}

/// Builder for [`SyncEngine`].
pub struct SyncEngineBuilder<S> {
    sync_type: String,
    interval: Option<Duration>,
    fields: Vec<SyncField<S>>,
}

impl<S: 'static> SyncEngineBuilder<S> {
    /// Set the sync interval.
    ///
    /// Without one the engine runs at `DEFAULT_SYNC_INTERVAL` until the
    /// session applies its configured default.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Declare a field.
    pub fn field(mut self, field: SyncField<S>) -> Self {
        self.fields.push(field);
        self
    }

    /// Declare a typed field from accessor functions.
    pub fn bind<T>(self, name: impl Into<String>, get: fn(&S) -> T, set: fn(&mut S, T)) -> Self
    where
        T: serde::Serialize + serde::de::DeserializeOwned + 'static,
    {
        self.field(SyncField::new(name, get, set))
    }

    /// Validate the declaration and build the engine.
    pub fn build(self) -> Result<SyncEngine<S>, SyncError> {
        if !self.sync_type.ends_with(UPDATE_KIND_SUFFIX)
            || self.sync_type.len() == UPDATE_KIND_SUFFIX.len()
        {
            return Err(SyncError::InvalidSyncType(self.sync_type));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if RESERVED_FIELD_NAMES.contains(&field.name()) {
                return Err(SyncError::ReservedFieldName(field.name().to_string()));
            }
            if !seen.insert(field.name()) {
                return Err(SyncError::DuplicateField(field.name().to_string()));
            }
        }

        Ok(SyncEngine {
            sync_type: self.sync_type,
            interval: self.interval.unwrap_or(DEFAULT_SYNC_INTERVAL),
            explicit_interval: self.interval.is_some(),
            elapsed: Duration::ZERO,
            fields: self.fields,
        })
    }
}
