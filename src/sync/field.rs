//! Sync fields
//!
//! A sync field binds one named scalar of an entity's state `S` to a getter
//! and a setter. Fields are declared explicitly when the component is built,
//! so they are discoverable without reflection.

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::ApplyError;

type Getter<S> = Box<dyn Fn(&S) -> Value + Send + Sync>;
type Setter<S> = Box<dyn Fn(&mut S, &Value) -> Result<(), ApplyError> + Send + Sync>;

/// (name, getter, setter, last broadcast value) for one piece of state.
pub struct SyncField<S> {
    name: String,
    get: Getter<S>,
    set: Setter<S>,
    last_broadcast: Option<Value>,
}

impl<S: 'static> SyncField<S> {
    /// Bind a typed field.
    ///
    /// Values are converted through serde; a received value that does not
    /// deserialize into `T` is rejected with [`ApplyError::InvalidValue`].
    pub fn new<T>(name: impl Into<String>, get: fn(&S) -> T, set: fn(&mut S, T)) -> Self
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        let name = name.into();
        let field = name.clone();
        Self {
            name,
            get: Box::new(move |state| serde_json::to_value(get(state)).unwrap_or(Value::Null)),
            set: Box::new(move |state, value| {
                let typed = T::deserialize(value).map_err(|e| ApplyError::InvalidValue {
                    field: field.clone(),
                    reason: e.to_string(),
                })?;
                set(state, typed);
                Ok(())
            }),
            last_broadcast: None,
        }
    }

    /// Bind a field with raw JSON accessors.
    pub fn raw<G, W>(name: impl Into<String>, get: G, set: W) -> Self
    where
        G: Fn(&S) -> Value + Send + Sync + 'static,
        W: Fn(&mut S, &Value) -> Result<(), ApplyError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            get: Box::new(get),
            set: Box::new(set),
            last_broadcast: None,
        }
    }
}

impl<S> SyncField<S> {
    /// Field name as used on the wire.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read the current value from the state.
    pub fn current(&self, state: &S) -> Value {
        (self.get)(state)
    }

    /// Value last confirmed sent (or received).
    pub fn last_broadcast(&self) -> Option<&Value> {
        self.last_broadcast.as_ref()
    }

    /// Return the current value if it differs from the last broadcast.
    pub fn changed(&self, state: &S) -> Option<Value> {
        let current = self.current(state);
        match &self.last_broadcast {
            Some(last) if *last == current => None,
            _ => Some(current),
        }
    }

    /// Record `value` as the last broadcast value.
    pub fn mark_sent(&mut self, value: Value) {
        self.last_broadcast = Some(value);
    }

    /// Write a received value into the state.
    pub fn apply(&mut self, state: &mut S, value: &Value) -> Result<(), ApplyError> {
        (self.set)(state, value)?;
        self.last_broadcast = Some(value.clone());
        Ok(())
    }
}

impl<S> fmt::Debug for SyncField<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncField")
            .field("name", &self.name)
            .field("last_broadcast", &self.last_broadcast)
            .finish()
    }
}
