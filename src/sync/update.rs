//! Component sync messages.

use serde_json::{Map, Value};

use crate::core::NetworkId;

/// Field name to value, as carried on the wire.
pub type FieldMap = Map<String, Value>;

/// One `<component>_update` message.
///
/// Wire format:
/// ```text
/// {"type": "<sync_type>", "network_id": <id>, "<field>": <value>, ...}
/// ```
///
/// Only the fields present in `fields` are applied on receipt; a full
/// snapshot simply carries every declared field.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentUpdate {
    /// Component sync type, e.g. `rigidbody_update`.
    pub sync_type: String,
    /// Entity the update targets.
    pub network_id: NetworkId,
    /// Changed (or, for a snapshot, all) field values.
    pub fields: FieldMap,
}

impl ComponentUpdate {
    /// Create an update.
    pub fn new(sync_type: impl Into<String>, network_id: NetworkId, fields: FieldMap) -> Self {
        Self {
            sync_type: sync_type.into(),
            network_id,
            fields,
        }
    }

    /// Check if the update carries no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Value of one field, if present.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}
