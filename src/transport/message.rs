//! Wire messages
//!
//! Every datagram is a UTF-8 JSON object with a mandatory string `"type"`.
//! Decoding is total over kinds: a kind this build does not know decodes as
//! [`Message::Unknown`] so newer peers can add messages without breaking older
//! ones. Kinds ending in `_update` are component sync messages.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::fragment::Fragment;
use crate::core::constants::*;
use crate::core::{DecodeError, EncodeError, NetworkId, PeerId};
use crate::sync::ComponentUpdate;

/// Heartbeat payload, echoed unchanged by the authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    /// Sender's clock when the request left, in seconds.
    pub time: f64,
    /// Peer that sent the request.
    pub sender_id: PeerId,
}

/// Entity creation broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnObject {
    /// Id assigned by the authority.
    pub network_id: NetworkId,
    /// Owning peer.
    pub owner_id: PeerId,
    /// Factory type name.
    pub class_name: String,
}

/// Entity removal broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveObject {
    /// Entity to remove.
    pub network_id: NetworkId,
}

/// One entry of a scene listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneObject {
    /// Factory type name.
    pub class_name: String,
    /// Entity id.
    pub network_id: NetworkId,
    /// Owning peer.
    pub owner_id: PeerId,
}

impl From<SceneObject> for SpawnObject {
    fn from(obj: SceneObject) -> Self {
        Self {
            network_id: obj.network_id,
            owner_id: obj.owner_id,
            class_name: obj.class_name,
        }
    }
}

/// Every live networked entity of the authority's active scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneSnapshot {
    /// Scene the entities belong to.
    pub scene_id: String,
    /// Live entities.
    pub objects: Vec<SceneObject>,
}

/// Request carrying only the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRequest {
    /// Requesting peer.
    pub sender_id: PeerId,
}

/// Request for the spawn data of one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingObject {
    /// Entity the sender does not know.
    pub network_id: NetworkId,
    /// Requesting peer.
    pub sender_id: PeerId,
}

/// Fragment as it appears on the wire.
#[derive(Debug, Serialize, Deserialize)]
struct FragmentWire {
    message_id: String,
    total_fragments: u32,
    fragment_index: u32,
    data: String,
}

/// Every message the session understands.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// `PING_REQUEST`
    PingRequest(Ping),
    /// `PING_RESPONSE`
    PingResponse(Ping),
    /// `spawn_object`
    SpawnObject(SpawnObject),
    /// `remove_object`
    RemoveObject(RemoveObject),
    /// `scene_sync`
    SceneSync(SceneSnapshot),
    /// `request_scene_sync`
    RequestSceneSync(PeerRequest),
    /// `scene_sync_complete`
    SceneSyncComplete(PeerRequest),
    /// `request_missing_object`
    RequestMissingObject(MissingObject),
    /// `server_shutdown`
    ServerShutdown,
    /// `fragment`
    Fragment(Fragment),
    /// `<component>_update`
    ComponentUpdate(ComponentUpdate),
    /// Any other kind; accepted and ignored.
    Unknown {
        /// The unrecognized `type` value.
        kind: String,
    },
}

impl Message {
    /// The wire `type` of this message.
    pub fn kind(&self) -> &str {
        match self {
            Message::PingRequest(_) => KIND_PING_REQUEST,
            Message::PingResponse(_) => KIND_PING_RESPONSE,
            Message::SpawnObject(_) => KIND_SPAWN_OBJECT,
            Message::RemoveObject(_) => KIND_REMOVE_OBJECT,
            Message::SceneSync(_) => KIND_SCENE_SYNC,
            Message::RequestSceneSync(_) => KIND_REQUEST_SCENE_SYNC,
            Message::SceneSyncComplete(_) => KIND_SCENE_SYNC_COMPLETE,
            Message::RequestMissingObject(_) => KIND_REQUEST_MISSING_OBJECT,
            Message::ServerShutdown => KIND_SERVER_SHUTDOWN,
            Message::Fragment(_) => KIND_FRAGMENT,
            Message::ComponentUpdate(update) => update.sync_type.as_str(),
            Message::Unknown { kind } => kind.as_str(),
        }
    }

    /// Encode to the JSON object form.
    pub fn to_object(&self) -> Result<Map<String, Value>, EncodeError> {
        let mut map = match self {
            Message::PingRequest(p) | Message::PingResponse(p) => object_of(p)?,
            Message::SpawnObject(s) => object_of(s)?,
            Message::RemoveObject(r) => object_of(r)?,
            Message::SceneSync(s) => object_of(s)?,
            Message::RequestSceneSync(r) | Message::SceneSyncComplete(r) => object_of(r)?,
            Message::RequestMissingObject(m) => object_of(m)?,
            Message::ServerShutdown | Message::Unknown { .. } => Map::new(),
            Message::Fragment(f) => object_of(&FragmentWire {
                message_id: f.message_id.clone(),
                total_fragments: f.total_fragments,
                fragment_index: f.fragment_index,
                data: base64::encode(&f.data),
            })?,
            Message::ComponentUpdate(update) => {
                let mut map = update.fields.clone();
                map.insert(
                    "network_id".to_string(),
                    Value::from(update.network_id.get()),
                );
                map
            }
        };
        map.insert("type".to_string(), Value::String(self.kind().to_string()));
        Ok(map)
    }

    /// Encode to UTF-8 JSON bytes.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let map = self.to_object()?;
        serde_json::to_vec(&map).map_err(|e| EncodeError::Json(e.to_string()))
    }

    /// Decode from UTF-8 JSON bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
        match value {
            Value::Object(map) => Self::from_object(map),
            _ => Err(DecodeError::NotAnObject),
        }
    }

    /// Decode from the JSON object form.
    pub fn from_object(mut map: Map<String, Value>) -> Result<Self, DecodeError> {
        let kind = match map.remove("type") {
            Some(Value::String(kind)) => kind,
            _ => return Err(DecodeError::MissingType),
        };

        let message = match kind.as_str() {
            KIND_PING_REQUEST => Message::PingRequest(typed(&kind, map)?),
            KIND_PING_RESPONSE => Message::PingResponse(typed(&kind, map)?),
            KIND_SPAWN_OBJECT => Message::SpawnObject(typed(&kind, map)?),
            KIND_REMOVE_OBJECT => Message::RemoveObject(typed(&kind, map)?),
            KIND_SCENE_SYNC => Message::SceneSync(typed(&kind, map)?),
            KIND_REQUEST_SCENE_SYNC => Message::RequestSceneSync(typed(&kind, map)?),
            KIND_SCENE_SYNC_COMPLETE => Message::SceneSyncComplete(typed(&kind, map)?),
            KIND_REQUEST_MISSING_OBJECT => Message::RequestMissingObject(typed(&kind, map)?),
            KIND_SERVER_SHUTDOWN => Message::ServerShutdown,
            KIND_FRAGMENT => {
                let wire: FragmentWire = typed(&kind, map)?;
                let data = base64::decode(&wire.data)
                    .map_err(|e| DecodeError::InvalidBase64(e.to_string()))?;
                Message::Fragment(Fragment {
                    message_id: wire.message_id,
                    total_fragments: wire.total_fragments,
                    fragment_index: wire.fragment_index,
                    data,
                })
            }
            _ if kind.ends_with(UPDATE_KIND_SUFFIX) => {
                let network_id = match map.remove("network_id") {
                    Some(value) => serde_json::from_value::<NetworkId>(value).map_err(|e| {
                        DecodeError::InvalidFields {
                            kind: kind.clone(),
                            reason: e.to_string(),
                        }
                    })?,
                    None => {
                        return Err(DecodeError::InvalidFields {
                            kind: kind.clone(),
                            reason: "missing network_id".to_string(),
                        });
                    }
                };
                Message::ComponentUpdate(ComponentUpdate {
                    sync_type: kind.clone(),
                    network_id,
                    fields: map,
                })
            }
            _ => Message::Unknown { kind: kind.clone() },
        };
        Ok(message)
    }
}

fn object_of<T: Serialize>(payload: &T) -> Result<Map<String, Value>, EncodeError> {
    match serde_json::to_value(payload).map_err(|e| EncodeError::Json(e.to_string()))? {
        Value::Object(map) => Ok(map),
        other => Err(EncodeError::Json(format!("payload is not an object: {other}"))),
    }
}

fn typed<T: DeserializeOwned>(kind: &str, map: Map<String, Value>) -> Result<T, DecodeError> {
    serde_json::from_value(Value::Object(map)).map_err(|e| DecodeError::InvalidFields {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}
