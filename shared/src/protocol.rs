//! Messages exchanged between clients and the room

use crate::game_state::Winner;
use crate::model::{NetworkedEntity, NetworkedUser};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Requests a client sends to the room
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Join the room, or resume a session inside its reconnection window
    Join(JoinRequest),
    /// Consented leave
    Leave,
    Ping,
    CreateEntity(EntityCreationMessage),
    /// `[entityId, field, value, field, value, ...]`
    EntityUpdate(Vec<Value>),
    SetAttribute(AttributeUpdateMessage),
    RemoveEntity(String),
    RemoteFunctionCall(RfcMessage),
    CustomMethod(CustomMethodMessage),
}

/// Messages the room sends to clients
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Ping reply, message code 0
    #[serde(rename = "0")]
    Pong(PingReply),
    OnJoin(NetworkedUser),
    JoinRejected {
        reason: String,
    },
    /// Full room state, sent to every newly joined client
    StateSnapshot(RoomSnapshot),
    /// Changes accumulated since the previous broadcast
    StatePatch(Vec<StateChange>),
    #[serde(rename = "onRFC")]
    OnRfc(RfcMessage),
    OnScoreUpdate(ScoreUpdate),
    BeginRoundCountDown,
    BeginRound,
    OnRoundEnd(RoundEndMessage),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub options: HashMap<String, Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PingReply {
    pub server_time: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct EntityCreationMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_id: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AttributeUpdateMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes_to_set: Option<HashMap<String, Value>>,
}

/// Who receives a relayed remote function call
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum RfcTarget {
    #[default]
    All,
    Others,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RfcMessage {
    pub entity_id: String,
    pub function: String,
    #[serde(default)]
    pub param: Vec<Value>,
    #[serde(default)]
    pub target: RfcTarget,
    /// Stamped by the server with the sender's id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CustomMethodMessage {
    pub method: String,
    #[serde(default)]
    pub param: Vec<Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ScoreUpdate {
    #[serde(rename = "entityID")]
    pub entity_id: String,
    #[serde(rename = "targetID")]
    pub target_id: String,
    pub score: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RoundEndMessage {
    pub winner: Winner,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room_id: String,
    pub server_time: f64,
    pub entities: Vec<NetworkedEntity>,
    pub users: Vec<NetworkedUser>,
    pub attributes: HashMap<String, String>,
}

/// A single replicated change notification
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", content = "data", rename_all = "camelCase")]
pub enum StateChange {
    EntityAdded(NetworkedEntity),
    EntityChanged(NetworkedEntity),
    EntityRemoved { id: String },
    UserAdded(NetworkedUser),
    UserChanged(NetworkedUser),
    UserRemoved { id: String },
    AttributeChanged { key: String, value: String },
}

impl StateChange {
    /// Key under which later changes replace earlier ones in a patch
    pub fn coalesce_key(&self) -> (u8, &str) {
        match self {
            StateChange::EntityAdded(e) | StateChange::EntityChanged(e) => (0, &e.id),
            StateChange::EntityRemoved { id } => (0, id),
            StateChange::UserAdded(u) | StateChange::UserChanged(u) => (1, &u.id),
            StateChange::UserRemoved { id } => (1, id),
            StateChange::AttributeChanged { key, .. } => (2, key),
        }
    }
}
