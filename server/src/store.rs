//! Authoritative entity/user store and room attribute blackboard
//!
//! Every mutation is appended to a change log that the replication channel
//! drains at its own rate. Writes are stamped with the server time passed in
//! by the caller; the store never reads a clock itself.

use crate::error::RoomError;
use log::debug;
use serde_json::Value;
use shared::math::{Quat, Vec3};
use shared::model::{attribute_string, value_as_f64, Attributes, NetworkedEntity, NetworkedUser};
use shared::protocol::{AttributeUpdateMessage, EntityCreationMessage, RoomSnapshot, StateChange};
use shared::TransformField;
use std::collections::HashMap;

const CREATION_POS: &str = "creationPos";
const CREATION_ROT: &str = "creationRot";
const ATTRIBUTES_MARKER: &str = "attributes";
const INC_MARKER: &str = "inc";

#[derive(Debug, Default)]
pub struct EntityStore {
    entities: HashMap<String, NetworkedEntity>,
    users: HashMap<String, NetworkedUser>,
    attributes: Attributes,
    changes: Vec<StateChange>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an entity owned by `owner_id` and returns its generated id.
    ///
    /// `creationPos`/`creationRot` seed the transform instead of being stored
    /// as attributes; every other attribute is coerced to a string.
    pub fn create_entity(
        &mut self,
        owner_id: &str,
        request: EntityCreationMessage,
        now: f64,
    ) -> String {
        let id = self.unused_entity_id();
        let mut entity = NetworkedEntity::new(id.clone(), owner_id.to_string(), now);
        entity.creation_id = request.creation_id;

        for (key, value) in request.attributes {
            match key.as_str() {
                CREATION_POS => match components(&value, 3) {
                    Some(c) => entity.set_position(Vec3::new(c[0], c[1], c[2])),
                    None => debug!("Ignoring malformed {} on entity {}", CREATION_POS, id),
                },
                CREATION_ROT => match components(&value, 4) {
                    Some(c) => entity.rotation = Quat::new(c[0], c[1], c[2], c[3]),
                    None => debug!("Ignoring malformed {} on entity {}", CREATION_ROT, id),
                },
                _ => {
                    entity.attributes.insert(key, attribute_string(&value));
                }
            }
        }

        debug!("Created entity {} for {}", id, owner_id);
        self.changes.push(StateChange::EntityAdded(entity.clone()));
        self.entities.insert(id.clone(), entity);
        id
    }

    fn unused_entity_id(&self) -> String {
        loop {
            let id = shared::generate_id();
            if !self.entities.contains_key(&id) {
                return id;
            }
        }
    }

    /// Applies an `entityUpdate` change list sent by `sender_id`.
    ///
    /// The list is `[entityId, field, value, ...]`. A second element of
    /// `"attributes"` switches to attribute mode. A value of `"inc"` adds the
    /// following token to the stored value. The timestamp is stamped last,
    /// even when no field changed.
    pub fn update_entity(
        &mut self,
        sender_id: &str,
        changes: &[Value],
        now: f64,
    ) -> Result<(), RoomError> {
        let Some(entity_id) = changes.first().and_then(Value::as_str) else {
            debug!("Ignoring entity update without an entity id");
            return Ok(());
        };
        let Some(entity) = self.entities.get_mut(entity_id) else {
            debug!("Ignoring update for unknown entity {}", entity_id);
            return Ok(());
        };
        if entity.owner_id != sender_id {
            return Err(RoomError::NotOwner {
                user: sender_id.to_string(),
                entity: entity_id.to_string(),
            });
        }

        let attribute_mode = changes.get(1).and_then(Value::as_str) == Some(ATTRIBUTES_MARKER);
        let mut index = if attribute_mode { 2 } else { 1 };

        while index + 1 < changes.len() {
            let field = attribute_string(&changes[index]);
            let mut value = changes[index + 1].clone();
            let mut step = 2;

            if value.as_str() == Some(INC_MARKER) {
                let delta = changes.get(index + 2).and_then(value_as_f64).unwrap_or(0.0);
                let stored = if attribute_mode {
                    entity
                        .attributes
                        .get(&field)
                        .and_then(|s| s.trim().parse::<f64>().ok())
                        .unwrap_or(0.0)
                } else {
                    TransformField::from_wire(&field)
                        .map(|f| entity.field(f) as f64)
                        .unwrap_or(0.0)
                };
                value = Value::from(stored + delta);
                step = 3;
            }

            if attribute_mode {
                entity.attributes.insert(field, attribute_string(&value));
            } else {
                match (TransformField::from_wire(&field), value_as_f64(&value)) {
                    (Some(transform), Some(v)) => entity.set_field(transform, v as f32),
                    _ => debug!("Ignoring non-writable field {} on {}", field, entity_id),
                }
            }

            index += step;
        }

        entity.timestamp = now;
        self.changes.push(StateChange::EntityChanged(entity.clone()));
        Ok(())
    }

    /// Merges attributes into an entity or user; unknown targets and
    /// malformed messages are ignored
    pub fn set_attribute(&mut self, message: &AttributeUpdateMessage, now: f64) {
        let Some(to_set) = &message.attributes_to_set else {
            debug!("Ignoring setAttribute without attributesToSet");
            return;
        };

        if let Some(entity_id) = &message.entity_id {
            let Some(entity) = self.entities.get_mut(entity_id) else {
                debug!("setAttribute: no entity {}", entity_id);
                return;
            };
            entity.timestamp = now;
            for (key, value) in to_set {
                entity.attributes.insert(key.clone(), attribute_string(value));
            }
            self.changes.push(StateChange::EntityChanged(entity.clone()));
        } else if let Some(user_id) = &message.user_id {
            let Some(user) = self.users.get_mut(user_id) else {
                debug!("setAttribute: no user {}", user_id);
                return;
            };
            user.timestamp = now;
            for (key, value) in to_set {
                user.attributes.insert(key.clone(), attribute_string(value));
            }
            self.changes.push(StateChange::UserChanged(user.clone()));
        } else {
            debug!("Ignoring setAttribute without a target id");
        }
    }

    pub fn set_user_attribute(&mut self, user_id: &str, key: &str, value: &str, now: f64) {
        if let Some(user) = self.users.get_mut(user_id) {
            user.timestamp = now;
            user.attributes.insert(key.to_string(), value.to_string());
            self.changes.push(StateChange::UserChanged(user.clone()));
        }
    }

    pub fn set_attribute_for_all_users(&mut self, key: &str, value: &str, now: f64) {
        let ids: Vec<String> = self.users.keys().cloned().collect();
        for id in ids {
            self.set_user_attribute(&id, key, value, now);
        }
    }

    pub fn remove_entity(&mut self, entity_id: &str) -> Option<NetworkedEntity> {
        let removed = self.entities.remove(entity_id)?;
        self.changes.push(StateChange::EntityRemoved {
            id: entity_id.to_string(),
        });
        Some(removed)
    }

    /// Removes every entity owned by `owner_id`, returning their ids
    pub fn remove_entities_owned_by(&mut self, owner_id: &str) -> Vec<String> {
        let ids = self.entities_owned_by(owner_id);
        for id in &ids {
            self.remove_entity(id);
        }
        ids
    }

    pub fn entities_owned_by(&self, owner_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entities
            .values()
            .filter(|e| e.owner_id == owner_id)
            .map(|e| e.id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn entity(&self, entity_id: &str) -> Option<&NetworkedEntity> {
        self.entities.get(entity_id)
    }

    pub fn has_entity(&self, entity_id: &str) -> bool {
        self.entities.contains_key(entity_id)
    }

    pub fn entity_ids(&self) -> impl Iterator<Item = &String> {
        self.entities.keys()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn add_user(&mut self, user: NetworkedUser) {
        self.changes.push(StateChange::UserAdded(user.clone()));
        self.users.insert(user.id.clone(), user);
    }

    pub fn remove_user(&mut self, user_id: &str) -> Option<NetworkedUser> {
        let removed = self.users.remove(user_id)?;
        self.changes.push(StateChange::UserRemoved {
            id: user_id.to_string(),
        });
        Some(removed)
    }

    pub fn set_user_connected(&mut self, user_id: &str, connected: bool) {
        if let Some(user) = self.users.get_mut(user_id) {
            if user.connected != connected {
                user.connected = connected;
                self.changes.push(StateChange::UserChanged(user.clone()));
            }
        }
    }

    pub fn user(&self, user_id: &str) -> Option<&NetworkedUser> {
        self.users.get(user_id)
    }

    pub fn users(&self) -> impl Iterator<Item = &NetworkedUser> {
        self.users.values()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn connected_user_count(&self) -> usize {
        self.users.values().filter(|u| u.connected).count()
    }

    pub fn room_attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Writes a room attribute; unchanged values are not logged as changes
    pub fn set_room_attribute(&mut self, key: &str, value: &str) {
        if self.room_attribute(key) == Some(value) {
            return;
        }
        self.attributes.insert(key.to_string(), value.to_string());
        self.changes.push(StateChange::AttributeChanged {
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    pub fn snapshot(&self, room_id: &str, server_time: f64) -> RoomSnapshot {
        RoomSnapshot {
            room_id: room_id.to_string(),
            server_time,
            entities: self.entities.values().cloned().collect(),
            users: self.users.values().cloned().collect(),
            attributes: self.attributes.clone(),
        }
    }

    /// Takes every change recorded since the last drain, oldest first
    pub fn drain_changes(&mut self) -> Vec<StateChange> {
        std::mem::take(&mut self.changes)
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.changes.is_empty()
    }
}

/// Reads `count` numeric components from a JSON array
fn components(value: &Value, count: usize) -> Option<Vec<f32>> {
    let array = value.as_array()?;
    if array.len() < count {
        return None;
    }
    array[..count]
        .iter()
        .map(|v| value_as_f64(v).map(|f| f as f32))
        .collect()
}
