//! Per-entity history of authoritative snapshots

use shared::math::{Quat, Vec3};
use shared::model::{Attributes, NetworkedEntity};
use shared::PROXY_BUFFER_DEPTH;
use std::collections::VecDeque;

/// One authoritative state of a remote entity
#[derive(Debug, Clone, PartialEq)]
pub struct EntityState {
    /// Server time (ms) of the write that produced this state
    pub timestamp: f64,
    pub position: Vec3,
    pub velocity: Vec3,
    pub rotation: Quat,
    pub attributes: Attributes,
}

impl From<&NetworkedEntity> for EntityState {
    fn from(entity: &NetworkedEntity) -> Self {
        Self {
            timestamp: entity.timestamp,
            position: entity.position,
            velocity: entity.velocity,
            rotation: entity.rotation,
            attributes: entity.attributes.clone(),
        }
    }
}

/// Fixed-depth snapshot history, most recent first
#[derive(Debug, Clone)]
pub struct ProxyBuffer {
    states: VecDeque<EntityState>,
    depth: usize,
}

impl Default for ProxyBuffer {
    fn default() -> Self {
        Self::with_depth(PROXY_BUFFER_DEPTH)
    }
}

impl ProxyBuffer {
    pub fn with_depth(depth: usize) -> Self {
        Self {
            states: VecDeque::with_capacity(depth),
            depth: depth.max(1),
        }
    }

    /// Inserts a snapshot at the front, dropping the oldest when full
    pub fn push(&mut self, state: EntityState) {
        self.states.push_front(state);
        self.states.truncate(self.depth);
    }

    pub fn push_entity(&mut self, entity: &NetworkedEntity) {
        self.push(EntityState::from(entity));
    }

    pub fn newest(&self) -> Option<&EntityState> {
        self.states.front()
    }

    pub fn oldest(&self) -> Option<&EntityState> {
        self.states.back()
    }

    pub fn get(&self, index: usize) -> Option<&EntityState> {
        self.states.get(index)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}
