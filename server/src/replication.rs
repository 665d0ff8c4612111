//! Fixed-rate replication of store changes

use crate::store::EntityStore;
use log::debug;
use shared::protocol::{ServerMessage, StateChange};
use std::collections::HashMap;

/// Collapses a run of changes so each entity, user and attribute appears at
/// most once, in order of first appearance
pub fn coalesce(changes: Vec<StateChange>) -> Vec<StateChange> {
    let mut merged: Vec<Option<StateChange>> = Vec::with_capacity(changes.len());
    let mut slots: HashMap<(u8, String), usize> = HashMap::new();

    for change in changes {
        let (kind, key) = change.coalesce_key();
        let key = (kind, key.to_string());

        let Some(&index) = slots.get(&key) else {
            slots.insert(key, merged.len());
            merged.push(Some(change));
            continue;
        };

        let replacement = match (merged[index].take(), change) {
            // Added and removed inside one window. Joiners get their snapshot
            // only after the pending window is flushed, so nobody has seen it
            (Some(StateChange::EntityAdded(_)), StateChange::EntityRemoved { .. })
            | (Some(StateChange::UserAdded(_)), StateChange::UserRemoved { .. }) => None,
            (Some(StateChange::EntityAdded(_)), StateChange::EntityChanged(entity)) => {
                Some(StateChange::EntityAdded(entity))
            }
            (Some(StateChange::UserAdded(_)), StateChange::UserChanged(user)) => {
                Some(StateChange::UserAdded(user))
            }
            (_, latest) => Some(latest),
        };
        merged[index] = replacement;
    }

    merged.into_iter().flatten().collect()
}

/// Turns the store's change log into periodic `statePatch` broadcasts
#[derive(Debug, Default)]
pub struct ReplicationChannel {
    patches_sent: u64,
}

impl ReplicationChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains pending changes into a single patch, or `None` when idle
    pub fn collect_patch(&mut self, store: &mut EntityStore) -> Option<ServerMessage> {
        if !store.has_pending_changes() {
            return None;
        }

        let changes = coalesce(store.drain_changes());
        if changes.is_empty() {
            return None;
        }

        self.patches_sent += 1;
        debug!("Patch {} carries {} changes", self.patches_sent, changes.len());
        Some(ServerMessage::StatePatch(changes))
    }

    #[cfg(test)]
    fn patches_sent(&self) -> u64 {
        self.patches_sent
    }
}
