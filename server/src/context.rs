//! Room-scoped state handed to round logic and custom methods

use crate::client_manager::ConnId;
use crate::store::EntityStore;
use log::info;
use shared::protocol::ServerMessage;

/// Messages queued by room logic for the network layer
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Send {
        conn: ConnId,
        message: ServerMessage,
    },
    Broadcast {
        message: ServerMessage,
        exclude: Option<ConnId>,
    },
}

#[derive(Debug, Default)]
pub struct Outbox {
    queue: Vec<Outgoing>,
}

impl Outbox {
    pub fn send(&mut self, conn: ConnId, message: ServerMessage) {
        self.queue.push(Outgoing::Send { conn, message });
    }

    pub fn broadcast(&mut self, message: ServerMessage, exclude: Option<ConnId>) {
        self.queue.push(Outgoing::Broadcast { message, exclude });
    }

    pub fn drain(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.queue)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Join admission: capacity plus the round lock
#[derive(Debug)]
pub struct Admission {
    locked: bool,
    max_clients: usize,
}

impl Admission {
    pub fn new(max_clients: usize) -> Self {
        Self {
            locked: false,
            max_clients,
        }
    }

    pub fn lock(&mut self) {
        if !self.locked {
            info!("Room locked");
        }
        self.locked = true;
    }

    pub fn unlock(&mut self) {
        if self.locked {
            info!("Room unlocked");
        }
        self.locked = false;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    pub fn is_full(&self, occupancy: usize) -> bool {
        occupancy >= self.max_clients
    }

    /// Unlocks only while the room is below capacity
    pub fn unlock_if_able(&mut self, occupancy: usize) -> bool {
        if self.is_full(occupancy) {
            return false;
        }
        self.unlock();
        true
    }
}

/// Store, outbox and admission for one room, plus its clock
#[derive(Debug)]
pub struct RoomContext {
    pub store: EntityStore,
    pub outbox: Outbox,
    pub admission: Admission,
    /// Accumulated simulation time in milliseconds
    pub server_time: f64,
}

impl RoomContext {
    pub fn new(max_clients: usize) -> Self {
        Self {
            store: EntityStore::new(),
            outbox: Outbox::default(),
            admission: Admission::new(max_clients),
            server_time: 0.0,
        }
    }

    pub fn broadcast(&mut self, message: ServerMessage) {
        self.outbox.broadcast(message, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlock_if_able() {
        let mut admission = Admission::new(2);
        admission.lock();

        assert!(!admission.unlock_if_able(2));
        assert!(admission.is_locked());

        assert!(admission.unlock_if_able(1));
        assert!(!admission.is_locked());
    }

    #[test]
    fn test_outbox_drain() {
        let mut outbox = Outbox::default();
        outbox.send(3, ServerMessage::BeginRound);
        outbox.broadcast(ServerMessage::BeginRoundCountDown, Some(3));

        assert_eq!(outbox.len(), 2);
        let drained = outbox.drain();
        assert_eq!(
            drained[1],
            Outgoing::Broadcast {
                message: ServerMessage::BeginRoundCountDown,
                exclude: Some(3)
            }
        );
        assert!(outbox.is_empty());
    }
}
