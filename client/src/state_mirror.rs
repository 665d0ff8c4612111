//! Client-side shadow of the room's round phase
//!
//! Never authoritative: it only gates local UI and input. Transitions are
//! checked against a fixed adjacency table and illegal ones are refused.

use log::{debug, error, info};
use shared::game_state::{keys, ServerGameState};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClientGameState {
    #[default]
    None,
    Waiting,
    /// Waiting, with the local player already readied
    WaitingForOthers,
    BeginRound,
    SimulateRound,
    EndRound,
}

impl ClientGameState {
    /// Translates a wire label; unknown labels become `None`
    pub fn translate(wire: &str, locally_ready: bool) -> Self {
        match ServerGameState::from_wire(wire) {
            Some(ServerGameState::Waiting) if locally_ready => ClientGameState::WaitingForOthers,
            Some(ServerGameState::Waiting) => ClientGameState::Waiting,
            Some(ServerGameState::BeginRound) => ClientGameState::BeginRound,
            Some(ServerGameState::SimulateRound) => ClientGameState::SimulateRound,
            Some(ServerGameState::EndRound) => ClientGameState::EndRound,
            Some(ServerGameState::None) | None => ClientGameState::None,
        }
    }

    fn successors(self) -> Option<&'static [ClientGameState]> {
        use ClientGameState::*;
        match self {
            Waiting => Some(&[WaitingForOthers, BeginRound]),
            WaitingForOthers => Some(&[Waiting, BeginRound, SimulateRound]),
            BeginRound => Some(&[SimulateRound, EndRound]),
            SimulateRound => Some(&[EndRound, Waiting, WaitingForOthers]),
            EndRound => Some(&[Waiting, WaitingForOthers]),
            None => Option::None,
        }
    }
}

/// True iff `from == to`, `to` is a listed successor of `from`, or `from`
/// has no entry in the table
pub fn is_safe_state_transition(from: ClientGameState, to: ClientGameState) -> bool {
    if from == to {
        return true;
    }
    match from.successors() {
        Some(successors) => successors.contains(&to),
        None => true,
    }
}

/// What changed after applying room attributes
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MirrorUpdate {
    pub state_changed: bool,
    pub rejected: bool,
    pub count_down_changed: bool,
}

#[derive(Debug, Default)]
pub struct StateMirror {
    current: ClientGameState,
    last: ClientGameState,
    locally_ready: bool,
    count_down: Option<String>,
    general_message: String,
}

impl StateMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> ClientGameState {
        self.current
    }

    pub fn last(&self) -> ClientGameState {
        self.last
    }

    /// Countdown text while a countdown is being shown
    pub fn count_down(&self) -> Option<&str> {
        self.count_down.as_deref()
    }

    pub fn general_message(&self) -> &str {
        &self.general_message
    }

    /// True while the room waits and the local player has not readied
    pub fn awaiting_player_ready(&self) -> bool {
        self.current == ClientGameState::Waiting && !self.locally_ready
    }

    /// Records the local ready flag and refines Waiting accordingly
    pub fn set_locally_ready(&mut self, ready: bool) {
        self.locally_ready = ready;
        let refined = match self.current {
            ClientGameState::Waiting if ready => ClientGameState::WaitingForOthers,
            ClientGameState::WaitingForOthers if !ready => ClientGameState::Waiting,
            other => other,
        };
        self.transition(refined);
    }

    /// Applies a transition if the table allows it; returns whether it did
    pub fn transition(&mut self, to: ClientGameState) -> bool {
        if to == self.current {
            return true;
        }
        if !is_safe_state_transition(self.current, to) {
            error!("Illegal state transition {:?} -> {:?}", self.current, to);
            return false;
        }
        info!("Game state {:?} -> {:?}", self.current, to);
        self.last = self.current;
        self.current = to;
        true
    }

    /// Updates the mirror from the room attribute blackboard
    pub fn apply_room_attributes(&mut self, attributes: &HashMap<String, String>) -> MirrorUpdate {
        let mut update = MirrorUpdate::default();

        if let Some(message) = attributes.get(keys::GENERAL_MESSAGE) {
            self.general_message = message.clone();
        }

        if let Some(wire) = attributes.get(keys::CURRENT_GAME_STATE) {
            let target = ClientGameState::translate(wire, self.locally_ready);
            if target != self.current {
                if self.transition(target) {
                    update.state_changed = true;
                    if matches!(target, ClientGameState::SimulateRound | ClientGameState::EndRound) {
                        // The server resets ready flags when a round starts
                        self.locally_ready = false;
                    }
                } else {
                    update.rejected = true;
                }
            }
        }

        if let Some(text) = attributes.get(keys::COUNT_DOWN) {
            let showing = self.current == ClientGameState::BeginRound && !text.is_empty();
            let next = showing.then(|| text.clone());
            if next != self.count_down {
                debug!("Countdown display {:?}", next);
                self.count_down = next;
                update.count_down_changed = true;
            }
        } else if self.current != ClientGameState::BeginRound && self.count_down.is_some() {
            self.count_down = None;
            update.count_down_changed = true;
        }

        update
    }
}
