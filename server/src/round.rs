//! Authoritative round life-cycle
//!
//! Waiting -> BeginRound (Enter, GetReady, CountDown) -> SimulateRound ->
//! EndRound -> Waiting. The typed [`RoundStatus`] is the source of truth; it
//! is projected onto the room attribute blackboard after every tick so
//! clients can mirror it.

use crate::context::RoomContext;
use log::{debug, error, info};
use shared::game_state::{keys, CountDownState, ServerGameState, Winner};
use shared::model::{format_number, NOT_READY, READY_STATE_KEY};
use shared::protocol::{RoundEndMessage, ServerMessage};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Seconds spent showing "Get Ready!" before the numeric countdown
pub const GET_READY_SECS: f64 = 3.0;
/// Length of the numeric countdown in seconds
pub const COUNT_DOWN_SECS: f64 = 3.0;
pub const GET_READY_MESSAGE: &str = "Get Ready!";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoundStatus {
    pub current: ServerGameState,
    pub last: ServerGameState,
    pub count_down: CountDownState,
    /// Seconds accumulated (GetReady) or remaining (CountDown)
    pub counter: f64,
}

impl Default for RoundStatus {
    fn default() -> Self {
        Self {
            current: ServerGameState::Waiting,
            last: ServerGameState::None,
            count_down: CountDownState::Enter,
            counter: 0.0,
        }
    }
}

pub struct RoundController {
    status: RoundStatus,
    min_req_players: usize,
    alive: HashSet<String>,
    /// Kills per entity id for the current round
    scores: HashMap<String, u32>,
}

impl RoundController {
    pub fn new(min_req_players: usize) -> Self {
        Self {
            status: RoundStatus::default(),
            min_req_players,
            alive: HashSet::new(),
            scores: HashMap::new(),
        }
    }

    /// Publishes the initial phase labels
    pub fn initialize(&self, ctx: &mut RoomContext) {
        self.project(ctx);
    }

    pub fn status(&self) -> RoundStatus {
        self.status
    }

    pub fn current(&self) -> ServerGameState {
        self.status.current
    }

    pub fn alive_set(&self) -> &HashSet<String> {
        &self.alive
    }

    pub fn is_alive(&self, entity_id: &str) -> bool {
        self.alive.contains(entity_id)
    }

    pub fn score(&self, entity_id: &str) -> u32 {
        self.scores.get(entity_id).copied().unwrap_or(0)
    }

    /// Records a kill: the target leaves the alive set and the shooter scores.
    /// Returns the shooter's new score, or `None` when the target was not alive.
    pub fn score_kill(&mut self, entity_id: &str, target_id: &str) -> Option<u32> {
        if !self.alive.remove(target_id) {
            return None;
        }
        let score = self.scores.entry(entity_id.to_string()).or_insert(0);
        *score += 1;
        Some(*score)
    }

    /// Runs exactly one phase's logic for this tick
    pub fn tick(&mut self, ctx: &mut RoomContext, dt_secs: f64) {
        // Entities that left the store cannot stall a round
        let store = &ctx.store;
        self.alive.retain(|id| store.has_entity(id));

        match self.status.current {
            ServerGameState::None => {}
            ServerGameState::Waiting => self.waiting(ctx),
            ServerGameState::BeginRound => self.begin_round(ctx, dt_secs),
            ServerGameState::SimulateRound => self.simulate_round(),
            ServerGameState::EndRound => self.end_round(ctx),
        }

        self.project(ctx);
    }

    /// Re-evaluates the lock after a user and their entities were removed
    pub fn on_user_removed(&self, ctx: &mut RoomContext) {
        if !ctx.admission.is_locked() {
            return;
        }
        match self.status.current {
            ServerGameState::Waiting => {
                ctx.admission.unlock_if_able(ctx.store.user_count());
            }
            state => debug!("Will not unlock the room during {}", state),
        }
    }

    fn move_to_state(&mut self, state: ServerGameState) {
        info!("Round state {} -> {}", self.status.current, state);
        self.status.last = self.status.current;
        self.status.current = state;
    }

    fn waiting(&mut self, ctx: &mut RoomContext) {
        let connected = ctx.store.connected_user_count();
        if connected < self.min_req_players {
            let message = format!(
                "Waiting for more players to join - ({}/{})",
                connected, self.min_req_players
            );
            ctx.store.set_room_attribute(keys::GENERAL_MESSAGE, &message);
            return;
        }
        ctx.store.set_room_attribute(keys::GENERAL_MESSAGE, "");

        if !ctx.store.users().all(|user| user.is_ready()) {
            return;
        }

        ctx.admission.lock();
        self.alive = ctx.store.entity_ids().cloned().collect();
        self.status.count_down = CountDownState::Enter;
        self.move_to_state(ServerGameState::BeginRound);
    }

    fn begin_round(&mut self, ctx: &mut RoomContext, dt_secs: f64) {
        match self.status.count_down {
            CountDownState::Enter => {
                ctx.store.set_room_attribute(keys::COUNT_DOWN, "");
                ctx.broadcast(ServerMessage::BeginRoundCountDown);
                self.status.counter = 0.0;
                self.status.count_down = CountDownState::GetReady;
            }
            CountDownState::GetReady => {
                ctx.store.set_room_attribute(keys::COUNT_DOWN, GET_READY_MESSAGE);
                if self.status.counter < GET_READY_SECS {
                    self.status.counter += dt_secs;
                    return;
                }
                self.status.counter = COUNT_DOWN_SECS;
                self.status.count_down = CountDownState::CountDown;
            }
            CountDownState::CountDown => {
                let display = format_number(self.status.counter.max(0.0).ceil());
                ctx.store.set_room_attribute(keys::COUNT_DOWN, &display);
                if self.status.counter > 0.0 {
                    self.status.counter -= dt_secs;
                    return;
                }

                ctx.broadcast(ServerMessage::BeginRound);
                self.move_to_state(ServerGameState::SimulateRound);
                self.reset_scores(ctx);
                let now = ctx.server_time;
                ctx.store
                    .set_attribute_for_all_users(READY_STATE_KEY, NOT_READY, now);
                self.status.count_down = CountDownState::Enter;
            }
        }
    }

    fn simulate_round(&mut self) {
        if self.alive.len() > 1 {
            return;
        }
        self.move_to_state(ServerGameState::EndRound);
    }

    fn end_round(&mut self, ctx: &mut RoomContext) {
        let winner = self.compute_winner(ctx);
        info!("Round over, winner {:?}", winner);
        ctx.broadcast(ServerMessage::OnRoundEnd(RoundEndMessage { winner }));

        self.alive.clear();
        let now = ctx.server_time;
        ctx.store
            .set_attribute_for_all_users(READY_STATE_KEY, NOT_READY, now);
        ctx.admission.unlock_if_able(ctx.store.user_count());
        self.move_to_state(ServerGameState::Waiting);
    }

    /// Zeroes the score of every entity owned by a user in the room
    fn reset_scores(&mut self, ctx: &RoomContext) {
        self.scores.clear();
        for user in ctx.store.users() {
            for entity_id in ctx.store.entities_owned_by(&user.id) {
                self.scores.insert(entity_id, 0);
            }
        }
    }

    /// Highest score among entities still in the store. When nobody scored,
    /// the last entity standing wins.
    pub fn compute_winner(&self, ctx: &RoomContext) -> Winner {
        if self.status.current != ServerGameState::EndRound {
            error!("Can't determine winner yet, round is {}", self.status.current);
            return Winner {
                id: "TBD".to_string(),
                ..Winner::default()
            };
        }

        let standing = self
            .scores
            .iter()
            .filter(|(id, _)| ctx.store.has_entity(id))
            .map(|(id, score)| (id.as_str(), *score));
        let winner = winner_from_scores(standing);
        if winner != Winner::default() {
            return winner;
        }

        let mut survivors = self.alive.iter().filter(|id| ctx.store.has_entity(id));
        match (survivors.next(), survivors.next()) {
            (Some(id), None) => Winner {
                id: id.clone(),
                score: self.score(id),
                ..Winner::default()
            },
            _ => winner,
        }
    }

    fn project(&self, ctx: &mut RoomContext) {
        let store = &mut ctx.store;
        store.set_room_attribute(keys::CURRENT_GAME_STATE, self.status.current.as_str());
        store.set_room_attribute(keys::LAST_GAME_STATE, self.status.last.as_str());
        store.set_room_attribute(keys::COUNT_DOWN_STATE, self.status.count_down.as_str());
        store.set_room_attribute(keys::CURR_COUNT_DOWN, &format_number(self.status.counter));
    }
}

/// Picks the top scorer; a shared maximum is a tie listing every tied id.
/// No positive score means no winner.
pub fn winner_from_scores<'a>(scores: impl IntoIterator<Item = (&'a str, u32)>) -> Winner {
    let mut by_score: BTreeMap<u32, Vec<String>> = BTreeMap::new();
    for (id, score) in scores {
        if score > 0 {
            by_score.entry(score).or_default().push(id.to_string());
        }
    }

    let Some((score, mut ids)) = by_score.pop_last() else {
        return Winner::default();
    };
    ids.sort();

    if ids.len() > 1 {
        Winner {
            id: String::new(),
            score,
            tie: true,
            tied: ids,
        }
    } else {
        Winner {
            id: ids.remove(0),
            score,
            tie: false,
            tied: Vec::new(),
        }
    }
}
