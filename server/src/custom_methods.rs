//! Named server-side handlers invoked through `customMethod`

use crate::context::RoomContext;
use crate::error::RoomError;
use crate::round::RoundController;
use log::{debug, error};
use serde_json::Value;
use shared::protocol::{ScoreUpdate, ServerMessage};
use std::collections::HashMap;

/// Handler signature: room context, round state, calling user id, parameters
pub type CustomMethod =
    fn(&mut RoomContext, &mut RoundController, &str, &[Value]) -> Result<(), RoomError>;

pub struct CustomMethods {
    methods: HashMap<&'static str, CustomMethod>,
}

impl Default for CustomMethods {
    fn default() -> Self {
        let mut methods = Self::empty();
        methods.register("hitPlayer", hit_player);
        methods
    }
}

impl CustomMethods {
    fn empty() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &'static str, method: CustomMethod) {
        self.methods.insert(name, method);
    }

    pub fn process(
        &self,
        name: &str,
        ctx: &mut RoomContext,
        round: &mut RoundController,
        caller: &str,
        params: &[Value],
    ) -> Result<(), RoomError> {
        let method = self
            .methods
            .get(name)
            .ok_or_else(|| RoomError::UnknownMethod(name.to_string()))?;
        method(ctx, round, caller, params)
    }
}

/// `hitPlayer [entityID, targetID]`: scores a kill if the target is alive
fn hit_player(
    ctx: &mut RoomContext,
    round: &mut RoundController,
    _caller: &str,
    params: &[Value],
) -> Result<(), RoomError> {
    let (Some(entity_id), Some(target_id)) = (
        params.first().and_then(Value::as_str),
        params.get(1).and_then(Value::as_str),
    ) else {
        return Err(RoomError::InvalidParams {
            method: "hitPlayer".to_string(),
            reason: "expected [entityID, targetID]".to_string(),
        });
    };

    debug!("Shot from {} to {}", entity_id, target_id);

    if !ctx.store.has_entity(entity_id) {
        error!("No entity with id {}", entity_id);
        return Ok(());
    }
    if !ctx.store.has_entity(target_id) {
        debug!("No target entity with id {}", target_id);
        return Ok(());
    }

    match round.score_kill(entity_id, target_id) {
        Some(score) => ctx.broadcast(ServerMessage::OnScoreUpdate(ScoreUpdate {
            entity_id: entity_id.to_string(),
            target_id: target_id.to_string(),
            score,
        })),
        None => debug!("Target {} is already dead", target_id),
    }
    Ok(())
}
