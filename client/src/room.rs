//! Client-side cache of the joined room
//!
//! `ClientRoom` applies every message the server sends and returns the
//! resulting [`ClientEvent`]s so callers react explicitly instead of through
//! registered listeners. It also builds the outgoing requests, since most of
//! them need cached state (the local user id, creation callbacks, ping time).

use crate::motion::{MotionMode, MotionReconciler, Transform};
use crate::proxy::ProxyBuffer;
use crate::rfc::RfcDispatcher;
use crate::state_mirror::{ClientGameState, StateMirror};
use log::{debug, error, info, warn};
use serde_json::Value;
use shared::game_state::Winner;
use shared::math::{Quat, Vec3};
use shared::model::{NetworkedEntity, NetworkedUser, READY, READY_STATE_KEY};
use shared::protocol::{
    AttributeUpdateMessage, ClientMessage, CustomMethodMessage, EntityCreationMessage,
    JoinRequest, RfcMessage, RfcTarget, RoomSnapshot, ScoreUpdate, StateChange,
};
use shared::ServerMessage;
use std::collections::HashMap;
use std::time::Instant;

/// Runs once when the server confirms an entity this client asked for
pub type CreationCallback = Box<dyn FnOnce(&NetworkedEntity) + Send>;

/// Something that changed in the cache after applying a server message
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Joined(NetworkedUser),
    JoinRejected(String),
    EntityAdded(String),
    EntityChanged(String),
    EntityRemoved(String),
    UserAdded(String),
    UserChanged(String),
    UserRemoved(String),
    GameStateChanged {
        from: ClientGameState,
        to: ClientGameState,
    },
    CountDownChanged(Option<String>),
    ScoreUpdated(ScoreUpdate),
    RoundCountDownStarted,
    RoundStarted,
    RoundEnded(Winner),
    RemoteCall {
        entity_id: String,
        function: String,
        handled: bool,
    },
    Pong {
        server_time: f64,
        rtt_ms: Option<f64>,
    },
}

#[derive(Default)]
pub struct ClientRoom {
    room_id: Option<String>,
    local_user: Option<NetworkedUser>,
    session_id: Option<String>,
    entities: HashMap<String, NetworkedEntity>,
    users: HashMap<String, NetworkedUser>,
    attributes: HashMap<String, String>,
    proxies: HashMap<String, ProxyBuffer>,
    pending_creations: HashMap<String, CreationCallback>,
    mirror: StateMirror,
    rfc: RfcDispatcher,

    server_time: f64,
    ping_sent_at: Option<Instant>,
    rtt_ms: Option<f64>,
}

impl ClientRoom {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn local_user(&self) -> Option<&NetworkedUser> {
        self.local_user.as_ref()
    }

    pub fn local_user_id(&self) -> Option<&str> {
        self.local_user.as_ref().map(|u| u.id.as_str())
    }

    /// Session id kept across abnormal disconnects for rejoining
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn is_joined(&self) -> bool {
        self.local_user.is_some()
    }

    pub fn entity(&self, id: &str) -> Option<&NetworkedEntity> {
        self.entities.get(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &NetworkedEntity> {
        self.entities.values()
    }

    pub fn user(&self, id: &str) -> Option<&NetworkedUser> {
        self.users.get(id)
    }

    pub fn users(&self) -> impl Iterator<Item = &NetworkedUser> {
        self.users.values()
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn owns(&self, entity_id: &str) -> bool {
        match (self.local_user_id(), self.entities.get(entity_id)) {
            (Some(me), Some(entity)) => entity.owner_id == me,
            _ => false,
        }
    }

    /// Ids of entities owned by the local user, sorted
    pub fn owned_entity_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entities
            .keys()
            .filter(|id| self.owns(id))
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn proxy(&self, entity_id: &str) -> Option<&ProxyBuffer> {
        self.proxies.get(entity_id)
    }

    pub fn mirror(&self) -> &StateMirror {
        &self.mirror
    }

    pub fn rfc_mut(&mut self) -> &mut RfcDispatcher {
        &mut self.rfc
    }

    pub fn pending_creations(&self) -> usize {
        self.pending_creations.len()
    }

    /// Estimated server time in milliseconds
    pub fn server_time(&self) -> f64 {
        self.server_time
    }

    pub fn rtt_ms(&self) -> Option<f64> {
        self.rtt_ms
    }

    /// Advances the server time estimate between pongs
    pub fn advance_server_time(&mut self, dt_ms: f64) {
        self.server_time += dt_ms;
    }

    pub fn apply(&mut self, message: ServerMessage, now: Instant) -> Vec<ClientEvent> {
        let mut events = Vec::new();

        match message {
            ServerMessage::Pong(reply) => {
                self.server_time = reply.server_time;
                if let Some(sent) = self.ping_sent_at.take() {
                    self.rtt_ms = Some(now.duration_since(sent).as_secs_f64() * 1000.0);
                }
                events.push(ClientEvent::Pong {
                    server_time: reply.server_time,
                    rtt_ms: self.rtt_ms,
                });
            }
            ServerMessage::OnJoin(user) => {
                info!("Joined as {}", user.id);
                self.session_id = Some(user.session_id.clone());
                self.local_user = Some(user.clone());
                events.push(ClientEvent::Joined(user));
            }
            ServerMessage::JoinRejected { reason } => {
                warn!("Join rejected: {}", reason);
                self.session_id = None;
                events.push(ClientEvent::JoinRejected(reason));
            }
            ServerMessage::StateSnapshot(snapshot) => {
                self.apply_snapshot(snapshot, &mut events);
                self.refresh_mirror(&mut events);
            }
            ServerMessage::StatePatch(changes) => {
                let mut attributes_touched = false;
                for change in changes {
                    attributes_touched |= matches!(change, StateChange::AttributeChanged { .. });
                    self.apply_change(change, &mut events);
                }
                if attributes_touched {
                    self.refresh_mirror(&mut events);
                }
            }
            ServerMessage::OnRfc(envelope) => {
                let handled = match self.rfc.dispatch(&envelope) {
                    Ok(handled) => handled,
                    Err(e) => {
                        error!("RFC from {:?} failed: {}", envelope.client_id, e);
                        false
                    }
                };
                events.push(ClientEvent::RemoteCall {
                    entity_id: envelope.entity_id,
                    function: envelope.function,
                    handled,
                });
            }
            ServerMessage::OnScoreUpdate(update) => {
                debug!("{} scored on {} ({})", update.entity_id, update.target_id, update.score);
                events.push(ClientEvent::ScoreUpdated(update));
            }
            ServerMessage::BeginRoundCountDown => events.push(ClientEvent::RoundCountDownStarted),
            ServerMessage::BeginRound => events.push(ClientEvent::RoundStarted),
            ServerMessage::OnRoundEnd(end) => {
                info!("Round ended, winner {:?}", end.winner);
                events.push(ClientEvent::RoundEnded(end.winner));
            }
        }

        events
    }

    fn apply_snapshot(&mut self, snapshot: RoomSnapshot, events: &mut Vec<ClientEvent>) {
        self.room_id = Some(snapshot.room_id);
        self.server_time = snapshot.server_time;

        let mut stale: Vec<String> = self
            .entities
            .keys()
            .filter(|id| !snapshot.entities.iter().any(|e| &e.id == *id))
            .cloned()
            .collect();
        stale.sort();
        for id in stale {
            self.remove_entity_local(&id, events);
        }

        for entity in snapshot.entities {
            if self.entities.contains_key(&entity.id) {
                self.change_entity(entity, events);
            } else {
                self.add_entity(entity, events);
            }
        }

        self.users.clear();
        for user in snapshot.users {
            self.store_user(user, events, true);
        }
        self.attributes = snapshot.attributes;
    }

    fn apply_change(&mut self, change: StateChange, events: &mut Vec<ClientEvent>) {
        match change {
            StateChange::EntityAdded(entity) => self.add_entity(entity, events),
            StateChange::EntityChanged(entity) => self.change_entity(entity, events),
            StateChange::EntityRemoved { id } => self.remove_entity_local(&id, events),
            StateChange::UserAdded(user) => self.store_user(user, events, true),
            StateChange::UserChanged(user) => self.store_user(user, events, false),
            StateChange::UserRemoved { id } => {
                if self.users.remove(&id).is_some() {
                    events.push(ClientEvent::UserRemoved(id));
                }
            }
            StateChange::AttributeChanged { key, value } => {
                self.attributes.insert(key, value);
            }
        }
    }

    fn add_entity(&mut self, entity: NetworkedEntity, events: &mut Vec<ClientEvent>) {
        let owned = self.local_user_id() == Some(entity.owner_id.as_str());
        if owned {
            if let Some(callback) = entity
                .creation_id
                .as_deref()
                .and_then(|creation_id| self.pending_creations.remove(creation_id))
            {
                callback(&entity);
            }
        } else {
            self.proxies.entry(entity.id.clone()).or_default().push_entity(&entity);
        }

        let id = entity.id.clone();
        self.entities.insert(id.clone(), entity);
        events.push(ClientEvent::EntityAdded(id));
    }

    fn change_entity(&mut self, entity: NetworkedEntity, events: &mut Vec<ClientEvent>) {
        if !self.entities.contains_key(&entity.id) {
            self.add_entity(entity, events);
            return;
        }
        if self.local_user_id() != Some(entity.owner_id.as_str()) {
            self.proxies.entry(entity.id.clone()).or_default().push_entity(&entity);
        }
        let id = entity.id.clone();
        self.entities.insert(id.clone(), entity);
        events.push(ClientEvent::EntityChanged(id));
    }

    fn remove_entity_local(&mut self, id: &str, events: &mut Vec<ClientEvent>) {
        self.proxies.remove(id);
        self.rfc.unbind(id);
        if self.entities.remove(id).is_some() {
            events.push(ClientEvent::EntityRemoved(id.to_string()));
        }
    }

    fn store_user(&mut self, user: NetworkedUser, events: &mut Vec<ClientEvent>, added: bool) {
        if self.local_user_id() == Some(user.id.as_str()) {
            self.local_user = Some(user.clone());
        }
        let id = user.id.clone();
        let existed = self.users.insert(id.clone(), user).is_some();
        if added && !existed {
            events.push(ClientEvent::UserAdded(id));
        } else {
            events.push(ClientEvent::UserChanged(id));
        }
    }

    fn refresh_mirror(&mut self, events: &mut Vec<ClientEvent>) {
        let from = self.mirror.current();
        let update = self.mirror.apply_room_attributes(&self.attributes);
        if update.state_changed {
            events.push(ClientEvent::GameStateChanged {
                from,
                to: self.mirror.current(),
            });
        }
        if update.count_down_changed {
            events.push(ClientEvent::CountDownChanged(
                self.mirror.count_down().map(str::to_string),
            ));
        }
    }

    /// Eases every remote entity's render transform toward its snapshots
    pub fn reconcile_remote(
        &self,
        reconciler: &MotionReconciler,
        transforms: &mut HashMap<String, Transform>,
        dt_secs: f32,
    ) -> HashMap<String, MotionMode> {
        transforms.retain(|id, _| self.proxies.contains_key(id));

        let mut modes = HashMap::with_capacity(self.proxies.len());
        for (id, buffer) in &self.proxies {
            // New render transforms start at the oldest known pose
            let transform = transforms.entry(id.clone()).or_insert_with(|| {
                buffer
                    .oldest()
                    .map(|s| Transform::new(s.position, s.rotation))
                    .unwrap_or(Transform::new(Vec3::ZERO, Quat::IDENTITY))
            });
            let mode = reconciler.reconcile(transform, buffer, self.server_time, dt_secs);
            modes.insert(id.clone(), mode);
        }
        modes
    }

    pub fn join_request(&self, options: HashMap<String, Value>) -> ClientMessage {
        ClientMessage::Join(JoinRequest {
            session_id: self.session_id.clone(),
            options,
        })
    }

    pub fn ping(&mut self, now: Instant) -> ClientMessage {
        self.ping_sent_at = Some(now);
        ClientMessage::Ping
    }

    /// Builds a `createEntity` request seeded with a transform. The callback
    /// fires when the matching entity arrives and is dropped on `leave`.
    pub fn create_entity(
        &mut self,
        position: Vec3,
        rotation: Quat,
        mut attributes: HashMap<String, Value>,
        callback: Option<CreationCallback>,
    ) -> ClientMessage {
        let creation_id = shared::generate_id();
        attributes.insert(
            "creationPos".into(),
            Value::from(vec![position.x as f64, position.y as f64, position.z as f64]),
        );
        attributes.insert(
            "creationRot".into(),
            Value::from(vec![
                rotation.x as f64,
                rotation.y as f64,
                rotation.z as f64,
                rotation.w as f64,
            ]),
        );
        if let Some(callback) = callback {
            self.pending_creations.insert(creation_id.clone(), callback);
        }

        ClientMessage::CreateEntity(EntityCreationMessage {
            creation_id: Some(creation_id),
            attributes,
        })
    }

    pub fn set_entity_attributes(
        &self,
        entity_id: &str,
        attributes: HashMap<String, Value>,
    ) -> ClientMessage {
        ClientMessage::SetAttribute(AttributeUpdateMessage {
            entity_id: Some(entity_id.to_string()),
            attributes_to_set: Some(attributes),
            ..Default::default()
        })
    }

    /// `None` until joined
    pub fn set_user_attributes(&self, attributes: HashMap<String, Value>) -> Option<ClientMessage> {
        let user_id = self.local_user_id()?;
        Some(ClientMessage::SetAttribute(AttributeUpdateMessage {
            user_id: Some(user_id.to_string()),
            attributes_to_set: Some(attributes),
            ..Default::default()
        }))
    }

    /// Marks the local user ready for the next round
    pub fn ready_up(&mut self) -> Option<ClientMessage> {
        let message = self.set_user_attributes(HashMap::from([(
            READY_STATE_KEY.to_string(),
            Value::from(READY),
        )]))?;
        self.mirror.set_locally_ready(true);
        Some(message)
    }

    pub fn remove_entity(&self, entity_id: &str) -> ClientMessage {
        ClientMessage::RemoveEntity(entity_id.to_string())
    }

    pub fn remote_call(
        &self,
        entity_id: &str,
        function: &str,
        param: Vec<Value>,
        target: RfcTarget,
    ) -> ClientMessage {
        ClientMessage::RemoteFunctionCall(RfcMessage {
            entity_id: entity_id.to_string(),
            function: function.to_string(),
            param,
            target,
            client_id: None,
        })
    }

    pub fn custom_method(&self, method: &str, param: Vec<Value>) -> ClientMessage {
        ClientMessage::CustomMethod(CustomMethodMessage {
            method: method.to_string(),
            param,
        })
    }

    /// Consented leave: forgets the session and drops every cached record
    /// and pending creation callback
    pub fn leave(&mut self) -> ClientMessage {
        info!("Leaving room {:?}", self.room_id);
        self.session_id = None;
        self.reset();
        ClientMessage::Leave
    }

    /// Drops cached state after an abnormal close, keeping the session id
    /// so the next join resumes the same identity
    pub fn reset_for_rejoin(&mut self) {
        self.reset();
    }

    fn reset(&mut self) {
        self.room_id = None;
        self.local_user = None;
        self.entities.clear();
        self.users.clear();
        self.attributes.clear();
        self.proxies.clear();
        self.pending_creations.clear();
        self.rfc.clear();
        self.mirror = StateMirror::new();
        self.ping_sent_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::protocol::PingReply;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn user(id: &str) -> NetworkedUser {
        NetworkedUser::new(id.into(), id.into(), 0.0)
    }

    fn entity(id: &str, owner: &str, x: f32, timestamp: f64) -> NetworkedEntity {
        let mut entity = NetworkedEntity::new(id.into(), owner.into(), timestamp);
        entity.set_position(Vec3::new(x, 0.0, 0.0));
        entity
    }

    fn joined_room() -> ClientRoom {
        let mut room = ClientRoom::new();
        let now = Instant::now();
        room.apply(ServerMessage::OnJoin(user("me")), now);
        room.apply(
            ServerMessage::StateSnapshot(RoomSnapshot {
                room_id: "arena".into(),
                server_time: 500.0,
                entities: vec![entity("mine", "me", 0.0, 100.0), entity("theirs", "them", 1.0, 100.0)],
                users: vec![user("me"), user("them")],
                attributes: HashMap::from([("currentGameState".to_string(), "Waiting".to_string())]),
            }),
            now,
        );
        room
    }

    #[test]
    fn test_join_and_snapshot() {
        let room = joined_room();
        assert_eq!(room.room_id(), Some("arena"));
        assert_eq!(room.session_id(), Some("me"));
        assert_eq!(room.server_time(), 500.0);
        assert!(room.owns("mine"));
        assert!(!room.owns("theirs"));
        assert_eq!(room.owned_entity_ids(), vec!["mine".to_string()]);
        assert_eq!(room.mirror().current(), ClientGameState::Waiting);

        // Only remote entities get a proxy buffer
        assert!(room.proxy("mine").is_none());
        assert_eq!(room.proxy("theirs").unwrap().len(), 1);
    }

    #[test]
    fn test_patch_feeds_proxy_and_events() {
        let mut room = joined_room();
        let events = room.apply(
            ServerMessage::StatePatch(vec![
                StateChange::EntityChanged(entity("theirs", "them", 2.0, 150.0)),
                StateChange::EntityRemoved { id: "mine".into() },
            ]),
            Instant::now(),
        );

        assert_eq!(
            events,
            vec![
                ClientEvent::EntityChanged("theirs".into()),
                ClientEvent::EntityRemoved("mine".into()),
            ]
        );
        let buffer = room.proxy("theirs").unwrap();
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.newest().unwrap().timestamp, 150.0);
        assert!(room.entity("mine").is_none());
    }

    #[test]
    fn test_game_state_change_event() {
        let mut room = joined_room();
        let events = room.apply(
            ServerMessage::StatePatch(vec![
                StateChange::AttributeChanged {
                    key: "currentGameState".into(),
                    value: "BeginRound".into(),
                },
                StateChange::AttributeChanged {
                    key: "countDown".into(),
                    value: "Get Ready!".into(),
                },
            ]),
            Instant::now(),
        );

        assert!(events.contains(&ClientEvent::GameStateChanged {
            from: ClientGameState::Waiting,
            to: ClientGameState::BeginRound,
        }));
        assert!(events.contains(&ClientEvent::CountDownChanged(Some("Get Ready!".into()))));
    }

    #[test]
    fn test_creation_callback_fires_once() {
        let mut room = joined_room();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        let request = room.create_entity(
            Vec3::new(1.0, 2.0, 3.0),
            Quat::IDENTITY,
            HashMap::new(),
            Some(Box::new(move |entity: &NetworkedEntity| {
                assert_eq!(entity.id, "new");
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );
        let creation_id = match request {
            ClientMessage::CreateEntity(message) => {
                assert_eq!(message.attributes["creationPos"], serde_json::json!([1.0, 2.0, 3.0]));
                message.creation_id.unwrap()
            }
            other => panic!("Unexpected request: {:?}", other),
        };
        assert_eq!(room.pending_creations(), 1);

        let mut created = entity("new", "me", 1.0, 200.0);
        created.creation_id = Some(creation_id);
        room.apply(
            ServerMessage::StatePatch(vec![StateChange::EntityAdded(created.clone())]),
            Instant::now(),
        );
        room.apply(
            ServerMessage::StatePatch(vec![StateChange::EntityChanged(created)]),
            Instant::now(),
        );

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(room.pending_creations(), 0);
    }

    #[test]
    fn test_leave_clears_everything() {
        let mut room = joined_room();
        room.create_entity(Vec3::ZERO, Quat::IDENTITY, HashMap::new(), Some(Box::new(|_: &NetworkedEntity| {})));

        assert_eq!(room.leave(), ClientMessage::Leave);
        assert!(!room.is_joined());
        assert_eq!(room.session_id(), None);
        assert_eq!(room.entities().count(), 0);
        assert_eq!(room.users().count(), 0);
        assert_eq!(room.pending_creations(), 0);
        assert!(room.proxy("theirs").is_none());
    }

    #[test]
    fn test_rejoin_keeps_session() {
        let mut room = joined_room();
        room.reset_for_rejoin();

        match room.join_request(HashMap::new()) {
            ClientMessage::Join(request) => assert_eq!(request.session_id.as_deref(), Some("me")),
            other => panic!("Unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_ready_up_requires_join() {
        let mut room = ClientRoom::new();
        assert!(room.ready_up().is_none());

        let mut room = joined_room();
        match room.ready_up() {
            Some(ClientMessage::SetAttribute(update)) => {
                assert_eq!(update.user_id.as_deref(), Some("me"));
                assert_eq!(update.attributes_to_set.unwrap()["readyState"], "ready");
            }
            other => panic!("Unexpected request: {:?}", other),
        }
        assert_eq!(room.mirror().current(), ClientGameState::WaitingForOthers);
    }

    #[test]
    fn test_pong_resets_server_time_and_tracks_rtt() {
        let mut room = joined_room();
        let sent = Instant::now();
        room.ping(sent);
        room.advance_server_time(1000.0);
        assert_eq!(room.server_time(), 1500.0);

        let events = room.apply(
            ServerMessage::Pong(PingReply { server_time: 1200.0 }),
            sent + Duration::from_millis(40),
        );

        assert_eq!(room.server_time(), 1200.0);
        let rtt = room.rtt_ms().unwrap();
        assert!((rtt - 40.0).abs() < 1.0);
        assert!(matches!(events[0], ClientEvent::Pong { server_time, .. } if server_time == 1200.0));
    }

    #[test]
    fn test_reconcile_remote_moves_toward_snapshot() {
        let mut room = joined_room();
        room.apply(
            ServerMessage::StatePatch(vec![StateChange::EntityChanged(entity(
                "theirs", "them", 10.0, 600.0,
            ))]),
            Instant::now(),
        );

        let mut transforms = HashMap::new();
        let modes = room.reconcile_remote(&MotionReconciler::default(), &mut transforms, 0.05);

        assert_eq!(modes["theirs"], MotionMode::Interpolating);
        let x = transforms["theirs"].position.x;
        assert!(x > 1.0 && x < 10.0);
        assert!(!transforms.contains_key("mine"));
    }
}
