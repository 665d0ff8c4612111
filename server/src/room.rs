//! A single arena room: message handlers, simulation tick and replication

use crate::client_manager::{ClientManager, ConnId};
use crate::config::RoomOptions;
use crate::context::{Outgoing, RoomContext};
use crate::custom_methods::CustomMethods;
use crate::error::RoomError;
use crate::replication::ReplicationChannel;
use crate::round::RoundController;
use log::{debug, info};
use shared::model::NetworkedUser;
use shared::protocol::{
    ClientMessage, JoinRequest, PingReply, RfcMessage, RfcTarget, ServerMessage,
};
use std::time::{Duration, Instant};

pub struct Room {
    id: String,
    options: RoomOptions,
    ctx: RoomContext,
    round: RoundController,
    clients: ClientManager,
    methods: CustomMethods,
    replication: ReplicationChannel,
}

impl Room {
    pub fn new(options: RoomOptions) -> Self {
        let id = options
            .room_id
            .clone()
            .unwrap_or_else(shared::generate_id);
        let mut ctx = RoomContext::new(options.max_clients);
        let round = RoundController::new(options.min_req_players);
        round.initialize(&mut ctx);

        info!(
            "Room {} created (min players {}, capacity {})",
            id, options.min_req_players, options.max_clients
        );

        Self {
            id,
            clients: ClientManager::new(options.reconnect_grace),
            options,
            ctx,
            round,
            methods: CustomMethods::default(),
            replication: ReplicationChannel::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn options(&self) -> &RoomOptions {
        &self.options
    }

    pub fn context(&self) -> &RoomContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut RoomContext {
        &mut self.ctx
    }

    pub fn round(&self) -> &RoundController {
        &self.round
    }

    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    pub fn server_time(&self) -> f64 {
        self.ctx.server_time
    }

    pub fn user_for(&self, conn: ConnId) -> Option<&str> {
        self.clients.user_of(conn)
    }

    /// Dispatches one client message. Errors are for the caller to log.
    pub fn handle_message(
        &mut self,
        conn: ConnId,
        message: ClientMessage,
        now: Instant,
    ) -> Result<(), RoomError> {
        self.clients.touch(conn, now);

        let message = match message {
            ClientMessage::Join(request) => {
                self.on_join(conn, request, now);
                return Ok(());
            }
            ClientMessage::Ping => {
                let server_time = self.ctx.server_time;
                self.ctx
                    .outbox
                    .send(conn, ServerMessage::Pong(PingReply { server_time }));
                return Ok(());
            }
            other => other,
        };

        let user_id = self
            .clients
            .user_of(conn)
            .ok_or(RoomError::NotJoined(conn))?
            .to_string();
        let now_ms = self.ctx.server_time;

        match message {
            ClientMessage::Leave => self.on_leave(conn, true, now),
            ClientMessage::CreateEntity(request) => {
                self.ctx.store.create_entity(&user_id, request, now_ms);
            }
            ClientMessage::EntityUpdate(changes) => {
                self.ctx.store.update_entity(&user_id, &changes, now_ms)?;
            }
            ClientMessage::SetAttribute(update) => {
                self.ctx.store.set_attribute(&update, now_ms);
            }
            ClientMessage::RemoveEntity(entity_id) => {
                if self.ctx.store.remove_entity(&entity_id).is_none() {
                    debug!("removeEntity: no entity {}", entity_id);
                }
            }
            ClientMessage::RemoteFunctionCall(rfc) => self.relay_rfc(conn, &user_id, rfc),
            ClientMessage::CustomMethod(request) => {
                self.methods.process(
                    &request.method,
                    &mut self.ctx,
                    &mut self.round,
                    &user_id,
                    &request.param,
                )?;
            }
            ClientMessage::Join(_) | ClientMessage::Ping => {}
        }
        Ok(())
    }

    /// Admits a connection as a new user or resumes a dropped session
    pub fn on_join(&mut self, conn: ConnId, request: JoinRequest, now: Instant) {
        if let Some(user_id) = self.clients.user_of(conn) {
            debug!("Connection {} already joined as {}", conn, user_id);
            return;
        }

        if let Some(session_id) = request.session_id.as_deref() {
            if self.clients.can_resume(session_id, now) && self.ctx.store.user(session_id).is_some()
            {
                info!("User {} reconnected on connection {}", session_id, conn);
                self.clients.bind(conn, session_id, now);
                self.ctx.store.set_user_connected(session_id, true);
                self.send_join_state(conn, session_id);
                return;
            }
            debug!("Session {} cannot be resumed, joining fresh", session_id);
        }

        if self.ctx.admission.is_locked() {
            self.reject(conn, "Room is locked");
            return;
        }
        if self.ctx.admission.is_full(self.ctx.store.user_count()) {
            self.reject(conn, "Room is full");
            return;
        }

        let user_id = loop {
            let id = shared::generate_id();
            if self.ctx.store.user(&id).is_none() {
                break id;
            }
        };
        info!("Client joined: {} on connection {}", user_id, conn);

        let user = NetworkedUser::new(user_id.clone(), user_id.clone(), self.ctx.server_time);
        self.ctx.store.add_user(user);
        self.clients.bind(conn, &user_id, now);
        self.send_join_state(conn, &user_id);
    }

    fn reject(&mut self, conn: ConnId, reason: &str) {
        info!("Rejecting join on connection {}: {}", conn, reason);
        self.ctx.outbox.send(
            conn,
            ServerMessage::JoinRejected {
                reason: reason.to_string(),
            },
        );
    }

    fn send_join_state(&mut self, conn: ConnId, user_id: &str) {
        // Connected clients catch up first, so the joiner's snapshot opens a
        // fresh patch window and later removals always reach it
        if let Some(patch) = self.replication.collect_patch(&mut self.ctx.store) {
            self.ctx.outbox.broadcast(patch, Some(conn));
        }
        if let Some(user) = self.ctx.store.user(user_id).cloned() {
            self.ctx.outbox.send(conn, ServerMessage::OnJoin(user));
        }
        let snapshot = self.ctx.store.snapshot(&self.id, self.ctx.server_time);
        self.ctx
            .outbox
            .send(conn, ServerMessage::StateSnapshot(snapshot));
    }

    /// Handles a connection going away. A consented leave removes the user at
    /// once; anything else opens the reconnection window.
    pub fn on_leave(&mut self, conn: ConnId, consented: bool, now: Instant) {
        let Some(user_id) = self.clients.unbind(conn) else {
            return;
        };
        self.ctx.store.set_user_connected(&user_id, false);

        if consented {
            info!("User {} left", user_id);
            self.remove_user(&user_id);
        } else {
            self.clients.begin_grace(&user_id, now);
        }
    }

    /// Removes users whose reconnection window has closed
    pub fn expire_reconnections(&mut self, now: Instant) {
        for user_id in self.clients.take_expired(now) {
            info!("Removing user {} and their entities", user_id);
            self.remove_user(&user_id);
        }
    }

    /// Treats connections silent for longer than `timeout` as dropped
    pub fn drop_idle(&mut self, timeout: Duration, now: Instant) -> Vec<ConnId> {
        let idle = self.clients.timed_out(timeout, now);
        for conn in &idle {
            info!("Connection {} timed out", conn);
            self.on_leave(*conn, false, now);
        }
        idle
    }

    fn remove_user(&mut self, user_id: &str) {
        self.ctx.store.remove_user(user_id);
        let removed = self.ctx.store.remove_entities_owned_by(user_id);
        debug!("Removed {} entities owned by {}", removed.len(), user_id);
        self.round.on_user_removed(&mut self.ctx);
    }

    fn relay_rfc(&mut self, conn: ConnId, user_id: &str, mut rfc: RfcMessage) {
        if !self.ctx.store.has_entity(&rfc.entity_id) {
            debug!("Dropping RFC {} for unknown entity {}", rfc.function, rfc.entity_id);
            return;
        }
        rfc.client_id = Some(user_id.to_string());
        let exclude = match rfc.target {
            RfcTarget::All => None,
            RfcTarget::Others => Some(conn),
        };
        self.ctx.outbox.broadcast(ServerMessage::OnRfc(rfc), exclude);
    }

    /// Advances server time and runs one round tick
    pub fn tick(&mut self, dt_ms: f64) {
        self.ctx.server_time += dt_ms;
        self.round.tick(&mut self.ctx, dt_ms / 1000.0);
    }

    /// Queues a `statePatch` with everything changed since the last flush
    pub fn flush_replication(&mut self) {
        if let Some(patch) = self.replication.collect_patch(&mut self.ctx.store) {
            self.ctx.outbox.broadcast(patch, None);
        }
    }

    /// Resolves queued messages to per-connection deliveries
    pub fn take_outgoing(&mut self) -> Vec<(ConnId, ServerMessage)> {
        let conns = self.clients.connections();
        let mut deliveries = Vec::new();

        for outgoing in self.ctx.outbox.drain() {
            match outgoing {
                Outgoing::Send { conn, message } => deliveries.push((conn, message)),
                Outgoing::Broadcast { message, exclude } => {
                    for conn in conns.iter().filter(|c| Some(**c) != exclude) {
                        deliveries.push((*conn, message.clone()));
                    }
                }
            }
        }
        deliveries
    }
}
