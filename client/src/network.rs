use crate::error::ClientError;
use crate::input::BotInput;
use crate::motion::{MotionReconciler, MotionSettings, OwnedEntitySync, Transform};
use crate::rfc::{param_str, BoundView, RfcRegistry};
use crate::room::{ClientEvent, ClientRoom};
use crate::state_mirror::ClientGameState;
use log::{debug, info, warn};
use serde_json::Value;
use shared::codec::{read_frame, write_frame};
use shared::math::Quat;
use shared::model::NetworkedEntity;
use shared::protocol::RfcTarget;
use shared::{ClientMessage, ServerMessage};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep};

pub type NetworkResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const FIRE_FUNCTION: &str = "FireGunRFC";
const HIT_METHOD: &str = "hitPlayer";
const CLOCK_STEP: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub server: String,
    pub name: String,
    pub motion: MotionSettings,
    pub sync_interval_ms: u64,
    pub frame_rate: u32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server: "127.0.0.1:2567".to_string(),
            name: "bot".to_string(),
            motion: MotionSettings::default(),
            sync_interval_ms: shared::DEFAULT_SYNC_INTERVAL_MS,
            frame_rate: 60,
        }
    }
}

impl ClientSettings {
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate.max(1) as f64)
    }
}

/// View bound to every entity so remote weapon fire can be resolved
#[derive(Debug, Default)]
pub struct AvatarView {
    pub entity_id: String,
    pub shots_fired: u32,
}

fn avatar_registry() -> RfcRegistry<AvatarView> {
    let mut registry = RfcRegistry::new();
    let registered = registry.register(FIRE_FUNCTION, |view: &mut AvatarView, params: &[Value]| {
        let target = param_str(FIRE_FUNCTION, params, 0)?;
        view.shots_fired += 1;
        debug!("{} fired at {} ({} shots)", view.entity_id, target, view.shots_fired);
        Ok(())
    });
    if let Err(e) = registered {
        warn!("Could not register {}: {}", FIRE_FUNCTION, e);
    }
    registry
}

struct OwnedAvatar {
    entity: NetworkedEntity,
    sync: OwnedEntitySync,
}

/// Headless client: joins a room, spawns an avatar and plays rounds
pub struct Client {
    settings: ClientSettings,
    room: ClientRoom,
    reconciler: MotionReconciler,
    bot: BotInput,
    avatar_rfcs: Arc<RfcRegistry<AvatarView>>,

    owned: Option<OwnedAvatar>,
    avatar_requested: bool,
    render: HashMap<String, Transform>,
}

impl Client {
    pub fn new(settings: ClientSettings) -> Self {
        Self::with_bot(settings, BotInput::random())
    }

    pub fn with_bot(settings: ClientSettings, bot: BotInput) -> Self {
        Self {
            reconciler: MotionReconciler::new(settings.motion),
            settings,
            room: ClientRoom::new(),
            bot,
            avatar_rfcs: Arc::new(avatar_registry()),
            owned: None,
            avatar_requested: false,
            render: HashMap::new(),
        }
    }

    pub fn room(&self) -> &ClientRoom {
        &self.room
    }

    pub fn avatar_id(&self) -> Option<&str> {
        self.owned.as_ref().map(|a| a.entity.id.as_str())
    }

    /// Smoothed render transform of a remote entity
    pub fn render_transform(&self, entity_id: &str) -> Option<&Transform> {
        self.render.get(entity_id)
    }

    fn join_options(&self) -> HashMap<String, Value> {
        HashMap::from([("name".to_string(), Value::from(self.settings.name.clone()))])
    }

    /// Applies one server message and returns the requests it triggers
    pub fn handle_message(
        &mut self,
        message: ServerMessage,
        now: Instant,
    ) -> Result<Vec<ClientMessage>, ClientError> {
        let is_snapshot = matches!(message, ServerMessage::StateSnapshot(_));
        let mut outgoing = Vec::new();

        for event in self.room.apply(message, now) {
            match event {
                ClientEvent::JoinRejected(reason) => return Err(ClientError::JoinRejected(reason)),
                ClientEvent::EntityAdded(id) => self.on_entity_added(&id),
                ClientEvent::EntityRemoved(id) => {
                    if self.avatar_id() == Some(id.as_str()) {
                        warn!("Avatar {} was removed", id);
                        self.owned = None;
                        self.avatar_requested = false;
                    }
                }
                ClientEvent::GameStateChanged { from, to } => {
                    info!("Round phase {:?} -> {:?}", from, to);
                }
                ClientEvent::CountDownChanged(Some(text)) => info!("Countdown: {}", text),
                ClientEvent::ScoreUpdated(update) => info!(
                    "{} eliminated {}, score {}",
                    update.entity_id, update.target_id, update.score
                ),
                ClientEvent::RoundEnded(winner) => {
                    if winner.tie {
                        info!("Round tied between {:?} at {}", winner.tied, winner.score);
                    } else {
                        info!("Round won by {} with {}", winner.id, winner.score);
                    }
                }
                ClientEvent::RemoteCall {
                    entity_id,
                    function,
                    handled,
                } => debug!("RFC {} on {} handled: {}", function, entity_id, handled),
                _ => {}
            }
        }

        if is_snapshot && self.owned.is_none() && !self.avatar_requested {
            outgoing.push(self.spawn_avatar());
        }

        if self.room.mirror().awaiting_player_ready() {
            if let Some(ready) = self.room.ready_up() {
                info!("Ready for the next round");
                outgoing.push(ready);
            }
        }

        Ok(outgoing)
    }

    fn on_entity_added(&mut self, id: &str) {
        let view = AvatarView {
            entity_id: id.to_string(),
            shots_fired: 0,
        };
        self.room
            .rfc_mut()
            .bind(id, Box::new(BoundView::new(view, Arc::clone(&self.avatar_rfcs))));

        if self.owned.is_none() && self.room.owns(id) {
            if let Some(entity) = self.room.entity(id).cloned() {
                info!("Controlling avatar {}", entity.id);
                self.owned = Some(OwnedAvatar {
                    sync: OwnedEntitySync::new(&entity, self.settings.sync_interval_ms),
                    entity,
                });
            }
        }
    }

    fn spawn_avatar(&mut self) -> ClientMessage {
        self.avatar_requested = true;
        let attributes = HashMap::from([
            ("name".to_string(), Value::from(self.settings.name.clone())),
            ("kills".to_string(), Value::from(0)),
        ]);
        self.room.create_entity(
            self.bot.spawn_point(),
            Quat::IDENTITY,
            attributes,
            Some(Box::new(|entity: &NetworkedEntity| {
                info!("Avatar {} spawned at {:?}", entity.id, entity.position)
            })),
        )
    }

    /// Runs one client frame and returns the requests it produced
    pub fn frame(&mut self, dt_secs: f32) -> Vec<ClientMessage> {
        let mut outgoing = Vec::new();
        if !self.room.is_joined() {
            return outgoing;
        }

        // Respawn once the room state is known and the avatar is gone
        if self.owned.is_none() && !self.avatar_requested && self.room.room_id().is_some() {
            outgoing.push(self.spawn_avatar());
        }

        let targets: Vec<String> = if self.room.mirror().current() == ClientGameState::SimulateRound {
            let mut ids: Vec<String> = self
                .room
                .entities()
                .filter(|e| !self.room.owns(&e.id))
                .map(|e| e.id.clone())
                .collect();
            ids.sort();
            ids
        } else {
            Vec::new()
        };
        let intent = self.bot.update(dt_secs, &targets);

        if let Some(avatar) = self.owned.as_mut() {
            avatar.entity.set_position(intent.position);
            avatar.entity.rotation = intent.rotation;
            if let Some(changes) = avatar.sync.sample(&mut avatar.entity, dt_secs) {
                outgoing.push(ClientMessage::EntityUpdate(changes));
            }

            if let Some(target) = intent.fire_at {
                info!("Firing at {}", target);
                outgoing.push(self.room.remote_call(
                    &avatar.entity.id,
                    FIRE_FUNCTION,
                    vec![Value::from(target.clone())],
                    RfcTarget::Others,
                ));
                outgoing.push(self.room.custom_method(
                    HIT_METHOD,
                    vec![Value::from(avatar.entity.id.clone()), Value::from(target)],
                ));
            }
        }

        self.room
            .reconcile_remote(&self.reconciler, &mut self.render, dt_secs);
        outgoing
    }

    /// Plays until `shutdown` flips, rejoining after abnormal closes.
    /// A session ends cleanly only on a consented leave.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> NetworkResult<()> {
        let backoff = Duration::from_secs(shared::REJOIN_BACKOFF_SECS);

        while !*shutdown.borrow() {
            match self.run_session(&mut shutdown).await {
                Ok(()) => {
                    info!("Left the room");
                    return Ok(());
                }
                Err(e) => warn!("Session failed: {}, rejoining in {:?}", e, backoff),
            }

            self.room.reset_for_rejoin();
            self.owned = None;
            self.avatar_requested = false;
            self.render.clear();

            tokio::select! {
                _ = sleep(backoff) => {}
                _ = shutdown.changed() => break,
            }
        }

        Ok(())
    }

    async fn run_session(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), ClientError> {
        info!("Connecting to {}", self.settings.server);
        let stream = TcpStream::connect(&self.settings.server).await?;
        stream.set_nodelay(true)?;
        let (mut reader, mut writer) = stream.into_split();

        let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
        let reader_task = tokio::spawn(async move {
            loop {
                match read_frame::<_, ServerMessage>(&mut reader).await {
                    Ok(Some(message)) => {
                        if tx.send(message).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("Server closed the stream");
                        break;
                    }
                    Err(e) => {
                        warn!("Dropping connection after bad frame: {}", e);
                        break;
                    }
                }
            }
        });

        let result = self.drive_session(&mut writer, &mut rx, shutdown).await;
        reader_task.abort();
        result
    }

    async fn drive_session(
        &mut self,
        writer: &mut OwnedWriteHalf,
        rx: &mut mpsc::UnboundedReceiver<ServerMessage>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), ClientError> {
        let join = self.room.join_request(self.join_options());
        write_frame(writer, &join).await?;

        let mut frame = interval(self.settings.frame_duration());
        let mut ping = interval(Duration::from_millis(shared::PING_INTERVAL_MS));
        let mut clock = interval(CLOCK_STEP);
        let ping_timeout = Duration::from_secs(shared::PING_TIMEOUT_SECS);

        let mut last_frame = Instant::now();
        let mut last_clock = Instant::now();
        let mut last_pong = Instant::now();

        loop {
            let outgoing = tokio::select! {
                message = rx.recv() => {
                    let Some(message) = message else {
                        return Err(ClientError::ConnectionClosed);
                    };
                    let now = Instant::now();
                    if matches!(message, ServerMessage::Pong(_)) {
                        last_pong = now;
                    }
                    self.handle_message(message, now)?
                }
                _ = frame.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_frame).as_secs_f32();
                    last_frame = now;
                    self.frame(dt)
                }
                _ = ping.tick() => {
                    let now = Instant::now();
                    if now.duration_since(last_pong) > ping_timeout {
                        return Err(ClientError::PingTimeout(shared::PING_TIMEOUT_SECS));
                    }
                    vec![self.room.ping(now)]
                }
                _ = clock.tick() => {
                    let now = Instant::now();
                    let dt_ms = now.duration_since(last_clock).as_secs_f64() * 1000.0;
                    last_clock = now;
                    self.room.advance_server_time(dt_ms);
                    Vec::new()
                }
                _ = shutdown.changed() => {
                    write_frame(writer, &self.room.leave()).await?;
                    return Ok(());
                }
            };

            for message in outgoing {
                write_frame(writer, &message).await?;
            }
        }
    }
}
