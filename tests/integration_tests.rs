//! Integration tests for the room server and client caches
//!
//! These tests drive a server `Room` and one or more `ClientRoom`s together,
//! routing messages in-process, plus a few runs over real loopback sockets.

use client::room::{ClientEvent, ClientRoom};
use client::state_mirror::ClientGameState;
use serde_json::json;
use server::client_manager::ConnId;
use server::config::RoomOptions;
use server::room::Room;
use shared::game_state::ServerGameState;
use shared::math::{Quat, Vec3};
use shared::protocol::ScoreUpdate;
use shared::{ClientMessage, ServerMessage};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// Routes messages between one server room and in-process client caches
struct Harness {
    room: Room,
    clients: BTreeMap<ConnId, ClientRoom>,
    now: Instant,
}

impl Harness {
    fn new() -> Self {
        Self {
            room: Room::new(RoomOptions {
                room_id: Some("arena".into()),
                ..RoomOptions::default()
            }),
            clients: BTreeMap::new(),
            now: Instant::now(),
        }
    }

    fn connect(&mut self, conn: ConnId) -> Vec<(ConnId, ClientEvent)> {
        let client = ClientRoom::new();
        let join = client.join_request(HashMap::new());
        self.clients.insert(conn, client);
        self.send(conn, join)
    }

    fn send(&mut self, conn: ConnId, message: ClientMessage) -> Vec<(ConnId, ClientEvent)> {
        if let Err(e) = self.room.handle_message(conn, message, self.now) {
            panic!("Room rejected message from {}: {}", conn, e);
        }
        self.pump()
    }

    fn pump(&mut self) -> Vec<(ConnId, ClientEvent)> {
        let mut events = Vec::new();
        for (conn, message) in self.room.take_outgoing() {
            if let Some(client) = self.clients.get_mut(&conn) {
                for event in client.apply(message, self.now) {
                    events.push((conn, event));
                }
            }
        }
        events
    }

    fn flush(&mut self) -> Vec<(ConnId, ClientEvent)> {
        self.room.flush_replication();
        self.pump()
    }

    fn step(&mut self, dt_ms: u64) -> Vec<(ConnId, ClientEvent)> {
        self.now += Duration::from_millis(dt_ms);
        self.room.tick(dt_ms as f64);
        self.flush()
    }

    fn client(&mut self, conn: ConnId) -> &mut ClientRoom {
        self.clients.get_mut(&conn).expect("client connected")
    }

    fn spawn_avatar(&mut self, conn: ConnId, x: f32) -> String {
        let request = self.client(conn).create_entity(
            Vec3::new(x, 0.0, 0.0),
            Quat::IDENTITY,
            HashMap::from([("kills".to_string(), json!(0))]),
            None,
        );
        self.send(conn, request);
        self.flush();
        self.client(conn).owned_entity_ids()[0].clone()
    }
}

/// ROUND LIFECYCLE TESTS
mod round_tests {
    use super::*;

    /// Two ready players play a round to completion and the room resets
    #[test]
    fn full_round_lifecycle() {
        let mut h = Harness::new();
        h.connect(1);
        h.connect(2);
        let e1 = h.spawn_avatar(1, 0.0);
        let e2 = h.spawn_avatar(2, 5.0);

        // Remote avatars are buffered for interpolation on the other side
        assert!(h.client(2).proxy(&e1).is_some());
        assert!(h.client(1).proxy(&e1).is_none());

        h.step(16);
        assert_eq!(h.room.round().current(), ServerGameState::Waiting);

        for conn in [1, 2] {
            let ready = h.client(conn).ready_up().unwrap();
            h.send(conn, ready);
        }
        assert_eq!(h.client(1).mirror().current(), ClientGameState::WaitingForOthers);

        h.step(16);
        assert_eq!(h.room.round().current(), ServerGameState::BeginRound);
        assert!(h.room.context().admission.is_locked());

        let mut events = Vec::new();
        for _ in 0..40 {
            events.extend(h.step(500));
            if h.room.round().current() == ServerGameState::SimulateRound {
                break;
            }
        }
        assert_eq!(h.room.round().current(), ServerGameState::SimulateRound);
        assert!(events.contains(&(1, ClientEvent::RoundCountDownStarted)));
        assert!(events.contains(&(2, ClientEvent::RoundStarted)));

        let shown: Vec<String> = events
            .iter()
            .filter_map(|(conn, event)| match event {
                ClientEvent::CountDownChanged(Some(text)) if *conn == 1 => Some(text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(shown, vec!["Get Ready!", "3", "2", "1"]);

        for conn in [1, 2] {
            assert_eq!(h.client(conn).mirror().current(), ClientGameState::SimulateRound);
            let me = h.client(conn).local_user_id().unwrap().to_string();
            let user = h.client(conn).user(&me).unwrap().clone();
            assert_eq!(user.attributes["readyState"], "waiting");
        }

        let hit = h
            .client(1)
            .custom_method("hitPlayer", vec![json!(e1.clone()), json!(e2.clone())]);
        let events = h.send(1, hit);
        let expected = ScoreUpdate {
            entity_id: e1.clone(),
            target_id: e2.clone(),
            score: 1,
        };
        assert!(events.contains(&(2, ClientEvent::ScoreUpdated(expected))));

        h.step(16);
        assert_eq!(h.room.round().current(), ServerGameState::EndRound);
        let events = h.step(16);
        assert_eq!(h.room.round().current(), ServerGameState::Waiting);

        let winner = events
            .iter()
            .find_map(|(conn, event)| match event {
                ClientEvent::RoundEnded(winner) if *conn == 2 => Some(winner.clone()),
                _ => None,
            })
            .expect("round end broadcast");
        assert_eq!(winner.id, e1);
        assert_eq!(winner.score, 1);
        assert!(!winner.tie);

        assert!(!h.room.context().admission.is_locked());
        assert_eq!(h.client(1).mirror().current(), ClientGameState::Waiting);
        assert!(h.client(1).mirror().awaiting_player_ready());
    }

    /// A player leaving mid-round ends it in the survivor's favour and reopens the room
    #[test]
    fn leaving_during_round_ends_it() {
        let mut h = Harness::new();
        h.connect(1);
        h.connect(2);
        let e1 = h.spawn_avatar(1, 0.0);
        h.spawn_avatar(2, 5.0);

        for conn in [1, 2] {
            let ready = h.client(conn).ready_up().unwrap();
            h.send(conn, ready);
        }
        for _ in 0..40 {
            h.step(500);
            if h.room.round().current() == ServerGameState::SimulateRound {
                break;
            }
        }
        assert_eq!(h.room.round().current(), ServerGameState::SimulateRound);
        assert!(h.room.context().admission.is_locked());

        h.send(2, ClientMessage::Leave);
        h.clients.remove(&2);

        let mut events = h.step(16);
        assert_eq!(h.room.round().current(), ServerGameState::EndRound);
        events.extend(h.step(16));
        assert_eq!(h.room.round().current(), ServerGameState::Waiting);

        let winner = events
            .iter()
            .find_map(|(conn, event)| match event {
                ClientEvent::RoundEnded(winner) if *conn == 1 => Some(winner.clone()),
                _ => None,
            })
            .expect("round end broadcast");
        assert_eq!(winner.id, e1);
        assert_eq!(winner.score, 0);
        assert!(!winner.tie);

        assert!(!h.room.context().admission.is_locked());
        assert_eq!(h.client(1).mirror().current(), ClientGameState::Waiting);

        // The reopened room admits a new player
        h.connect(3);
        assert!(h.client(3).is_joined());
    }

    /// The lobby reports how many players are still missing
    #[test]
    fn waiting_message_counts_players() {
        let mut h = Harness::new();
        h.connect(1);
        h.step(16);

        assert_eq!(
            h.client(1).mirror().general_message(),
            "Waiting for more players to join - (1/2)"
        );

        h.connect(2);
        h.step(16);
        assert_eq!(h.client(2).mirror().general_message(), "");
    }

    /// Both scores equal at the top produce a tie listing every tied id
    #[test]
    fn winner_selection() {
        let tie = server::round::winner_from_scores([("A", 3), ("B", 5), ("C", 5)]);
        assert!(tie.tie);
        assert_eq!(tie.tied, vec!["B".to_string(), "C".to_string()]);
        assert_eq!(tie.score, 5);

        let clear = server::round::winner_from_scores([("A", 3), ("B", 5), ("C", 2)]);
        assert_eq!(clear.id, "B");
        assert!(!clear.tie);
    }
}

/// RECONNECTION TESTS
mod reconnection_tests {
    use super::*;

    /// A dropped client resumes its identity and entities within the grace window
    #[test]
    fn resume_within_grace_keeps_entities() {
        let mut h = Harness::new();
        h.connect(1);
        let avatar = h.spawn_avatar(1, 1.0);
        let user_id = h.client(1).local_user_id().unwrap().to_string();

        let now = h.now;
        h.room.on_leave(1, false, now);
        let mut client = h.clients.remove(&1).unwrap();
        client.reset_for_rejoin();
        h.clients.insert(7, client);

        h.now += Duration::from_secs(5);
        let now = h.now;
        h.room.expire_reconnections(now);
        let join = h.client(7).join_request(HashMap::new());
        let events = h.send(7, join);

        assert!(events
            .iter()
            .any(|(conn, e)| *conn == 7 && matches!(e, ClientEvent::Joined(u) if u.id == user_id)));
        assert_eq!(h.client(7).owned_entity_ids(), vec![avatar.clone()]);
        assert!(h.room.context().store.user(&user_id).unwrap().connected);
    }

    /// Expiry removes the user and their entities and reopens a locked room
    #[test]
    fn expiry_removes_user_and_unlocks() {
        let mut room = Room::new(RoomOptions::default());
        let now = Instant::now();
        room.handle_message(1, ClientMessage::Join(Default::default()), now)
            .unwrap();
        room.handle_message(2, ClientMessage::Join(Default::default()), now)
            .unwrap();
        let leaver = room.user_for(2).unwrap().to_string();
        room.handle_message(
            2,
            ClientMessage::CreateEntity(Default::default()),
            now,
        )
        .unwrap();
        room.context_mut().admission.lock();

        room.on_leave(2, false, now);
        room.expire_reconnections(now + Duration::from_secs(5));
        assert!(room.context().store.user(&leaver).is_some());
        assert_eq!(room.context().store.entity_count(), 1);

        room.expire_reconnections(now + Duration::from_secs(11));
        assert!(room.context().store.user(&leaver).is_none());
        assert_eq!(room.context().store.entity_count(), 0);
        assert!(!room.context().admission.is_locked());
    }

    /// Reconnection bypasses the lock that keeps new players out
    #[test]
    fn resume_allowed_while_locked() {
        let mut room = Room::new(RoomOptions::default());
        let now = Instant::now();
        room.handle_message(1, ClientMessage::Join(Default::default()), now)
            .unwrap();
        let user_id = room.user_for(1).unwrap().to_string();
        room.context_mut().admission.lock();
        room.on_leave(1, false, now);
        room.take_outgoing();

        room.handle_message(
            9,
            ClientMessage::Join(shared::protocol::JoinRequest {
                session_id: Some("someone-else".into()),
                options: HashMap::new(),
            }),
            now,
        )
        .unwrap();
        room.handle_message(
            10,
            ClientMessage::Join(shared::protocol::JoinRequest {
                session_id: Some(user_id.clone()),
                options: HashMap::new(),
            }),
            now + Duration::from_secs(2),
        )
        .unwrap();

        let out = room.take_outgoing();
        assert!(out
            .iter()
            .any(|(conn, m)| *conn == 9 && matches!(m, ServerMessage::JoinRejected { .. })));
        assert!(out
            .iter()
            .any(|(conn, m)| *conn == 10 && matches!(m, ServerMessage::OnJoin(u) if u.id == user_id)));
    }
}

/// OWNERSHIP AND RELAY TESTS
mod ownership_tests {
    use super::*;
    use client::rfc::{BoundView, RfcRegistry};
    use server::error::RoomError;
    use shared::protocol::RfcTarget;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// `inc` adds to the stored attribute and the result replicates
    #[test]
    fn inc_attribute_replicates() {
        let mut h = Harness::new();
        h.connect(1);
        h.connect(2);
        let avatar = h.spawn_avatar(1, 0.0);

        let set = h.client(1).set_entity_attributes(
            &avatar,
            HashMap::from([("kills".to_string(), json!("5"))]),
        );
        h.send(1, set);
        h.send(
            1,
            ClientMessage::EntityUpdate(vec![
                json!(avatar.clone()),
                json!("attributes"),
                json!("kills"),
                json!("inc"),
                json!("3"),
            ]),
        );
        h.flush();

        assert_eq!(h.client(2).entity(&avatar).unwrap().attributes["kills"], "8");
    }

    /// Records created before a join and removed after it vanish on the joiner too
    #[test]
    fn removal_reaches_client_joined_mid_window() {
        let mut h = Harness::new();
        h.connect(1);
        let owner = h.client(1).local_user_id().unwrap().to_string();
        let request = h
            .client(1)
            .create_entity(Vec3::ZERO, Quat::IDENTITY, HashMap::new(), None);
        h.send(1, request);
        h.connect(3);
        let visitor = h.client(3).local_user_id().unwrap().to_string();

        h.connect(2);
        let entity_id = h.room.context().store.entities_owned_by(&owner)[0].clone();
        assert!(h.client(1).entity(&entity_id).is_some());
        assert!(h.client(2).entity(&entity_id).is_some());
        assert!(h.client(2).user(&visitor).is_some());

        let remove = h.client(1).remove_entity(&entity_id);
        h.send(1, remove);
        h.send(3, ClientMessage::Leave);
        h.clients.remove(&3);
        h.flush();

        assert!(!h.room.context().store.has_entity(&entity_id));
        for conn in [1, 2] {
            assert!(h.client(conn).entity(&entity_id).is_none());
            assert!(h.client(conn).proxy(&entity_id).is_none());
            assert!(h.client(conn).user(&visitor).is_none());
            assert_eq!(
                h.client(conn).users().count(),
                h.room.context().store.user_count()
            );
        }
    }

    /// Only the owner may move an entity
    #[test]
    fn non_owner_update_rejected() {
        let mut h = Harness::new();
        h.connect(1);
        h.connect(2);
        let avatar = h.spawn_avatar(1, 0.0);

        let result = h.room.handle_message(
            2,
            ClientMessage::EntityUpdate(vec![json!(avatar.clone()), json!("xPos"), json!(99.0)]),
            h.now,
        );
        assert!(matches!(result, Err(RoomError::NotOwner { .. })));
        assert_eq!(h.room.context().store.entity(&avatar).unwrap().position.x, 0.0);
    }

    /// Owner transform deltas reach other clients' proxy buffers
    #[test]
    fn owner_updates_feed_remote_proxy() {
        let mut h = Harness::new();
        h.connect(1);
        h.connect(2);
        let avatar = h.spawn_avatar(1, 0.0);

        h.send(
            1,
            ClientMessage::EntityUpdate(client::motion::change_list(
                &avatar,
                &[(shared::TransformField::XPos, 1.23456)],
            )),
        );
        h.step(50);

        let buffer = h.client(2).proxy(&avatar).unwrap();
        assert_eq!(buffer.newest().unwrap().position.x, 1.2346);
        assert_eq!(buffer.len(), 2);
    }

    /// RFCs reach bound views on other clients only, stamped with the sender
    #[test]
    fn rfc_relay_to_bound_views() {
        let mut h = Harness::new();
        h.connect(1);
        h.connect(2);
        let avatar = h.spawn_avatar(1, 0.0);

        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = RfcRegistry::new();
        let counter = Arc::clone(&calls);
        registry
            .register("FireGunRFC", move |_: &mut (), _: &[serde_json::Value]| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        let registry = Arc::new(registry);
        for conn in [1, 2] {
            h.client(conn)
                .rfc_mut()
                .bind(&avatar, Box::new(BoundView::new((), Arc::clone(&registry))));
        }

        let call = h
            .client(1)
            .remote_call(&avatar, "FireGunRFC", vec![json!(1)], RfcTarget::Others);
        let events = h.send(1, call);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            events,
            vec![(
                2,
                ClientEvent::RemoteCall {
                    entity_id: avatar.clone(),
                    function: "FireGunRFC".into(),
                    handled: true,
                }
            )]
        );

        // Calls naming unknown entities are dropped by the server
        let ghost = h
            .client(1)
            .remote_call("ghost", "FireGunRFC", vec![], RfcTarget::All);
        assert!(h.send(1, ghost).is_empty());
    }
}

/// NETWORK TESTS
mod network_tests {
    use super::*;
    use server::network::{LoopTiming, Server};
    use shared::codec::{read_frame, write_frame};
    use tokio::net::TcpStream;
    use tokio::time::timeout;

    async fn start_server() -> std::net::SocketAddr {
        let mut server = Server::new(
            "127.0.0.1:0",
            Room::new(RoomOptions::default()),
            LoopTiming::default(),
        )
        .await
        .unwrap();
        let addr = server.local_addr();
        tokio::spawn(async move {
            let _ = server.run().await;
        });
        addr
    }

    /// Join and ping over a real TCP connection
    #[tokio::test]
    async fn tcp_join_and_ping() {
        let addr = start_server().await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (mut reader, mut writer) = stream.into_split();

        write_frame(&mut writer, &ClientMessage::Join(Default::default()))
            .await
            .unwrap();

        let joined = timeout(Duration::from_secs(5), async {
            let first: Option<ServerMessage> = read_frame(&mut reader).await.unwrap();
            let second: Option<ServerMessage> = read_frame(&mut reader).await.unwrap();
            (first, second)
        })
        .await
        .unwrap();
        assert!(matches!(joined.0, Some(ServerMessage::OnJoin(_))));
        assert!(matches!(joined.1, Some(ServerMessage::StateSnapshot(_))));

        write_frame(&mut writer, &ClientMessage::Ping).await.unwrap();
        let pong = timeout(Duration::from_secs(5), async {
            loop {
                match read_frame::<_, ServerMessage>(&mut reader).await.unwrap() {
                    Some(ServerMessage::Pong(reply)) => return Some(reply),
                    Some(_) => continue,
                    None => return None,
                }
            }
        })
        .await
        .unwrap();
        assert!(pong.unwrap().server_time >= 0.0);
    }

    /// The headless client joins, plays briefly and leaves on shutdown
    #[tokio::test]
    async fn headless_client_session() {
        let addr = start_server().await;
        let settings = client::network::ClientSettings {
            server: addr.to_string(),
            ..Default::default()
        };
        let mut bot = client::network::Client::new(settings);

        let (stop, shutdown) = tokio::sync::watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let _ = stop.send(true);
        });

        let result = timeout(Duration::from_secs(10), bot.run(shutdown))
            .await
            .unwrap();
        assert!(result.is_ok());
        // The consented leave cleared the local cache
        assert!(!bot.room().is_joined());
    }
}
