//! Server network layer: TCP connections feeding a single room loop

use crate::client_manager::ConnId;
use crate::room::Room;
use log::{debug, error, info, warn};
use shared::codec::{read_frame, write_frame};
use shared::protocol::{ClientMessage, ServerMessage};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant, MissedTickBehavior};

pub type NetworkResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Events sent from network tasks to the room loop
#[derive(Debug)]
pub enum RoomEvent {
    Connected {
        conn: ConnId,
        addr: SocketAddr,
        outgoing: mpsc::UnboundedSender<ServerMessage>,
    },
    MessageReceived {
        conn: ConnId,
        message: ClientMessage,
    },
    Disconnected {
        conn: ConnId,
    },
    /// Stops the room loop
    Shutdown,
}

/// Timing knobs for the room loop
#[derive(Debug, Clone, Copy)]
pub struct LoopTiming {
    pub tick: Duration,
    pub patch: Duration,
    /// Silence after which a connection counts as dropped
    pub idle_timeout: Duration,
}

impl Default for LoopTiming {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs_f64(1.0 / shared::DEFAULT_TICK_RATE_HZ as f64),
            patch: Duration::from_secs_f64(1.0 / shared::DEFAULT_PATCH_RATE_HZ as f64),
            idle_timeout: Duration::from_secs(shared::PING_TIMEOUT_SECS),
        }
    }
}

/// Owns the listener and the room, and runs the room's serialized loop
pub struct Server {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    room: Room,
    timing: LoopTiming,
    connections: HashMap<ConnId, mpsc::UnboundedSender<ServerMessage>>,

    events_tx: mpsc::UnboundedSender<RoomEvent>,
    events_rx: mpsc::UnboundedReceiver<RoomEvent>,
}

impl Server {
    pub async fn new(addr: &str, room: Room, timing: LoopTiming) -> NetworkResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on {}", local_addr);

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener: Some(listener),
            local_addr,
            room,
            timing,
            connections: HashMap::new(),
            events_tx,
            events_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Sender for injecting events into the room loop, e.g. `Shutdown`
    pub fn event_sender(&self) -> mpsc::UnboundedSender<RoomEvent> {
        self.events_tx.clone()
    }

    /// Spawns the task accepting connections and starting their reader/writer tasks
    fn spawn_acceptor(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let events_tx = self.events_tx.clone();

        tokio::spawn(async move {
            let mut next_conn: ConnId = 1;

            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                        }
                        let conn = next_conn;
                        next_conn = next_conn.wrapping_add(1);

                        let (reader, writer) = stream.into_split();
                        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();

                        if events_tx
                            .send(RoomEvent::Connected {
                                conn,
                                addr,
                                outgoing: outgoing_tx,
                            })
                            .is_err()
                        {
                            break;
                        }
                        Self::spawn_connection_reader(conn, reader, events_tx.clone());
                        Self::spawn_connection_writer(conn, writer, outgoing_rx);
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    fn spawn_connection_reader(
        conn: ConnId,
        mut reader: OwnedReadHalf,
        events_tx: mpsc::UnboundedSender<RoomEvent>,
    ) {
        tokio::spawn(async move {
            loop {
                match read_frame::<_, ClientMessage>(&mut reader).await {
                    Ok(Some(message)) => {
                        if events_tx
                            .send(RoomEvent::MessageReceived { conn, message })
                            .is_err()
                        {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Dropping connection {}: {}", conn, e);
                        break;
                    }
                }
            }
            let _ = events_tx.send(RoomEvent::Disconnected { conn });
        });
    }

    fn spawn_connection_writer(
        conn: ConnId,
        mut writer: OwnedWriteHalf,
        mut outgoing_rx: mpsc::UnboundedReceiver<ServerMessage>,
    ) {
        tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                if let Err(e) = write_frame(&mut writer, &message).await {
                    error!("Failed to send to connection {}: {}", conn, e);
                    break;
                }
            }
            debug!("Writer for connection {} finished", conn);
        });
    }

    fn handle_event(&mut self, event: RoomEvent) -> bool {
        match event {
            RoomEvent::Connected {
                conn,
                addr,
                outgoing,
            } => {
                info!("Connection {} opened from {}", conn, addr);
                self.connections.insert(conn, outgoing);
            }
            RoomEvent::MessageReceived { conn, message } => {
                let leaving = matches!(message, ClientMessage::Leave);
                if let Err(e) = self
                    .room
                    .handle_message(conn, message, std::time::Instant::now())
                {
                    error!("Error handling message from connection {}: {}", conn, e);
                }
                if leaving {
                    self.deliver();
                    self.connections.remove(&conn);
                }
            }
            RoomEvent::Disconnected { conn } => {
                info!("Connection {} closed", conn);
                self.connections.remove(&conn);
                self.room
                    .on_leave(conn, false, std::time::Instant::now());
            }
            RoomEvent::Shutdown => return false,
        }
        true
    }

    /// Hands queued room messages to the connection writers
    fn deliver(&mut self) {
        for (conn, message) in self.room.take_outgoing() {
            if let Some(outgoing) = self.connections.get(&conn) {
                if outgoing.send(message).is_err() {
                    debug!("Connection {} writer is gone", conn);
                }
            }
        }
    }

    /// Main room loop: network events, simulation ticks and patch broadcasts
    pub async fn run(&mut self) -> NetworkResult<()> {
        self.spawn_acceptor();

        let mut tick_interval = interval(self.timing.tick);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut patch_interval = interval(self.timing.patch);
        patch_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut housekeeping = interval(Duration::from_secs(1));

        let mut last_tick = Instant::now();

        info!("Room {} started", self.room.id());

        loop {
            tokio::select! {
                event = self.events_rx.recv() => {
                    match event {
                        Some(event) => {
                            if !self.handle_event(event) {
                                info!("Server shutting down");
                                break;
                            }
                        }
                        None => break,
                    }
                },

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt_ms = now.duration_since(last_tick).as_secs_f64() * 1000.0;
                    last_tick = now;
                    self.room.tick(dt_ms);
                },

                _ = patch_interval.tick() => {
                    self.room.flush_replication();
                },

                _ = housekeeping.tick() => {
                    let now = std::time::Instant::now();
                    for conn in self.room.drop_idle(self.timing.idle_timeout, now) {
                        self.connections.remove(&conn);
                    }
                    self.room.expire_reconnections(now);
                },
            }

            self.deliver();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoomOptions;

    #[test]
    fn test_default_timing() {
        let timing = LoopTiming::default();
        assert_eq!(timing.patch, Duration::from_millis(50));
        assert_eq!(timing.idle_timeout, Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let server = Server::new("127.0.0.1:0", Room::new(RoomOptions::default()), LoopTiming::default())
            .await
            .unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_event_stops_loop() {
        let mut server = Server::new("127.0.0.1:0", Room::new(RoomOptions::default()), LoopTiming::default())
            .await
            .unwrap();
        server.event_sender().send(RoomEvent::Shutdown).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), server.run()).await;
        assert!(result.unwrap().is_ok());
    }

    #[test]
    fn test_room_event_creation() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let event = RoomEvent::Connected {
            conn: 7,
            addr: "127.0.0.1:9000".parse().unwrap(),
            outgoing: tx,
        };
        match event {
            RoomEvent::Connected { conn, addr, .. } => {
                assert_eq!(conn, 7);
                assert_eq!(addr.port(), 9000);
            }
            _ => panic!("Unexpected event type"),
        }
    }
}
