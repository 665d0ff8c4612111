//! Connection-to-user bookkeeping for a room
//!
//! This module tracks which network connection speaks for which networked
//! user, including:
//! - Binding a connection to a user after a successful join
//! - Reconnection windows for users whose connection dropped
//! - Expiry of those windows so the room can clean up abandoned users
//!
//! The room itself owns user records and entities; the client manager only
//! answers "who is this connection" and "who may still come back".

use log::info;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Identifier the network layer assigns to each accepted connection
pub type ConnId = u32;

/// A joined connection
#[derive(Debug)]
pub struct Client {
    /// Connection identifier assigned by the network layer
    pub conn: ConnId,
    /// Networked user this connection speaks for
    pub user_id: String,
    /// Last time we received any message from this connection
    pub last_seen: Instant,
}

impl Client {
    pub fn new(conn: ConnId, user_id: String, now: Instant) -> Self {
        Self {
            conn,
            user_id,
            last_seen: now,
        }
    }

    /// Checks if the connection has been silent longer than `timeout`
    pub fn is_timed_out(&self, timeout: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }
}

/// Tracks joined connections and users waiting to reconnect
///
/// A user whose connection drops without a consented leave keeps their seat
/// until the grace period runs out. Rejoining with the same session id inside
/// the window resumes the same identity.
pub struct ClientManager {
    /// Joined connections indexed by connection id
    clients: HashMap<ConnId, Client>,
    /// Users awaiting reconnection and their deadlines
    pending_reconnects: HashMap<String, Instant>,
    /// How long a dropped user may take to come back
    reconnect_grace: Duration,
}

impl ClientManager {
    /// Creates an empty manager with the given reconnection window
    pub fn new(reconnect_grace: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            pending_reconnects: HashMap::new(),
            reconnect_grace,
        }
    }

    /// Associates a connection with a user
    ///
    /// Any reconnection window for the user is closed, since the user is
    /// present again.
    pub fn bind(&mut self, conn: ConnId, user_id: &str, now: Instant) {
        self.pending_reconnects.remove(user_id);
        self.clients
            .insert(conn, Client::new(conn, user_id.to_string(), now));
        info!("Connection {} bound to user {}", conn, user_id);
    }

    /// Drops a connection, returning the user it spoke for
    pub fn unbind(&mut self, conn: ConnId) -> Option<String> {
        self.clients.remove(&conn).map(|client| client.user_id)
    }

    /// Returns the user a connection speaks for, if it has joined
    pub fn user_of(&self, conn: ConnId) -> Option<&str> {
        self.clients.get(&conn).map(|client| client.user_id.as_str())
    }

    /// Finds the connection currently bound to a user
    pub fn conn_of(&self, user_id: &str) -> Option<ConnId> {
        self.clients
            .values()
            .find(|client| client.user_id == user_id)
            .map(|client| client.conn)
    }

    /// Marks activity on a connection
    pub fn touch(&mut self, conn: ConnId, now: Instant) {
        if let Some(client) = self.clients.get_mut(&conn) {
            client.last_seen = now;
        }
    }

    /// Opens the reconnection window for a user whose connection dropped
    pub fn begin_grace(&mut self, user_id: &str, now: Instant) {
        info!(
            "Waiting {:?} for user {} to reconnect",
            self.reconnect_grace, user_id
        );
        self.pending_reconnects
            .insert(user_id.to_string(), now + self.reconnect_grace);
    }

    /// Returns true if `user_id` may still resume its session at `now`
    pub fn can_resume(&self, user_id: &str, now: Instant) -> bool {
        self.pending_reconnects
            .get(user_id)
            .is_some_and(|deadline| now <= *deadline)
    }

    /// Removes and returns users whose reconnection window has closed
    pub fn take_expired(&mut self, now: Instant) -> Vec<String> {
        let mut expired: Vec<String> = self
            .pending_reconnects
            .iter()
            .filter(|(_, deadline)| now > **deadline)
            .map(|(user_id, _)| user_id.clone())
            .collect();
        expired.sort();

        for user_id in &expired {
            self.pending_reconnects.remove(user_id);
            info!("User {} did not reconnect in time", user_id);
        }
        expired
    }

    /// Connections that have been silent longer than `timeout`
    pub fn timed_out(&self, timeout: Duration, now: Instant) -> Vec<ConnId> {
        let mut conns: Vec<ConnId> = self
            .clients
            .values()
            .filter(|client| client.is_timed_out(timeout, now))
            .map(|client| client.conn)
            .collect();
        conns.sort_unstable();
        conns
    }

    /// Connection ids of every joined client, in ascending order
    pub fn connections(&self) -> Vec<ConnId> {
        let mut conns: Vec<ConnId> = self.clients.keys().copied().collect();
        conns.sort_unstable();
        conns
    }

    pub fn pending_reconnects(&self) -> usize {
        self.pending_reconnects.len()
    }

    /// Returns the number of joined connections
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no connection has joined
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ClientManager {
        ClientManager::new(Duration::from_secs(10))
    }

    #[test]
    fn test_client_timeout() {
        let now = Instant::now();
        let client = Client::new(1, "u1".into(), now);

        assert!(!client.is_timed_out(Duration::from_secs(1), now));
        assert!(client.is_timed_out(Duration::from_secs(1), now + Duration::from_secs(2)));
    }

    #[test]
    fn test_bind_and_unbind() {
        let mut manager = manager();
        let now = Instant::now();

        manager.bind(1, "u1", now);
        manager.bind(2, "u2", now);

        assert_eq!(manager.len(), 2);
        assert_eq!(manager.user_of(1), Some("u1"));
        assert_eq!(manager.conn_of("u2"), Some(2));
        assert_eq!(manager.connections(), vec![1, 2]);

        assert_eq!(manager.unbind(1), Some("u1".to_string()));
        assert_eq!(manager.unbind(1), None);
        assert_eq!(manager.user_of(1), None);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_resume_within_grace() {
        let mut manager = manager();
        let now = Instant::now();

        manager.bind(1, "u1", now);
        manager.unbind(1);
        manager.begin_grace("u1", now);

        assert!(manager.can_resume("u1", now + Duration::from_secs(9)));
        assert!(!manager.can_resume("u2", now));

        manager.bind(5, "u1", now + Duration::from_secs(9));
        assert_eq!(manager.pending_reconnects(), 0);
        assert!(manager
            .take_expired(now + Duration::from_secs(30))
            .is_empty());
    }

    #[test]
    fn test_grace_expiry() {
        let mut manager = manager();
        let now = Instant::now();

        manager.begin_grace("u1", now);
        manager.begin_grace("u2", now + Duration::from_secs(5));

        assert!(manager.take_expired(now + Duration::from_secs(10)).is_empty());
        assert_eq!(
            manager.take_expired(now + Duration::from_secs(11)),
            vec!["u1".to_string()]
        );
        assert!(!manager.can_resume("u1", now + Duration::from_secs(11)));
        assert!(manager.can_resume("u2", now + Duration::from_secs(11)));
    }
}
