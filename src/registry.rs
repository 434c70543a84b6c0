//! Live socket connections and the user each one belongs to.

use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    db::{RoomId, UserId},
    events::ServerEvent,
};

pub type ConnectionId = Uuid;

/// Outbound queue of one connection. Sending never waits on the socket.
pub type ConnectionSender = mpsc::UnboundedSender<ServerEvent>;

struct Connection {
    user_id: Option<UserId>,
    sender: ConnectionSender,
    rooms: HashSet<RoomId>,
}

/// Lock order is always `connections` before `by_user`.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Connection>,
    by_user: DashMap<UserId, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks a freshly opened transport. It has no user until `register`.
    pub fn connect(&self, sender: ConnectionSender) -> ConnectionId {
        let connection_id = Uuid::now_v7();
        self.connections.insert(
            connection_id,
            Connection { user_id: None, sender, rooms: HashSet::new() },
        );
        connection_id
    }

    /// Binds a connection to a user, replacing any previous binding.
    /// Returns false if the connection is unknown.
    pub fn register(&self, connection_id: ConnectionId, user_id: UserId) -> bool {
        let Some(mut connection) = self.connections.get_mut(&connection_id) else {
            return false;
        };

        if let Some(previous) = connection.user_id.replace(user_id) {
            if previous != user_id {
                self.forget_user_connection(previous, connection_id);
            }
        }
        self.by_user.entry(user_id).or_default().insert(connection_id);

        tracing::debug!(%connection_id, %user_id, "connection registered");
        true
    }

    /// Drops a connection. Returns the rooms it had joined; `None` if it was
    /// already gone.
    pub fn unregister(&self, connection_id: ConnectionId) -> Option<HashSet<RoomId>> {
        let (_, connection) = self.connections.remove(&connection_id)?;
        if let Some(user_id) = connection.user_id {
            self.forget_user_connection(user_id, connection_id);
        }

        tracing::debug!(%connection_id, "connection unregistered");
        Some(connection.rooms)
    }

    pub fn connections_for(&self, user_id: UserId) -> HashSet<ConnectionId> {
        self.by_user
            .get(&user_id)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    pub fn user_for(&self, connection_id: ConnectionId) -> Option<UserId> {
        self.connections.get(&connection_id)?.user_id
    }

    pub fn is_connected(&self, connection_id: ConnectionId) -> bool {
        self.connections.contains_key(&connection_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Queues an event for one connection. A vanished or closed connection is
    /// not an error, it just reports false.
    pub fn send(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        match self.connections.get(&connection_id) {
            Some(connection) => connection.sender.send(event).is_ok(),
            None => false,
        }
    }

    pub(crate) fn track_room(&self, connection_id: ConnectionId, room_id: RoomId) -> bool {
        match self.connections.get_mut(&connection_id) {
            Some(mut connection) => {
                connection.rooms.insert(room_id);
                true
            }
            None => false,
        }
    }

    pub(crate) fn untrack_room(&self, connection_id: ConnectionId, room_id: RoomId) {
        if let Some(mut connection) = self.connections.get_mut(&connection_id) {
            connection.rooms.remove(&room_id);
        }
    }

    fn forget_user_connection(&self, user_id: UserId, connection_id: ConnectionId) {
        if let Some(mut ids) = self.by_user.get_mut(&user_id) {
            ids.remove(&connection_id);
        }
        self.by_user.remove_if(&user_id, |_, ids| ids.is_empty());
    }
}
