//! Room subscriptions and fan-out of live events to sockets.
//!
//! Membership of a room lives in the store; subscription (which sockets have
//! the room open right now) lives here. A message therefore goes out twice:
//! once to the room's subscribers and once to the personal channel of every
//! member who has no subscribed socket.

use std::{collections::HashSet, sync::Arc};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    db::{Message, MessageId, RoomId, UserId},
    events::ServerEvent,
    registry::{ConnectionId, ConnectionRegistry},
};

#[derive(Clone, Default)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    subscribers: Arc<DashMap<RoomId, HashSet<ConnectionId>>>,
    turns: Arc<DashMap<RoomId, Arc<Mutex<()>>>>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry, ..Self::default() }
    }

    /// Held across "accept message, then broadcast it" so subscribers of a
    /// room see messages in the order they were written.
    pub async fn room_turn(&self, room_id: RoomId) -> OwnedMutexGuard<()> {
        let turn = self.turns.entry(room_id).or_default().clone();
        turn.lock_owned().await
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Subscribes a connection to a room. Returns true if anything changed.
    pub fn join(&self, connection_id: ConnectionId, room_id: RoomId) -> bool {
        let added = self.subscribers.entry(room_id).or_default().insert(connection_id);

        // the connection may have closed meanwhile; don't leave a dangling subscriber
        if !self.registry.track_room(connection_id, room_id) {
            self.drop_subscriber(room_id, connection_id);
            return false;
        }

        if added {
            tracing::debug!(%connection_id, %room_id, "joined room");
        }
        added
    }

    /// Unsubscribes a connection. Leaving a room never joined is a no-op.
    pub fn leave(&self, connection_id: ConnectionId, room_id: RoomId) -> bool {
        self.registry.untrack_room(connection_id, room_id);
        let removed = self.drop_subscriber(room_id, connection_id);
        if removed {
            tracing::debug!(%connection_id, %room_id, "left room");
        }
        removed
    }

    /// Forgets a closed connection everywhere.
    pub fn disconnect(&self, connection_id: ConnectionId) {
        let Some(rooms) = self.registry.unregister(connection_id) else {
            return;
        };
        for room_id in rooms {
            self.drop_subscriber(room_id, connection_id);
        }
    }

    pub fn subscribers(&self, room_id: RoomId) -> HashSet<ConnectionId> {
        self.subscribers
            .get(&room_id)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, connection_id: ConnectionId, room_id: RoomId) -> bool {
        self.subscribers
            .get(&room_id)
            .is_some_and(|ids| ids.contains(&connection_id))
    }

    /// Returns how many connections the event was queued for.
    pub fn broadcast_to_room(
        &self,
        room_id: RoomId,
        event: &ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> usize {
        self.subscribers(room_id)
            .into_iter()
            .filter(|id| Some(*id) != exclude)
            .filter(|id| self.registry.send(*id, event.clone()))
            .count()
    }

    /// Reaches every open connection of a user, whatever they are looking at.
    pub fn broadcast_to_user(&self, user_id: UserId, event: &ServerEvent) -> usize {
        self.send_to_user(user_id, event, None)
    }

    fn send_to_user(&self, user_id: UserId, event: &ServerEvent, exclude: Option<ConnectionId>) -> usize {
        self.registry
            .connections_for(user_id)
            .into_iter()
            .filter(|id| Some(*id) != exclude)
            .filter(|id| self.registry.send(*id, event.clone()))
            .count()
    }

    /// Delivers a freshly accepted message. `origin` is the sender's socket,
    /// which already got its own acknowledgement.
    pub fn send_message(&self, message: &Message, members: &[UserId], origin: Option<ConnectionId>) -> usize {
        let room_id = message.room_id;
        let event = ServerEvent::NewMessage { room_id, message: message.clone() };

        let subscribed_users: HashSet<UserId> = self
            .subscribers(room_id)
            .into_iter()
            .filter_map(|id| self.registry.user_for(id))
            .collect();

        let mut delivered = self.broadcast_to_room(room_id, &event, origin);
        // the origin socket may not be subscribed; it already has its ack
        for member in members.iter().filter(|member| !subscribed_users.contains(member)) {
            delivered += self.send_to_user(*member, &event, origin);
        }

        tracing::debug!(%room_id, message_id = %message.id, delivered, "message broadcast");
        delivered
    }

    pub fn typing(&self, room_id: RoomId, user_id: UserId, is_typing: bool, origin: Option<ConnectionId>) {
        self.broadcast_to_room(room_id, &ServerEvent::UserTyping { room_id, user_id, is_typing }, origin);
    }

    pub fn mark_read(&self, room_id: RoomId, message_id: MessageId, user_id: UserId, origin: Option<ConnectionId>) {
        self.broadcast_to_room(room_id, &ServerEvent::MessageRead { room_id, message_id, user_id }, origin);
    }

    fn drop_subscriber(&self, room_id: RoomId, connection_id: ConnectionId) -> bool {
        let removed = self
            .subscribers
            .get_mut(&room_id)
            .is_some_and(|mut ids| ids.remove(&connection_id));
        self.subscribers.remove_if(&room_id, |_, ids| ids.is_empty());
        removed
    }
}
