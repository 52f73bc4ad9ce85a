// ============================
// crates/backend-lib/src/registry.rs
// ============================
//! In-memory room membership and fan-out.
//!
//! Two sharded maps: room id to its live connections, and connection id to
//! the rooms it joined. Each room entry remembers which identity joined, so
//! connections can be evicted when that identity loses access. Nothing here
//! awaits or touches the store, and membership is never persisted.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crewchat_common::ServerMessage;
use dashmap::DashMap;
use metrics::{counter, gauge};
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::metrics::{BROADCAST_FAILED, ROOM_ACTIVE};

pub type ConnectionId = Uuid;

/// Outbound queue of one connection
pub type Outbound = mpsc::Sender<ServerMessage>;

/// A connection registered in a room
struct Member {
    identity: String,
    outbound: Outbound,
}

#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<Uuid, HashMap<ConnectionId, Member>>,
    connections: DashMap<ConnectionId, HashSet<Uuid>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection in a room on behalf of `identity`. Joining
    /// twice is a no-op.
    pub fn join(&self, room_id: Uuid, connection_id: ConnectionId, identity: &str, outbound: Outbound) {
        self.rooms.entry(room_id).or_default().insert(
            connection_id,
            Member {
                identity: identity.to_string(),
                outbound,
            },
        );
        self.connections
            .entry(connection_id)
            .or_default()
            .insert(room_id);
        gauge!(ROOM_ACTIVE).set(self.rooms.len() as f64);
        tracing::debug!(%room_id, %connection_id, "connection joined room");
    }

    /// Remove a connection from one room, pruning the room if it empties
    pub fn leave(&self, room_id: Uuid, connection_id: ConnectionId) -> bool {
        let removed = self.remove_member(room_id, connection_id);

        if let Some(mut rooms) = self.connections.get_mut(&connection_id) {
            rooms.remove(&room_id);
        }
        self.connections
            .remove_if(&connection_id, |_, rooms| rooms.is_empty());

        if removed {
            tracing::debug!(%room_id, %connection_id, "connection left room");
        }
        removed
    }

    /// Remove a connection from every room it joined
    pub fn on_disconnect(&self, connection_id: ConnectionId) {
        let Some((_, rooms)) = self.connections.remove(&connection_id) else {
            return;
        };
        for room_id in &rooms {
            self.remove_member(*room_id, connection_id);
        }
        tracing::debug!(%connection_id, rooms = rooms.len(), "connection removed from all rooms");
    }

    /// Remove every connection `identity` holds in a room and tell each one
    /// it left. Returns how many connections were removed.
    pub fn evict_identity(&self, room_id: Uuid, identity: &str) -> usize {
        let evicted: Vec<(ConnectionId, Outbound)> = match self.rooms.get_mut(&room_id) {
            Some(mut members) => {
                let ids: Vec<ConnectionId> = members
                    .iter()
                    .filter(|(_, m)| m.identity == identity)
                    .map(|(id, _)| *id)
                    .collect();
                ids.into_iter()
                    .filter_map(|id| members.remove(&id).map(|m| (id, m.outbound)))
                    .collect()
            },
            None => return 0,
        };
        self.rooms.remove_if(&room_id, |_, members| members.is_empty());
        gauge!(ROOM_ACTIVE).set(self.rooms.len() as f64);

        for (connection_id, outbound) in &evicted {
            if let Some(mut rooms) = self.connections.get_mut(connection_id) {
                rooms.remove(&room_id);
            }
            self.connections
                .remove_if(connection_id, |_, rooms| rooms.is_empty());
            if outbound.try_send(ServerMessage::RoomLeft { room_id }).is_err() {
                tracing::debug!(%room_id, %connection_id, "evicted connection not notified");
            }
        }
        if !evicted.is_empty() {
            tracing::info!(%room_id, evicted = evicted.len(), "connections evicted from room");
        }
        evicted.len()
    }

    /// Deliver `message` to every connection in the room without waiting.
    ///
    /// A full or closed queue only loses this one delivery; membership is
    /// left alone. Returns how many queues accepted the message.
    pub fn broadcast(&self, room_id: Uuid, message: &ServerMessage) -> usize {
        let recipients: Vec<(ConnectionId, Outbound)> = match self.rooms.get(&room_id) {
            Some(members) => members
                .iter()
                .map(|(id, member)| (*id, member.outbound.clone()))
                .collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for (connection_id, tx) in recipients {
            match tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    counter!(BROADCAST_FAILED).increment(1);
                    tracing::warn!(%room_id, %connection_id, "outbound queue full, dropping message");
                },
                Err(TrySendError::Closed(_)) => {
                    counter!(BROADCAST_FAILED).increment(1);
                    tracing::warn!(%room_id, %connection_id, "outbound queue closed");
                },
            }
        }
        delivered
    }

    /// Forget a room entirely, e.g. after its event was deleted
    pub fn drop_room(&self, room_id: Uuid) {
        let Some((_, members)) = self.rooms.remove(&room_id) else {
            return;
        };
        for connection_id in members.keys() {
            if let Some(mut rooms) = self.connections.get_mut(connection_id) {
                rooms.remove(&room_id);
            }
            self.connections
                .remove_if(connection_id, |_, rooms| rooms.is_empty());
        }
        gauge!(ROOM_ACTIVE).set(self.rooms.len() as f64);
    }

    pub fn is_member(&self, room_id: Uuid, connection_id: ConnectionId) -> bool {
        self.rooms
            .get(&room_id)
            .is_some_and(|members| members.contains_key(&connection_id))
    }

    /// Number of live connections in a room
    pub fn members(&self, room_id: Uuid) -> usize {
        self.rooms.get(&room_id).map_or(0, |members| members.len())
    }

    pub fn rooms_of(&self, connection_id: ConnectionId) -> Vec<Uuid> {
        self.connections
            .get(&connection_id)
            .map(|rooms| rooms.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn remove_member(&self, room_id: Uuid, connection_id: ConnectionId) -> bool {
        let removed = match self.rooms.get_mut(&room_id) {
            Some(mut members) => members.remove(&connection_id).is_some(),
            None => false,
        };
        // Checked under the shard lock, so a concurrent join is never lost
        self.rooms.remove_if(&room_id, |_, members| members.is_empty());
        gauge!(ROOM_ACTIVE).set(self.rooms.len() as f64);
        removed
    }
}

/// Removes its connection from the registry when dropped, so cleanup runs
/// on graceful close, transport errors and task cancellation alike.
pub struct ConnectionGuard {
    registry: Arc<RoomRegistry>,
    connection_id: ConnectionId,
}

impl ConnectionGuard {
    pub fn new(registry: Arc<RoomRegistry>, connection_id: ConnectionId) -> Self {
        Self {
            registry,
            connection_id,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.on_disconnect(self.connection_id);
    }
}
