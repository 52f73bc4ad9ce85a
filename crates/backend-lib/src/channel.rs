// ============================
// crates/backend-lib/src/channel.rs
// ============================
//! Message channel: authorize, persist, enrich and fan out chat messages.
//!
//! Sends to one room are serialized by a per-room lock held from the insert
//! until the broadcast has been queued, so every client sees messages in
//! store order. Nothing is broadcast before it is stored. Closing a room
//! takes the same lock, so no message lands after the room is closed.
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use crewchat_common::{ChatMessage, RoomStatus, SenderRole, ServerMessage};
use dashmap::DashMap;
use metrics::counter;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::AppError;
use crate::gate;
use crate::metrics::{MESSAGE_PERSISTED, ROOM_CLOSED};
use crate::models::{ChatRoom, Event, EventStatus, NewMessage, StoredMessage, WorkerProfile};
use crate::registry::RoomRegistry;
use crate::storage::{Storage, StoreClient};
use crate::validation::{validate_message_body, validate_phone_number};

const UNKNOWN_SENDER: &str = "Unknown";

pub struct MessageChannel<S> {
    store: Arc<StoreClient<S>>,
    registry: Arc<RoomRegistry>,
    send_locks: DashMap<Uuid, Arc<Mutex<()>>>,
    max_message_length: usize,
}

impl<S: Storage> MessageChannel<S> {
    pub fn new(store: Arc<StoreClient<S>>, registry: Arc<RoomRegistry>, max_message_length: usize) -> Self {
        Self {
            store,
            registry,
            send_locks: DashMap::new(),
            max_message_length,
        }
    }

    /// Store a message and broadcast it to the room.
    ///
    /// Resubmitting with the same `idempotency_key` returns the message stored
    /// the first time instead of a second copy.
    #[tracing::instrument(skip(self, body), fields(len = body.len()))]
    pub async fn send(
        &self,
        room_id: Uuid,
        sender: &str,
        body: &str,
        idempotency_key: Option<Uuid>,
    ) -> Result<ChatMessage, AppError> {
        validate_phone_number(sender)?;
        validate_message_body(body, self.max_message_length)?;

        self.admit(room_id, sender).await?;

        let lock = self.lock_for(room_id);
        let _guard = lock.lock().await;
        // The room may have closed, or the sender lost access, while waiting
        let event = self.admit(room_id, sender).await?;

        let new_message = NewMessage {
            room_id,
            phone_number: sender.to_string(),
            body: body.to_string(),
            idempotency_key: idempotency_key.unwrap_or_else(Uuid::new_v4),
        };
        let stored = self.persist(&new_message).await?;
        counter!(MESSAGE_PERSISTED).increment(1);

        let senders = SenderDirectory::load(&self.store, &event, [sender.to_string()]).await;
        let message = senders.enrich(stored);

        let delivered = self.registry.broadcast(
            room_id,
            &ServerMessage::NewMessage {
                message: message.clone(),
            },
        );
        tracing::debug!(seq = message.seq, delivered, "message broadcast");
        Ok(message)
    }

    /// Full history of a room, oldest first
    #[tracing::instrument(skip(self))]
    pub async fn fetch_history(&self, room_id: Uuid, requester: &str) -> Result<Vec<ChatMessage>, AppError> {
        validate_phone_number(requester)?;

        let room = self.load_room(room_id).await?;
        let event = gate::load_authorized(&self.store, room.event_id, requester).await?;

        let stored = self
            .store
            .read("list_messages", |s| s.list_messages(room_id))
            .await?;
        let authors: BTreeSet<String> = stored.iter().map(|m| m.phone_number.clone()).collect();
        let senders = SenderDirectory::load(&self.store, &event, authors).await;

        Ok(stored.into_iter().map(|m| senders.enrich(m)).collect())
    }

    /// Close a room and notify its connections, after any send in flight
    /// has been broadcast. Returns the time the room was closed.
    #[tracing::instrument(skip(self))]
    pub async fn close_room(&self, room_id: Uuid, event_id: Uuid) -> Result<DateTime<Utc>, AppError> {
        let lock = self.lock_for(room_id);
        let _guard = lock.lock().await;

        let closed_at = Utc::now();
        self.store
            .write("close_room", |s| s.close_room(room_id, closed_at))
            .await?;
        counter!(ROOM_CLOSED).increment(1);

        let notified = self
            .registry
            .broadcast(room_id, &ServerMessage::EventEnded { event_id, room_id });
        tracing::info!(notified, "chat room closed");

        // Closed rooms never take another send
        self.send_locks.remove(&room_id);
        Ok(closed_at)
    }

    /// Drop the send lock of a deleted room
    pub fn forget(&self, room_id: Uuid) {
        self.send_locks.remove(&room_id);
    }

    /// Room exists, sender is authorized on a fresh event row, and the room
    /// still takes messages
    async fn admit(&self, room_id: Uuid, sender: &str) -> Result<Event, AppError> {
        let room = self.load_room(room_id).await?;
        let event = gate::load_authorized(&self.store, room.event_id, sender).await?;
        if room.status == RoomStatus::Closed || event.status == EventStatus::Ended {
            return Err(AppError::RoomClosed(room_id));
        }
        Ok(event)
    }

    fn lock_for(&self, room_id: Uuid) -> Arc<Mutex<()>> {
        self.send_locks.entry(room_id).or_default().clone()
    }

    async fn load_room(&self, room_id: Uuid) -> Result<ChatRoom, AppError> {
        self.store
            .read("get_room", |s| s.get_room(room_id))
            .await?
            .ok_or(AppError::RoomNotFound(room_id))
    }

    /// Insert, and on a failed insert check whether it landed before trying
    /// once more. The idempotency key makes the second insert harmless.
    async fn persist(&self, message: &NewMessage) -> Result<StoredMessage, AppError> {
        let first = self
            .store
            .write("insert_message", |s| s.insert_message(message))
            .await;
        let err = match first {
            Ok(stored) => return Ok(stored),
            Err(e) if e.is_retryable() => e,
            Err(e) => return Err(e),
        };

        tracing::warn!(room_id = %message.room_id, "message insert failed, verifying: {err}");
        let key = message.idempotency_key;
        if let Some(stored) = self
            .store
            .read("find_message_by_key", |s| s.find_message_by_key(message.room_id, key))
            .await?
        {
            return Ok(stored);
        }

        self.store
            .write("insert_message", |s| s.insert_message(message))
            .await
    }
}

/// Display names and roles of message authors within one event
pub(crate) struct SenderDirectory {
    organizer: String,
    company_name: Option<String>,
    workers: HashMap<String, WorkerProfile>,
}

impl SenderDirectory {
    /// Profile lookups that fail only degrade names to "Unknown"
    pub(crate) async fn load<S: Storage>(
        store: &StoreClient<S>,
        event: &Event,
        authors: impl IntoIterator<Item = String>,
    ) -> Self {
        let workers: Vec<String> = authors
            .into_iter()
            .filter(|phone| !event.is_organizer(phone))
            .collect();

        let company_name = match store
            .read("get_organizer_profile", |s| s.get_organizer_profile(&event.organizer))
            .await
        {
            Ok(profile) => profile.map(|p| p.company_name).filter(|n| !n.trim().is_empty()),
            Err(e) => {
                tracing::warn!(event_id = %event.id, "organizer profile lookup failed: {e}");
                None
            },
        };

        let workers = if workers.is_empty() {
            HashMap::new()
        } else {
            match store
                .read("get_worker_profiles", |s| s.get_worker_profiles(&workers))
                .await
            {
                Ok(profiles) => profiles
                    .into_iter()
                    .map(|p| (p.phone_number.clone(), p))
                    .collect(),
                Err(e) => {
                    tracing::warn!(event_id = %event.id, "worker profile lookup failed: {e}");
                    HashMap::new()
                },
            }
        };

        Self {
            organizer: event.organizer.clone(),
            company_name,
            workers,
        }
    }

    pub(crate) fn describe(&self, phone_number: &str) -> (String, SenderRole) {
        if phone_number == self.organizer {
            let name = self
                .company_name
                .clone()
                .unwrap_or_else(|| UNKNOWN_SENDER.to_string());
            return (name, SenderRole::Organizer);
        }
        match self.workers.get(phone_number) {
            Some(profile) => (
                profile
                    .display_name()
                    .unwrap_or_else(|| UNKNOWN_SENDER.to_string()),
                SenderRole::GigWorker,
            ),
            None => (UNKNOWN_SENDER.to_string(), SenderRole::Unknown),
        }
    }

    pub(crate) fn enrich(&self, stored: StoredMessage) -> ChatMessage {
        let (sender_name, sender_role) = self.describe(&stored.phone_number);
        ChatMessage {
            id: stored.id,
            room_id: stored.room_id,
            phone_number: stored.phone_number,
            sender_name,
            sender_role,
            message: stored.body,
            timestamp: stored.created_at,
            seq: stored.seq,
        }
    }
}
