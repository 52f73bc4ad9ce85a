// ============================
// crates/backend-lib/src/storage/memory.rs
// ============================
//! In-process implementation of the Storage trait.
//!
//! Rows live in hash maps behind a single `parking_lot` lock that is never
//! held across an await. Faults can be queued per operation to simulate an
//! unreliable store.
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crewchat_common::RoomStatus;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use super::Storage;
use crate::error::AppError;
use crate::models::{
    Application, ChatRoom, Event, NewMessage, OrganizerProfile, PaymentRecord, StoredMessage,
    WorkerProfile,
};

/// A simulated store failure, consumed by the next call of the named operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Fail before touching any row
    Fail,
    /// Apply the call, then report failure as if the response was lost
    LoseResponse,
    /// Stall before applying the call
    Delay(Duration),
}

#[derive(Default)]
struct Tables {
    events: HashMap<Uuid, Event>,
    applications: HashMap<(Uuid, String), Application>,
    rooms: HashMap<Uuid, ChatRoom>,
    messages: HashMap<Uuid, Vec<StoredMessage>>,
    payments: HashMap<Uuid, Vec<PaymentRecord>>,
    organizers: HashMap<String, OrganizerProfile>,
    workers: HashMap<String, WorkerProfile>,
}

/// In-memory implementation of the Storage trait
#[derive(Clone, Default)]
pub struct MemoryStorage {
    tables: Arc<RwLock<Tables>>,
    faults: Arc<Mutex<HashMap<&'static str, VecDeque<Fault>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fault for the next call of `operation`
    pub fn inject_fault(&self, operation: &'static str, fault: Fault) {
        self.faults.lock().entry(operation).or_default().push_back(fault);
    }

    /// Number of stored messages in a room
    pub fn message_count(&self, room_id: Uuid) -> usize {
        self.tables.read().messages.get(&room_id).map_or(0, Vec::len)
    }

    fn take_fault(&self, operation: &'static str) -> Option<Fault> {
        self.faults.lock().get_mut(operation).and_then(VecDeque::pop_front)
    }

    /// Returns whether the response of this call must be dropped
    async fn before(&self, operation: &'static str) -> Result<bool, AppError> {
        match self.take_fault(operation) {
            None => Ok(false),
            Some(Fault::Fail) => Err(AppError::persistence(operation, "injected failure")),
            Some(Fault::LoseResponse) => Ok(true),
            Some(Fault::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(false)
            },
        }
    }

    fn after<T>(operation: &'static str, lose: bool, value: T) -> Result<T, AppError> {
        if lose {
            Err(AppError::persistence(operation, "response lost"))
        } else {
            Ok(value)
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get_event(&self, event_id: Uuid) -> Result<Option<Event>, AppError> {
        let lose = self.before("get_event").await?;
        let event = self.tables.read().events.get(&event_id).cloned();
        Self::after("get_event", lose, event)
    }

    async fn insert_event(&self, event: &Event) -> Result<(), AppError> {
        let lose = self.before("insert_event").await?;
        {
            let mut tables = self.tables.write();
            if tables.events.contains_key(&event.id) {
                return Err(AppError::Conflict(format!("event {} already exists", event.id)));
            }
            tables.events.insert(event.id, event.clone());
        }
        Self::after("insert_event", lose, ())
    }

    async fn compare_and_swap_event(
        &self,
        expected_version: u64,
        event: &Event,
    ) -> Result<bool, AppError> {
        let lose = self.before("compare_and_swap_event").await?;
        let swapped = {
            let mut tables = self.tables.write();
            match tables.events.get_mut(&event.id) {
                None => return Err(AppError::EventNotFound(event.id)),
                Some(stored) if stored.version == expected_version => {
                    *stored = event.clone();
                    true
                },
                Some(_) => false,
            }
        };
        Self::after("compare_and_swap_event", lose, swapped)
    }

    async fn delete_event(&self, event_id: Uuid) -> Result<bool, AppError> {
        let lose = self.before("delete_event").await?;
        let removed = {
            let mut tables = self.tables.write();
            let removed = tables.events.remove(&event_id).is_some();
            tables.applications.retain(|(id, _), _| *id != event_id);
            tables.payments.remove(&event_id);
            let room_ids: Vec<Uuid> = tables
                .rooms
                .values()
                .filter(|r| r.event_id == event_id)
                .map(|r| r.id)
                .collect();
            for room_id in room_ids {
                tables.rooms.remove(&room_id);
                tables.messages.remove(&room_id);
            }
            removed
        };
        Self::after("delete_event", lose, removed)
    }

    async fn events_for_identity(&self, identity: &str) -> Result<Vec<Event>, AppError> {
        let lose = self.before("events_for_identity").await?;
        let mut events: Vec<Event> = self
            .tables
            .read()
            .events
            .values()
            .filter(|e| e.organizer == identity || e.accepted.contains(identity))
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.start_date, e.id));
        Self::after("events_for_identity", lose, events)
    }

    async fn get_application(
        &self,
        event_id: Uuid,
        worker: &str,
    ) -> Result<Option<Application>, AppError> {
        let lose = self.before("get_application").await?;
        let application = self
            .tables
            .read()
            .applications
            .get(&(event_id, worker.to_string()))
            .cloned();
        Self::after("get_application", lose, application)
    }

    async fn insert_application(&self, application: &Application) -> Result<(), AppError> {
        let lose = self.before("insert_application").await?;
        {
            let key = (application.event_id, application.phone_number.clone());
            let mut tables = self.tables.write();
            if tables.applications.contains_key(&key) {
                return Err(AppError::DuplicateApplication {
                    event_id: application.event_id,
                    worker: application.phone_number.clone(),
                });
            }
            tables.applications.insert(key, application.clone());
        }
        Self::after("insert_application", lose, ())
    }

    async fn delete_application(&self, event_id: Uuid, worker: &str) -> Result<bool, AppError> {
        let lose = self.before("delete_application").await?;
        let removed = self
            .tables
            .write()
            .applications
            .remove(&(event_id, worker.to_string()))
            .is_some();
        Self::after("delete_application", lose, removed)
    }

    async fn get_room(&self, room_id: Uuid) -> Result<Option<ChatRoom>, AppError> {
        let lose = self.before("get_room").await?;
        let room = self.tables.read().rooms.get(&room_id).cloned();
        Self::after("get_room", lose, room)
    }

    async fn get_room_for_event(&self, event_id: Uuid) -> Result<Option<ChatRoom>, AppError> {
        let lose = self.before("get_room_for_event").await?;
        let room = self
            .tables
            .read()
            .rooms
            .values()
            .find(|r| r.event_id == event_id)
            .cloned();
        Self::after("get_room_for_event", lose, room)
    }

    async fn insert_room(&self, room: &ChatRoom) -> Result<ChatRoom, AppError> {
        let lose = self.before("insert_room").await?;
        let stored = {
            let mut tables = self.tables.write();
            let existing = tables
                .rooms
                .values()
                .find(|r| r.event_id == room.event_id)
                .cloned();
            match existing {
                Some(existing) => existing,
                None => {
                    tables.rooms.insert(room.id, room.clone());
                    room.clone()
                },
            }
        };
        Self::after("insert_room", lose, stored)
    }

    async fn close_room(&self, room_id: Uuid, closed_at: DateTime<Utc>) -> Result<(), AppError> {
        let lose = self.before("close_room").await?;
        {
            let mut tables = self.tables.write();
            let room = tables
                .rooms
                .get_mut(&room_id)
                .ok_or(AppError::RoomNotFound(room_id))?;
            room.status = RoomStatus::Closed;
            room.closed_at = Some(closed_at);
        }
        Self::after("close_room", lose, ())
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<StoredMessage, AppError> {
        let lose = self.before("insert_message").await?;
        let stored = {
            let mut tables = self.tables.write();
            let log = tables.messages.entry(message.room_id).or_default();
            if let Some(existing) = log
                .iter()
                .find(|m| m.idempotency_key == message.idempotency_key)
            {
                existing.clone()
            } else {
                let (seq, created_at) = match log.last() {
                    Some(last) => (last.seq + 1, Utc::now().max(last.created_at)),
                    None => (1, Utc::now()),
                };
                let stored = StoredMessage {
                    id: Uuid::new_v4(),
                    room_id: message.room_id,
                    phone_number: message.phone_number.clone(),
                    body: message.body.clone(),
                    created_at,
                    seq,
                    idempotency_key: message.idempotency_key,
                };
                log.push(stored.clone());
                stored
            }
        };
        Self::after("insert_message", lose, stored)
    }

    async fn find_message_by_key(
        &self,
        room_id: Uuid,
        idempotency_key: Uuid,
    ) -> Result<Option<StoredMessage>, AppError> {
        let lose = self.before("find_message_by_key").await?;
        let found = self.tables.read().messages.get(&room_id).and_then(|log| {
            log.iter()
                .find(|m| m.idempotency_key == idempotency_key)
                .cloned()
        });
        Self::after("find_message_by_key", lose, found)
    }

    async fn list_messages(&self, room_id: Uuid) -> Result<Vec<StoredMessage>, AppError> {
        let lose = self.before("list_messages").await?;
        let mut messages = self
            .tables
            .read()
            .messages
            .get(&room_id)
            .cloned()
            .unwrap_or_default();
        messages.sort_by_key(|m| (m.created_at, m.seq));
        Self::after("list_messages", lose, messages)
    }

    async fn latest_payment(&self, event_id: Uuid) -> Result<Option<PaymentRecord>, AppError> {
        let lose = self.before("latest_payment").await?;
        let latest = self
            .tables
            .read()
            .payments
            .get(&event_id)
            .and_then(|records| records.iter().max_by_key(|p| p.created_at).cloned());
        Self::after("latest_payment", lose, latest)
    }

    async fn record_payment(&self, payment: &PaymentRecord) -> Result<(), AppError> {
        let lose = self.before("record_payment").await?;
        self.tables
            .write()
            .payments
            .entry(payment.event_id)
            .or_default()
            .push(payment.clone());
        Self::after("record_payment", lose, ())
    }

    async fn get_organizer_profile(
        &self,
        phone_number: &str,
    ) -> Result<Option<OrganizerProfile>, AppError> {
        let lose = self.before("get_organizer_profile").await?;
        let profile = self.tables.read().organizers.get(phone_number).cloned();
        Self::after("get_organizer_profile", lose, profile)
    }

    async fn upsert_organizer_profile(&self, profile: &OrganizerProfile) -> Result<(), AppError> {
        let lose = self.before("upsert_organizer_profile").await?;
        self.tables
            .write()
            .organizers
            .insert(profile.phone_number.clone(), profile.clone());
        Self::after("upsert_organizer_profile", lose, ())
    }

    async fn get_worker_profiles(
        &self,
        phone_numbers: &[String],
    ) -> Result<Vec<WorkerProfile>, AppError> {
        let lose = self.before("get_worker_profiles").await?;
        let profiles = {
            let tables = self.tables.read();
            phone_numbers
                .iter()
                .filter_map(|p| tables.workers.get(p).cloned())
                .collect()
        };
        Self::after("get_worker_profiles", lose, profiles)
    }

    async fn upsert_worker_profile(&self, profile: &WorkerProfile) -> Result<(), AppError> {
        let lose = self.before("upsert_worker_profile").await?;
        self.tables
            .write()
            .workers
            .insert(profile.phone_number.clone(), profile.clone());
        Self::after("upsert_worker_profile", lose, ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn event() -> Event {
        let day = NaiveDate::from_ymd_opt(2026, 6, 10).unwrap();
        Event::new("Trade Fair", "+15550000", day, day).with_crew(2, 0)
    }

    fn new_message(room_id: Uuid, body: &str) -> NewMessage {
        NewMessage {
            room_id,
            phone_number: "+15550000".to_string(),
            body: body.to_string(),
            idempotency_key: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn test_compare_and_swap_rejects_stale_version() {
        let storage = MemoryStorage::new();
        let event = event();
        storage.insert_event(&event).await.unwrap();

        let mut first = event.clone();
        first.accepted.insert("+15550001".to_string());
        first.version = 1;
        assert!(storage.compare_and_swap_event(0, &first).await.unwrap());

        let mut stale = event.clone();
        stale.accepted.insert("+15550002".to_string());
        stale.version = 1;
        assert!(!storage.compare_and_swap_event(0, &stale).await.unwrap());

        let stored = storage.get_event(event.id).await.unwrap().unwrap();
        assert!(stored.accepted.contains("+15550001"));
        assert!(!stored.accepted.contains("+15550002"));
    }

    #[tokio::test]
    async fn test_insert_room_is_exactly_once_per_event() {
        let storage = MemoryStorage::new();
        let event = event();

        let first = storage.insert_room(&ChatRoom::for_event(&event)).await.unwrap();
        let second = storage.insert_room(&ChatRoom::for_event(&event)).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.name, "Trade Fair Chat Room");
    }

    #[tokio::test]
    async fn test_messages_are_sequenced_and_idempotent() {
        let storage = MemoryStorage::new();
        let room_id = Uuid::new_v4();

        let first = storage.insert_message(&new_message(room_id, "one")).await.unwrap();
        let second_msg = new_message(room_id, "two");
        let second = storage.insert_message(&second_msg).await.unwrap();
        let replay = storage.insert_message(&second_msg).await.unwrap();

        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);
        assert_eq!(replay.id, second.id);
        assert_eq!(storage.message_count(room_id), 2);

        let listed = storage.list_messages(room_id).await.unwrap();
        let bodies: Vec<&str> = listed.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_lost_response_still_writes() {
        let storage = MemoryStorage::new();
        let room_id = Uuid::new_v4();
        let message = new_message(room_id, "hello");
        storage.inject_fault("insert_message", Fault::LoseResponse);

        assert!(storage.insert_message(&message).await.is_err());
        let found = storage
            .find_message_by_key(room_id, message.idempotency_key)
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_latest_payment_uses_creation_time() {
        let storage = MemoryStorage::new();
        let event_id = Uuid::new_v4();
        let now = Utc::now();
        for (id, status, age) in [
            ("pay_1", crate::models::PaymentStatus::Completed, 60),
            ("pay_2", crate::models::PaymentStatus::Refunded, 0),
        ] {
            storage
                .record_payment(&PaymentRecord {
                    payment_id: id.to_string(),
                    event_id,
                    status,
                    organizer: "+15550000".to_string(),
                    created_at: now - chrono::Duration::seconds(age),
                })
                .await
                .unwrap();
        }

        let latest = storage.latest_payment(event_id).await.unwrap().unwrap();
        assert_eq!(latest.payment_id, "pay_2");
    }

    #[tokio::test]
    async fn test_delete_event_cascades() {
        let storage = MemoryStorage::new();
        let event = event();
        storage.insert_event(&event).await.unwrap();
        let room = storage.insert_room(&ChatRoom::for_event(&event)).await.unwrap();
        storage.insert_message(&new_message(room.id, "bye")).await.unwrap();
        storage
            .insert_application(&Application {
                event_id: event.id,
                phone_number: "+15550001".to_string(),
                images: vec!["a.jpg".to_string()],
                experience: None,
                submitted_at: Utc::now(),
            })
            .await
            .unwrap();

        assert!(storage.delete_event(event.id).await.unwrap());
        assert!(storage.get_room(room.id).await.unwrap().is_none());
        assert_eq!(storage.message_count(room.id), 0);
        assert!(storage
            .get_application(event.id, "+15550001")
            .await
            .unwrap()
            .is_none());
    }
}
