// ============================
// crates/backend-lib/src/storage/flat_file.rs
// ============================
//! Flat-file implementation of the Storage trait.
//!
//! Layout under the root directory:
//!
//! ```text
//! events/<event_id>.json
//! applications/<event_id>/<phone>.json
//! rooms/<room_id>.json
//! room-index/<event_id>            room id of the event's chat room
//! messages/<room_id>.log           one JSON message per line
//! payments/<event_id>.log          one JSON payment record per line
//! profiles/organizers/<phone>.json
//! profiles/workers/<phone>.json
//! ```
//!
//! Documents are replaced by writing a sibling temp file and renaming it.
//! All mutations are serialized by one process-wide write lock.
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::{fs, io};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crewchat_common::RoomStatus;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::{fs as tokio_fs, io::AsyncWriteExt, sync::Mutex};
use uuid::Uuid;

use super::Storage;
use crate::error::AppError;
use crate::models::{
    Application, ChatRoom, Event, NewMessage, OrganizerProfile, PaymentRecord, StoredMessage,
    WorkerProfile,
};

/// Flat-file implementation of the Storage trait
#[derive(Clone)]
pub struct FlatFileStorage {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FlatFileStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> anyhow::Result<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in [
            "events",
            "applications",
            "rooms",
            "room-index",
            "messages",
            "payments",
            "profiles/organizers",
            "profiles/workers",
        ] {
            fs::create_dir_all(root.join(dir))?;
        }
        Ok(Self {
            root,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn event_path(&self, event_id: Uuid) -> PathBuf {
        self.root.join("events").join(format!("{event_id}.json"))
    }

    fn application_dir(&self, event_id: Uuid) -> PathBuf {
        self.root.join("applications").join(event_id.to_string())
    }

    fn application_path(&self, event_id: Uuid, worker: &str) -> PathBuf {
        self.application_dir(event_id).join(format!("{worker}.json"))
    }

    fn room_path(&self, room_id: Uuid) -> PathBuf {
        self.root.join("rooms").join(format!("{room_id}.json"))
    }

    fn room_index_path(&self, event_id: Uuid) -> PathBuf {
        self.root.join("room-index").join(event_id.to_string())
    }

    fn message_log_path(&self, room_id: Uuid) -> PathBuf {
        self.root.join("messages").join(format!("{room_id}.log"))
    }

    fn payment_log_path(&self, event_id: Uuid) -> PathBuf {
        self.root.join("payments").join(format!("{event_id}.log"))
    }

    fn organizer_path(&self, phone_number: &str) -> PathBuf {
        self.root
            .join("profiles/organizers")
            .join(format!("{phone_number}.json"))
    }

    fn worker_path(&self, phone_number: &str) -> PathBuf {
        self.root
            .join("profiles/workers")
            .join(format!("{phone_number}.json"))
    }

    async fn room_id_for_event(&self, event_id: Uuid) -> Result<Option<Uuid>, AppError> {
        match tokio_fs::read_to_string(self.room_index_path(event_id)).await {
            Ok(content) => Uuid::parse_str(content.trim())
                .map(Some)
                .map_err(|e| AppError::persistence("room_index", e.to_string())),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_messages(&self, room_id: Uuid) -> Result<Vec<StoredMessage>, AppError> {
        read_lines(&self.message_log_path(room_id)).await
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, AppError> {
    match tokio_fs::read_to_string(path).await {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), AppError> {
    ensure_parent(path).await?;
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("tmp");
    tokio_fs::write(&tmp, json).await?;
    tokio_fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, AppError> {
    let content = match tokio_fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(AppError::from))
        .collect()
}

async fn append_line<T: Serialize>(path: &Path, value: &T) -> Result<(), AppError> {
    ensure_parent(path).await?;
    let mut line = serde_json::to_string(value)?;
    line.push('\n');

    let mut file = tokio_fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

async fn ensure_parent(path: &Path) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        tokio_fs::create_dir_all(parent).await?;
    }
    Ok(())
}

async fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match tokio_fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl Storage for FlatFileStorage {
    async fn get_event(&self, event_id: Uuid) -> Result<Option<Event>, AppError> {
        read_json(&self.event_path(event_id)).await
    }

    async fn insert_event(&self, event: &Event) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;
        let path = self.event_path(event.id);
        if tokio_fs::try_exists(&path).await? {
            return Err(AppError::Conflict(format!("event {} already exists", event.id)));
        }
        write_json(&path, event).await
    }

    async fn compare_and_swap_event(
        &self,
        expected_version: u64,
        event: &Event,
    ) -> Result<bool, AppError> {
        let _guard = self.write_lock.lock().await;
        let path = self.event_path(event.id);
        let stored: Event = read_json(&path)
            .await?
            .ok_or(AppError::EventNotFound(event.id))?;
        if stored.version != expected_version {
            return Ok(false);
        }
        write_json(&path, event).await?;
        Ok(true)
    }

    async fn delete_event(&self, event_id: Uuid) -> Result<bool, AppError> {
        let _guard = self.write_lock.lock().await;
        let removed = remove_if_exists(&self.event_path(event_id)).await?;

        match tokio_fs::remove_dir_all(self.application_dir(event_id)).await {
            Ok(()) => {},
            Err(e) if e.kind() == IoErrorKind::NotFound => {},
            Err(e) => return Err(e.into()),
        }
        remove_if_exists(&self.payment_log_path(event_id)).await?;

        if let Some(room_id) = self.room_id_for_event(event_id).await? {
            remove_if_exists(&self.room_path(room_id)).await?;
            remove_if_exists(&self.message_log_path(room_id)).await?;
            remove_if_exists(&self.room_index_path(event_id)).await?;
        }

        Ok(removed)
    }

    async fn events_for_identity(&self, identity: &str) -> Result<Vec<Event>, AppError> {
        let mut events = Vec::new();
        let mut entries = tokio_fs::read_dir(self.root.join("events")).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(event) = read_json::<Event>(&path).await? {
                if event.organizer == identity || event.accepted.contains(identity) {
                    events.push(event);
                }
            }
        }
        events.sort_by_key(|e| (e.start_date, e.id));
        Ok(events)
    }

    async fn get_application(
        &self,
        event_id: Uuid,
        worker: &str,
    ) -> Result<Option<Application>, AppError> {
        read_json(&self.application_path(event_id, worker)).await
    }

    async fn insert_application(&self, application: &Application) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;
        let path = self.application_path(application.event_id, &application.phone_number);
        if tokio_fs::try_exists(&path).await? {
            return Err(AppError::DuplicateApplication {
                event_id: application.event_id,
                worker: application.phone_number.clone(),
            });
        }
        write_json(&path, application).await
    }

    async fn delete_application(&self, event_id: Uuid, worker: &str) -> Result<bool, AppError> {
        let _guard = self.write_lock.lock().await;
        Ok(remove_if_exists(&self.application_path(event_id, worker)).await?)
    }

    async fn get_room(&self, room_id: Uuid) -> Result<Option<ChatRoom>, AppError> {
        read_json(&self.room_path(room_id)).await
    }

    async fn get_room_for_event(&self, event_id: Uuid) -> Result<Option<ChatRoom>, AppError> {
        match self.room_id_for_event(event_id).await? {
            Some(room_id) => self.get_room(room_id).await,
            None => Ok(None),
        }
    }

    async fn insert_room(&self, room: &ChatRoom) -> Result<ChatRoom, AppError> {
        let _guard = self.write_lock.lock().await;
        if let Some(existing) = self.get_room_for_event(room.event_id).await? {
            return Ok(existing);
        }
        write_json(&self.room_path(room.id), room).await?;
        tokio_fs::write(self.room_index_path(room.event_id), room.id.to_string()).await?;
        Ok(room.clone())
    }

    async fn close_room(&self, room_id: Uuid, closed_at: DateTime<Utc>) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;
        let path = self.room_path(room_id);
        let mut room: ChatRoom = read_json(&path)
            .await?
            .ok_or(AppError::RoomNotFound(room_id))?;
        room.status = RoomStatus::Closed;
        room.closed_at = Some(closed_at);
        write_json(&path, &room).await
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<StoredMessage, AppError> {
        let _guard = self.write_lock.lock().await;
        let log = self.read_messages(message.room_id).await?;
        if let Some(existing) = log
            .iter()
            .find(|m| m.idempotency_key == message.idempotency_key)
        {
            return Ok(existing.clone());
        }

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
        append_line(&self.message_log_path(message.room_id), &stored).await?;
        Ok(stored)
    }

    async fn find_message_by_key(
        &self,
        room_id: Uuid,
        idempotency_key: Uuid,
    ) -> Result<Option<StoredMessage>, AppError> {
        let _guard = self.write_lock.lock().await;
        Ok(self
            .read_messages(room_id)
            .await?
            .into_iter()
            .find(|m| m.idempotency_key == idempotency_key))
    }

    async fn list_messages(&self, room_id: Uuid) -> Result<Vec<StoredMessage>, AppError> {
        // Appends are not atomic with respect to readers.
        let _guard = self.write_lock.lock().await;
        let mut messages = self.read_messages(room_id).await?;
        messages.sort_by_key(|m| (m.created_at, m.seq));
        Ok(messages)
    }

    async fn latest_payment(&self, event_id: Uuid) -> Result<Option<PaymentRecord>, AppError> {
        let _guard = self.write_lock.lock().await;
        let records: Vec<PaymentRecord> = read_lines(&self.payment_log_path(event_id)).await?;
        Ok(records.into_iter().max_by_key(|p| p.created_at))
    }

    async fn record_payment(&self, payment: &PaymentRecord) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;
        append_line(&self.payment_log_path(payment.event_id), payment).await
    }

    async fn get_organizer_profile(
        &self,
        phone_number: &str,
    ) -> Result<Option<OrganizerProfile>, AppError> {
        read_json(&self.organizer_path(phone_number)).await
    }

    async fn upsert_organizer_profile(&self, profile: &OrganizerProfile) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;
        write_json(&self.organizer_path(&profile.phone_number), profile).await
    }

    async fn get_worker_profiles(
        &self,
        phone_numbers: &[String],
    ) -> Result<Vec<WorkerProfile>, AppError> {
        let mut profiles = Vec::with_capacity(phone_numbers.len());
        for phone_number in phone_numbers {
            if let Some(profile) = read_json(&self.worker_path(phone_number)).await? {
                profiles.push(profile);
            }
        }
        Ok(profiles)
    }

    async fn upsert_worker_profile(&self, profile: &WorkerProfile) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;
        write_json(&self.worker_path(&profile.phone_number), profile).await
    }
}
