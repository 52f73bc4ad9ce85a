// ============================
// crates/backend-lib/src/storage/mod.rs
// ============================
//! Storage abstraction over the relational store, with in-memory and
//! flat-file implementations.
//!
//! Every call the services make goes through [`StoreClient`], which bounds it
//! with a timeout and retries failed reads with exponential backoff. Writes
//! are never retried here.
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    Application, ChatRoom, Event, NewMessage, OrganizerProfile, PaymentRecord, StoredMessage,
    WorkerProfile,
};

mod flat_file;
mod memory;

pub use flat_file::FlatFileStorage;
pub use memory::{Fault, MemoryStorage};

/// Trait for storage backends
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get_event(&self, event_id: Uuid) -> Result<Option<Event>, AppError>;

    async fn insert_event(&self, event: &Event) -> Result<(), AppError>;

    /// Replace the event row only if its stored version is still
    /// `expected_version`. Returns `false` when another writer got there first.
    async fn compare_and_swap_event(
        &self,
        expected_version: u64,
        event: &Event,
    ) -> Result<bool, AppError>;

    /// Delete an event together with its applications, chat room and messages
    async fn delete_event(&self, event_id: Uuid) -> Result<bool, AppError>;

    /// Events organized by `identity` or listing it as accepted
    async fn events_for_identity(&self, identity: &str) -> Result<Vec<Event>, AppError>;

    async fn get_application(
        &self,
        event_id: Uuid,
        worker: &str,
    ) -> Result<Option<Application>, AppError>;

    /// Fails with `DuplicateApplication` if the (event, worker) row exists
    async fn insert_application(&self, application: &Application) -> Result<(), AppError>;

    async fn delete_application(&self, event_id: Uuid, worker: &str) -> Result<bool, AppError>;

    async fn get_room(&self, room_id: Uuid) -> Result<Option<ChatRoom>, AppError>;

    async fn get_room_for_event(&self, event_id: Uuid) -> Result<Option<ChatRoom>, AppError>;

    /// Insert unless the event already has a room; returns the stored row
    async fn insert_room(&self, room: &ChatRoom) -> Result<ChatRoom, AppError>;

    async fn close_room(&self, room_id: Uuid, closed_at: DateTime<Utc>) -> Result<(), AppError>;

    /// Append a message. Idempotent on `(room_id, idempotency_key)`: a
    /// repeated key returns the row stored the first time.
    async fn insert_message(&self, message: &NewMessage) -> Result<StoredMessage, AppError>;

    async fn find_message_by_key(
        &self,
        room_id: Uuid,
        idempotency_key: Uuid,
    ) -> Result<Option<StoredMessage>, AppError>;

    /// All messages of a room, oldest first
    async fn list_messages(&self, room_id: Uuid) -> Result<Vec<StoredMessage>, AppError>;

    /// Most recent payment record of an event
    async fn latest_payment(&self, event_id: Uuid) -> Result<Option<PaymentRecord>, AppError>;

    async fn record_payment(&self, payment: &PaymentRecord) -> Result<(), AppError>;

    async fn get_organizer_profile(
        &self,
        phone_number: &str,
    ) -> Result<Option<OrganizerProfile>, AppError>;

    async fn upsert_organizer_profile(&self, profile: &OrganizerProfile) -> Result<(), AppError>;

    async fn get_worker_profiles(
        &self,
        phone_numbers: &[String],
    ) -> Result<Vec<WorkerProfile>, AppError>;

    async fn upsert_worker_profile(&self, profile: &WorkerProfile) -> Result<(), AppError>;
}

/// Backoff schedule for store reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1500),
        }
    }
}

/// Timeout- and retry-aware front for a [`Storage`] backend
pub struct StoreClient<S> {
    storage: S,
    timeout: Duration,
    retry: RetryPolicy,
}

impl<S: Storage> StoreClient<S> {
    pub fn new(storage: S, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            storage,
            timeout,
            retry,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Run a read, retrying retryable failures with exponential backoff
    pub async fn read<'a, T, F, Fut>(&'a self, operation: &'static str, call: F) -> Result<T, AppError>
    where
        F: Fn(&'a S) -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let mut attempt = 1;
        let mut delay = self.retry.base_delay;

        loop {
            match self.bounded(operation, call(&self.storage)).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "retrying store read: {e}"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Run a write once, bounded by the timeout
    pub async fn write<'a, T, F, Fut>(&'a self, operation: &'static str, call: F) -> Result<T, AppError>
    where
        F: FnOnce(&'a S) -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        self.bounded(operation, call(&self.storage)).await
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, AppError>>,
    ) -> Result<T, AppError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if e.is_retryable() {
                    tracing::error!(operation, "store call failed: {e}");
                }
                Err(e)
            },
            Err(_) => {
                tracing::error!(operation, timeout_ms = self.timeout.as_millis() as u64, "store call timed out");
                Err(AppError::StoreTimeout(operation))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn client(storage: MemoryStorage, timeout_ms: u64) -> StoreClient<MemoryStorage> {
        StoreClient::new(
            storage,
            Duration::from_millis(timeout_ms),
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
            },
        )
    }

    fn event() -> Event {
        let day = NaiveDate::from_ymd_opt(2026, 5, 1).unwrap();
        Event::new("Launch", "+15550000", day, day).with_crew(1, 0)
    }

    #[tokio::test]
    async fn test_read_retries_transient_failures() {
        let storage = MemoryStorage::new();
        let event = event();
        storage.insert_event(&event).await.unwrap();
        storage.inject_fault("get_event", Fault::Fail);
        storage.inject_fault("get_event", Fault::Fail);

        let store = client(storage, 500);
        let found = store.read("get_event", |s| s.get_event(event.id)).await.unwrap();
        assert_eq!(found.map(|e| e.id), Some(event.id));
    }

    #[tokio::test]
    async fn test_read_gives_up_after_max_attempts() {
        let storage = MemoryStorage::new();
        for _ in 0..3 {
            storage.inject_fault("get_event", Fault::Fail);
        }

        let store = client(storage, 500);
        let err = store
            .read("get_event", |s| s.get_event(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_write_is_not_retried() {
        let storage = MemoryStorage::new();
        storage.inject_fault("insert_event", Fault::Fail);

        let store = client(storage.clone(), 500);
        let event = event();
        assert!(store.write("insert_event", |s| s.insert_event(&event)).await.is_err());
        assert!(storage.get_event(event.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let storage = MemoryStorage::new();
        storage.inject_fault("insert_event", Fault::Delay(Duration::from_millis(200)));

        let store = client(storage, 20);
        let event = event();
        let err = store
            .write("insert_event", |s| s.insert_event(&event))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StoreTimeout("insert_event")));
    }
}
