//! Test utilities shared by the integration tests
//!
//! Builds application state over either storage backend and seeds events,
//! payments and profiles the way the external collaborators would.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use crewchat_backend::{
    config::Settings,
    models::{Event, OrganizerProfile, PaymentRecord, PaymentStatus, WorkerProfile},
    storage::{FlatFileStorage, MemoryStorage, Storage},
    AppState,
};
use tempfile::TempDir;
use uuid::Uuid;

pub const ORGANIZER: &str = "+15550000";
pub const CREW_A: &str = "+15550001";
pub const CREW_B: &str = "+15550002";
pub const OUTSIDER: &str = "+15559999";

/// Settings with short timeouts and backoff so failure paths stay fast
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.storage.timeout_ms = 2_000;
    settings.retry.base_delay_ms = 5;
    settings.chat.max_message_length = 500;
    settings
}

pub fn memory_state() -> (Arc<AppState<MemoryStorage>>, MemoryStorage) {
    let storage = MemoryStorage::new();
    let state = Arc::new(AppState::new(storage.clone(), test_settings()));
    (state, storage)
}

/// State over a flat-file store; keep the `TempDir` alive for the test
pub fn flat_file_state() -> (Arc<AppState<FlatFileStorage>>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let storage = FlatFileStorage::new(temp_dir.path()).unwrap();
    let mut settings = test_settings();
    settings.storage.path = temp_dir.path().to_path_buf();
    (Arc::new(AppState::new(storage, settings)), temp_dir)
}

pub fn next_week() -> NaiveDate {
    Utc::now().date_naive() + Duration::days(7)
}

/// Insert an upcoming event organized by `ORGANIZER`
pub async fn seed_event<S: Storage>(storage: &S, male_crew: u32, female_crew: u32) -> Event {
    let start = next_week();
    let event = Event::new("Summer Music Festival", ORGANIZER, start, start + Duration::days(1))
        .with_crew(male_crew, female_crew)
        .with_pay(150.0, 150.0)
        .with_description("Two days of stage crew and hospitality");
    storage.insert_event(&event).await.unwrap();
    storage
        .upsert_organizer_profile(&OrganizerProfile {
            phone_number: ORGANIZER.to_string(),
            company_name: "Festival Works Ltd".to_string(),
        })
        .await
        .unwrap();
    event
}

pub async fn record_payment<S: Storage>(storage: &S, event_id: Uuid, status: PaymentStatus) {
    storage
        .record_payment(&PaymentRecord {
            payment_id: format!("pay_{}", Uuid::new_v4().simple()),
            event_id,
            status,
            organizer: ORGANIZER.to_string(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();
}

pub async fn seed_worker<S: Storage>(storage: &S, phone_number: &str, first: &str, last: &str) {
    storage
        .upsert_worker_profile(&WorkerProfile {
            phone_number: phone_number.to_string(),
            first_name: Some(first.to_string()),
            last_name: Some(last.to_string()),
            profile_pic: None,
        })
        .await
        .unwrap();
}

pub fn evidence() -> crewchat_backend::models::Evidence {
    crewchat_backend::models::Evidence {
        images: vec!["uploads/badge.jpg".to_string(), "uploads/id.jpg".to_string()],
        experience: Some("Stage hand for five seasons".to_string()),
    }
}
