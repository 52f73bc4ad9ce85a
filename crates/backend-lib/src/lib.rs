// ============================
// crates/backend-lib/src/lib.rs
// ============================
//! Core backend functionality for the `crewchat` server: staffing ledger,
//! authorization gate, room registry, message channel and room lifecycle,
//! surfaced over WebSocket and HTTP.

pub mod channel;
pub mod config;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod ledger;
pub mod lifecycle;
pub mod metrics;
pub mod models;
pub mod registry;
pub mod storage;
pub mod validation;
pub mod websocket;
pub mod ws_router;

use std::sync::Arc;

use crate::channel::MessageChannel;
use crate::config::Settings;
use crate::ledger::StaffingLedger;
use crate::lifecycle::RoomLifecycle;
use crate::registry::RoomRegistry;
use crate::storage::{Storage, StoreClient};

/// Application state shared across all handlers
pub struct AppState<S> {
    /// Configuration settings
    pub settings: Arc<Settings>,
    /// Timeout- and retry-aware storage front
    pub store: Arc<StoreClient<S>>,
    /// Live connections by room id
    pub registry: Arc<RoomRegistry>,
    pub ledger: Arc<StaffingLedger<S>>,
    pub channel: Arc<MessageChannel<S>>,
    pub lifecycle: Arc<RoomLifecycle<S>>,
}

impl<S: Storage> AppState<S> {
    /// Create a new application state
    pub fn new(storage: S, settings: Settings) -> Self {
        let store = Arc::new(StoreClient::new(
            storage,
            settings.storage.timeout(),
            settings.retry.policy(),
        ));
        let registry = Arc::new(RoomRegistry::new());
        let ledger = Arc::new(StaffingLedger::new(
            store.clone(),
            registry.clone(),
            settings.staffing.clone(),
        ));
        let channel = Arc::new(MessageChannel::new(
            store.clone(),
            registry.clone(),
            settings.chat.max_message_length,
        ));
        let lifecycle = Arc::new(RoomLifecycle::new(
            store.clone(),
            ledger.clone(),
            channel.clone(),
            registry.clone(),
        ));

        Self {
            settings: Arc::new(settings),
            store,
            registry,
            ledger,
            channel,
            lifecycle,
        }
    }

    pub fn storage(&self) -> &S {
        self.store.storage()
    }
}
