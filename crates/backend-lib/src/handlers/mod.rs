// ============================
// crates/backend-lib/src/handlers/mod.rs
// ============================
//! HTTP handlers for staffing, event lifecycle and chat.
//!
//! Callers identify themselves with a `phone_number` in the body or query.
//! Path identifiers are parsed by the handlers so malformed ids surface as
//! `invalid_input` errors like on the WebSocket.
use std::sync::Arc;

use axum::{
    routing::{delete, get, post, put},
    Router,
};

use crate::storage::Storage;
use crate::AppState;

pub mod chat;
pub mod events;

pub fn api_routes<S: Storage + 'static>() -> Router<Arc<AppState<S>>> {
    Router::new()
        .route("/api/events/{event_id}", delete(events::delete_event::<S>))
        .route("/api/events/{event_id}/applications", post(events::apply::<S>))
        .route(
            "/api/events/{event_id}/applications/{phone_number}",
            delete(events::withdraw::<S>),
        )
        .route(
            "/api/events/{event_id}/applications/{phone_number}/status",
            put(events::decide::<S>),
        )
        .route("/api/events/{event_id}/save", post(events::save::<S>))
        .route("/api/events/{event_id}/capacity", get(events::capacity::<S>))
        .route("/api/events/{event_id}/payment-quote", get(events::payment_quote::<S>))
        .route("/api/events/{event_id}/start", post(events::start::<S>))
        .route("/api/events/{event_id}/end", post(events::end::<S>))
        .route(
            "/api/chat/rooms/{room_id}/messages",
            get(chat::history::<S>).post(chat::send::<S>),
        )
}
