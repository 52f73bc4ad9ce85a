// ============================
// crates/backend-lib/src/handlers/chat.rs
// ============================
//! Chat history and posting over HTTP, for clients without a socket.
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use crewchat_common::ChatMessage;
use serde::Deserialize;

use super::events::CallerQuery;
use crate::error::AppError;
use crate::storage::Storage;
use crate::validation::parse_id;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub phone_number: String,
    pub message: String,
    #[serde(default)]
    pub client_message_id: Option<String>,
}

pub async fn history<S: Storage + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(room_id): Path<String>,
    Query(caller): Query<CallerQuery>,
) -> Result<Json<Vec<ChatMessage>>, AppError> {
    let room_id = parse_id("room_id", &room_id)?;
    let messages = state
        .channel
        .fetch_history(room_id, &caller.phone_number)
        .await?;
    Ok(Json(messages))
}

pub async fn send<S: Storage + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(room_id): Path<String>,
    Json(request): Json<SendRequest>,
) -> Result<(StatusCode, Json<ChatMessage>), AppError> {
    let room_id = parse_id("room_id", &room_id)?;
    let key = request
        .client_message_id
        .as_deref()
        .map(|k| parse_id("client_message_id", k))
        .transpose()?;
    let message = state
        .channel
        .send(room_id, &request.phone_number, &request.message, key)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}
