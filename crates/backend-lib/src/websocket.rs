// ==================
// crates/backend-lib/src/websocket.rs
// ==================
//! WebSocket handler module.
//!
//! One `WebSocketHandler` lives for the duration of a connection. It owns
//! the connection's registry guard and outbound queue, and turns each text
//! frame into exactly one reply through an exhaustive match over
//! [`ClientMessage`]. Room broadcasts reach the same queue independently.
use std::sync::Arc;

use crewchat_common::{ClientMessage, ServerMessage};
use tracing::debug;
use uuid::Uuid;

use crate::error::AppError;
use crate::registry::{ConnectionGuard, ConnectionId, Outbound};
use crate::storage::Storage;
use crate::validation::{self, parse_id};
use crate::AppState;

/// WebSocket handler for processing messages
pub struct WebSocketHandler<S> {
    state: Arc<AppState<S>>,
    guard: ConnectionGuard,
    outbound: Outbound,
}

impl<S: Storage + 'static> WebSocketHandler<S> {
    pub fn new(state: Arc<AppState<S>>, outbound: Outbound) -> Self {
        let guard = ConnectionGuard::new(state.registry.clone(), Uuid::new_v4());
        Self {
            state,
            guard,
            outbound,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.guard.connection_id()
    }

    /// Parse, validate and handle one text frame
    pub async fn handle_text(&self, text: &str) -> ServerMessage {
        let message = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(connection_id = %self.connection_id(), "malformed frame: {e}");
                return ServerMessage::MalformedMessage {
                    err_msg: e.to_string(),
                };
            },
        };

        let kind = message.kind();
        debug!(connection_id = %self.connection_id(), kind, "frame received");
        match self.handle_message(message).await {
            Ok(reply) => reply,
            Err(e) => {
                debug!(connection_id = %self.connection_id(), kind, code = e.error_code(), "request failed: {e}");
                e.to_server_message()
            },
        }
    }

    /// Handle a client message
    pub async fn handle_message(&self, message: ClientMessage) -> Result<ServerMessage, AppError> {
        validation::validate_client_message(&message, self.state.settings.chat.max_message_length)?;

        match message {
            ClientMessage::JoinRoom {
                room_id,
                phone_number,
            } => {
                let id = parse_id("room_id", &room_id)?;
                let room = self
                    .state
                    .lifecycle
                    .join_room(id, &phone_number, self.connection_id(), self.outbound.clone())
                    .await?;
                Ok(ServerMessage::RoomJoined { room })
            },
            ClientMessage::LeaveRoom { room_id } => {
                let room_id = parse_id("room_id", &room_id)?;
                self.state.lifecycle.leave_room(room_id, self.connection_id());
                Ok(ServerMessage::RoomLeft { room_id })
            },
            ClientMessage::FetchMessages {
                room_id,
                phone_number,
            } => {
                let room_id = parse_id("room_id", &room_id)?;
                let messages = self
                    .state
                    .channel
                    .fetch_history(room_id, &phone_number)
                    .await?;
                Ok(ServerMessage::Messages { room_id, messages })
            },
            ClientMessage::SendMessage {
                room_id,
                phone_number,
                message,
                client_message_id,
            } => {
                let room_id = parse_id("room_id", &room_id)?;
                let key = client_message_id
                    .as_deref()
                    .map(|k| parse_id("client_message_id", k))
                    .transpose()?;
                let message = self
                    .state
                    .channel
                    .send(room_id, &phone_number, &message, key)
                    .await?;
                Ok(ServerMessage::MessageAccepted { message })
            },
            ClientMessage::FetchChatRooms { phone_number } => {
                let listing = self.state.lifecycle.list_rooms(&phone_number).await?;
                Ok(ServerMessage::ChatRooms {
                    upcoming_events: listing.upcoming,
                    completed_events: listing.completed,
                })
            },
            ClientMessage::GetEventDetails {
                event_id,
                phone_number,
            } => {
                let event_id = parse_id("event_id", &event_id)?;
                let details = self
                    .state
                    .lifecycle
                    .event_details(event_id, &phone_number)
                    .await?;
                Ok(ServerMessage::EventDetails { details })
            },
        }
    }
}
