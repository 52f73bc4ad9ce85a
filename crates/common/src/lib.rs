// ================
// common/src/lib.rs
// ================
//! Common types and structures
//! used for communication between `crewchat` clients and the server.
//! This module defines the WebSocket protocol messages and the snapshots
//! returned by the staffing and chat operations.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-room sequence number assigned by the store on insert
pub type Seq = u64;

/// Messages sent from client to server
///
/// Identifiers travel as strings so that malformed values are reported by
/// validation with a readable reason instead of a deserialization failure.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join the chat room of an event
    /// # Fields
    /// * `room_id` - Room id, or the id of the event owning the room
    /// * `phone_number` - Caller identity
    JoinRoom {
        #[serde(alias = "event_id")]
        room_id: String,
        phone_number: String,
    },
    /// Stop receiving broadcasts for a room
    LeaveRoom { room_id: String },
    /// Fetch the full message history of a room
    FetchMessages {
        room_id: String,
        phone_number: String,
    },
    /// Post a message to a room
    /// # Fields
    /// * `client_message_id` - Optional idempotency key; resubmitting the same
    ///   key never stores a second copy
    SendMessage {
        room_id: String,
        phone_number: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_message_id: Option<String>,
    },
    /// List the rooms visible to the caller
    FetchChatRooms { phone_number: String },
    /// Event description and accepted crew roster
    GetEventDetails {
        event_id: String,
        phone_number: String,
    },
}

impl ClientMessage {
    /// Wire name of the variant, used in logs and metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::JoinRoom { .. } => "join_room",
            ClientMessage::LeaveRoom { .. } => "leave_room",
            ClientMessage::FetchMessages { .. } => "fetch_messages",
            ClientMessage::SendMessage { .. } => "send_message",
            ClientMessage::FetchChatRooms { .. } => "fetch_chat_rooms",
            ClientMessage::GetEventDetails { .. } => "get_event_details",
        }
    }
}

/// Messages sent from server to client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Reply to a successful join
    RoomJoined { room: RoomSnapshot },
    /// Reply to a leave request
    RoomLeft { room_id: Uuid },
    /// Reply to a history fetch
    Messages {
        room_id: Uuid,
        messages: Vec<ChatMessage>,
    },
    /// Acknowledgment sent to the author once the message is stored
    MessageAccepted { message: ChatMessage },
    /// Fan-out of a stored message to every connection in the room
    NewMessage { message: ChatMessage },
    /// Reply to a room listing
    ChatRooms {
        upcoming_events: Vec<ChatRoomSummary>,
        completed_events: Vec<ChatRoomSummary>,
    },
    /// Reply to an event details request
    EventDetails { details: EventDetails },
    /// Pushed to room members when the organizer ends the event
    EventEnded { event_id: Uuid, room_id: Uuid },
    /// Error response with a stable kind and code
    Error {
        kind: ErrorKind,
        code: String,
        message: String,
    },
    /// Error response for frames that are not valid requests
    MalformedMessage { err_msg: String },
}

/// Stable error categories exposed to clients
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Unauthorized,
    Conflict,
    PersistenceError,
    RoomClosed,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Conflict => "conflict",
            ErrorKind::PersistenceError => "persistence_error",
            ErrorKind::RoomClosed => "room_closed",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Lifecycle status of a chat room
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Open,
    Closed,
}

/// How a message author relates to the event
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    Organizer,
    GigWorker,
    Unknown,
}

/// A stored message enriched with sender display metadata
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: Uuid,
    pub room_id: Uuid,
    pub phone_number: String,
    pub sender_name: String,
    pub sender_role: SenderRole,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub seq: Seq,
}

/// What a joining client learns about the room
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RoomSnapshot {
    pub room_id: Uuid,
    pub event_id: Uuid,
    pub room_name: String,
    pub event_name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: RoomStatus,
}

/// Staffing counters of an event after a ledger operation
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CapacitySnapshot {
    pub event_id: Uuid,
    pub capacity: u32,
    pub accepted: Vec<String>,
    pub applied_count: usize,
    pub rejected_count: usize,
    pub status_to_pay: bool,
}

impl CapacitySnapshot {
    pub fn open_slots(&self) -> u32 {
        self.capacity.saturating_sub(self.accepted.len() as u32)
    }
}

/// One entry of a room listing
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChatRoomSummary {
    pub id: Uuid,
    pub room_id: Uuid,
    pub event_name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub total_members: usize,
    pub organizer_phone_number: String,
    pub accepted_members: Vec<String>,
    pub status: String,
}

/// A member of the accepted crew as shown to other room members
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CrewMember {
    pub phone_number: String,
    pub first_name: String,
    pub last_name: String,
    pub profile_pic: Option<String>,
}

/// Event description and crew roster
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EventDetails {
    pub event_id: Uuid,
    pub event_name: String,
    pub description: String,
    pub room_id: Option<Uuid>,
    pub selected_crew: Vec<CrewMember>,
}

/// Amount an organizer owes for the crew of an event
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PaymentQuote {
    pub event_id: Uuid,
    pub crew_slots: u32,
    pub male_pay: f64,
    pub female_pay: f64,
    pub days: i64,
    pub total_due: f64,
    pub latest_payment_status: Option<String>,
}
