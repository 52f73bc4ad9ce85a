// ================
// crates/backend-lib/src/models.rs
// ================
//! Rows read from and written to the store, and the state machines over
//! their status fields.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use crewchat_common::{CapacitySnapshot, CrewMember, RoomStatus, Seq};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Lifecycle status of an event
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    #[default]
    Upcoming,
    Started,
    Ended,
}

/// Organizer actions that move an event through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTransition {
    Start,
    End,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Upcoming => "upcoming",
            EventStatus::Started => "started",
            EventStatus::Ended => "ended",
        }
    }

    /// Transition table; anything not listed is rejected.
    pub fn apply(self, transition: EventTransition) -> Result<EventStatus, AppError> {
        match (self, transition) {
            (EventStatus::Upcoming, EventTransition::Start) => Ok(EventStatus::Started),
            (EventStatus::Upcoming | EventStatus::Started, EventTransition::End) => {
                Ok(EventStatus::Ended)
            },
            (EventStatus::Started, EventTransition::Start) => Err(AppError::InvalidTransition(
                "Event has already started".to_string(),
            )),
            (EventStatus::Ended, _) => Err(AppError::InvalidTransition(
                "Event has already ended".to_string(),
            )),
        }
    }
}

/// Chat room state of one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    NoRoom,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomTransition {
    Create,
    Close,
}

impl RoomState {
    pub fn of(room: Option<&ChatRoom>) -> Self {
        match room.map(|r| r.status) {
            None => RoomState::NoRoom,
            Some(RoomStatus::Open) => RoomState::Open,
            Some(RoomStatus::Closed) => RoomState::Closed,
        }
    }

    /// `Closed` is terminal: there is no reopen path.
    pub fn apply(self, transition: RoomTransition) -> Result<RoomState, AppError> {
        match (self, transition) {
            (RoomState::NoRoom, RoomTransition::Create) => Ok(RoomState::Open),
            (RoomState::Open, RoomTransition::Close) => Ok(RoomState::Closed),
            (RoomState::Open, RoomTransition::Create) => Err(AppError::InvalidTransition(
                "Chat room already exists".to_string(),
            )),
            (RoomState::NoRoom, RoomTransition::Close) => Err(AppError::InvalidTransition(
                "Event has no chat room".to_string(),
            )),
            (RoomState::Closed, _) => Err(AppError::InvalidTransition(
                "Chat room is closed".to_string(),
            )),
        }
    }
}

/// Where a worker stands on an event's staffing sets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    None,
    Applied,
    Accepted,
    Rejected,
}

/// Event row
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub organizer: String,
    pub male_crew: u32,
    pub female_crew: u32,
    pub male_crew_pay: f64,
    pub female_crew_pay: f64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub start_time: Option<NaiveTime>,
    #[serde(default)]
    pub end_time: Option<NaiveTime>,
    #[serde(default)]
    pub status: EventStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub applied: BTreeSet<String>,
    #[serde(default)]
    pub accepted: BTreeSet<String>,
    #[serde(default)]
    pub rejected: BTreeSet<String>,
    #[serde(default)]
    pub saved: BTreeSet<String>,
    #[serde(default)]
    pub status_to_pay: bool,
    /// Bumped on every write; used for compare-and-set updates
    #[serde(default)]
    pub version: u64,
}

impl Event {
    pub fn new(
        name: impl Into<String>,
        organizer: impl Into<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            organizer: organizer.into(),
            male_crew: 0,
            female_crew: 0,
            male_crew_pay: 0.0,
            female_crew_pay: 0.0,
            start_date,
            end_date,
            start_time: None,
            end_time: None,
            status: EventStatus::Upcoming,
            started_at: None,
            ended_at: None,
            applied: BTreeSet::new(),
            accepted: BTreeSet::new(),
            rejected: BTreeSet::new(),
            saved: BTreeSet::new(),
            status_to_pay: false,
            version: 0,
        }
    }

    pub fn with_crew(mut self, male_crew: u32, female_crew: u32) -> Self {
        self.male_crew = male_crew;
        self.female_crew = female_crew;
        self.recompute_capacity();
        self
    }

    pub fn with_pay(mut self, male_crew_pay: f64, female_crew_pay: f64) -> Self {
        self.male_crew_pay = male_crew_pay;
        self.female_crew_pay = female_crew_pay;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Total crew slots
    pub fn capacity(&self) -> u32 {
        self.male_crew + self.female_crew
    }

    pub fn has_open_slot(&self) -> bool {
        (self.accepted.len() as u64) < u64::from(self.capacity())
    }

    /// `status_to_pay` is true only when the crew is exactly full.
    pub fn recompute_capacity(&mut self) {
        self.status_to_pay = self.accepted.len() as u64 == u64::from(self.capacity());
    }

    pub fn is_organizer(&self, identity: &str) -> bool {
        self.organizer == identity
    }

    pub fn membership(&self, identity: &str) -> Membership {
        if self.accepted.contains(identity) {
            Membership::Accepted
        } else if self.applied.contains(identity) {
            Membership::Applied
        } else if self.rejected.contains(identity) {
            Membership::Rejected
        } else {
            Membership::None
        }
    }

    /// Inclusive number of calendar days the event runs
    pub fn days(&self) -> i64 {
        (self.end_date - self.start_date).num_days().max(0) + 1
    }

    pub fn capacity_snapshot(&self) -> CapacitySnapshot {
        CapacitySnapshot {
            event_id: self.id,
            capacity: self.capacity(),
            accepted: self.accepted.iter().cloned().collect(),
            applied_count: self.applied.len(),
            rejected_count: self.rejected.len(),
            status_to_pay: self.status_to_pay,
        }
    }
}

/// Application row, one per (event, worker)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Application {
    pub event_id: Uuid,
    pub phone_number: String,
    pub images: Vec<String>,
    pub experience: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// Evidence a worker submits with an application
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Evidence {
    pub images: Vec<String>,
    #[serde(default)]
    pub experience: Option<String>,
}

/// Chat room row, at most one per event
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChatRoom {
    pub id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    pub status: RoomStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

impl ChatRoom {
    pub fn for_event(event: &Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id: event.id,
            name: format!("{} Chat Room", event.name),
            status: RoomStatus::Open,
            created_at: Utc::now(),
            closed_at: None,
        }
    }
}

/// Message about to be appended
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub room_id: Uuid,
    pub phone_number: String,
    pub body: String,
    pub idempotency_key: Uuid,
}

/// Message row; immutable once stored
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub id: Uuid,
    pub room_id: Uuid,
    pub phone_number: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub seq: Seq,
    pub idempotency_key: Uuid,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

/// Payment row owned by the payment collaborator
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PaymentRecord {
    pub payment_id: String,
    pub event_id: Uuid,
    pub status: PaymentStatus,
    pub organizer: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OrganizerProfile {
    pub phone_number: String,
    pub company_name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WorkerProfile {
    pub phone_number: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub profile_pic: Option<String>,
}

impl WorkerProfile {
    /// "First Last", or `None` when both parts are blank
    pub fn display_name(&self) -> Option<String> {
        let full = format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or_default(),
            self.last_name.as_deref().unwrap_or_default()
        );
        let full = full.trim();
        (!full.is_empty()).then(|| full.to_string())
    }

    pub fn to_crew_member(&self) -> CrewMember {
        CrewMember {
            phone_number: self.phone_number.clone(),
            first_name: self.first_name.clone().unwrap_or_else(|| "N/A".to_string()),
            last_name: self.last_name.clone().unwrap_or_else(|| "N/A".to_string()),
            profile_pic: self.profile_pic.clone(),
        }
    }
}
