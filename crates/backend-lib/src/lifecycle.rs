// ============================
// crates/backend-lib/src/lifecycle.rs
// ============================
//! Room lifecycle: lazy creation, joining, and closing on event end.
//!
//! Per event the room moves `no_room -> open -> closed`. A room is created
//! the first time someone asks for it once the crew has at least one
//! accepted member and the latest payment is completed. The store returns
//! the existing row on a creation race, so each event gets one room.
use std::sync::Arc;

use chrono::Utc;
use crewchat_common::{ChatRoomSummary, EventDetails, RoomSnapshot, RoomStatus};
use metrics::counter;
use uuid::Uuid;

use crate::channel::MessageChannel;
use crate::error::AppError;
use crate::gate;
use crate::ledger::StaffingLedger;
use crate::metrics::{ROOM_CREATED, ROOM_JOINED};
use crate::models::{
    ChatRoom, Event, EventStatus, EventTransition, PaymentStatus, RoomState, RoomTransition,
    WorkerProfile,
};
use crate::registry::{ConnectionId, Outbound, RoomRegistry};
use crate::storage::{Storage, StoreClient};
use crate::validation::{validate_confirmation, validate_phone_number};

pub const NO_ACCEPTED_MEMBERS: &str = "no accepted members yet";
pub const PAYMENT_NOT_COMPLETED: &str = "payment not completed";
pub const EVENT_ENDED: &str = "event has ended";

/// Rooms visible to one caller
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RoomListing {
    pub upcoming: Vec<ChatRoomSummary>,
    pub completed: Vec<ChatRoomSummary>,
}

pub struct RoomLifecycle<S> {
    store: Arc<StoreClient<S>>,
    ledger: Arc<StaffingLedger<S>>,
    channel: Arc<MessageChannel<S>>,
    registry: Arc<RoomRegistry>,
}

impl<S: Storage> RoomLifecycle<S> {
    pub fn new(
        store: Arc<StoreClient<S>>,
        ledger: Arc<StaffingLedger<S>>,
        channel: Arc<MessageChannel<S>>,
        registry: Arc<RoomRegistry>,
    ) -> Self {
        Self {
            store,
            ledger,
            channel,
            registry,
        }
    }

    /// Return the event's room, creating it if the preconditions hold
    pub async fn ensure_room(&self, event: &Event) -> Result<ChatRoom, AppError> {
        let existing = self
            .store
            .read("get_room_for_event", |s| s.get_room_for_event(event.id))
            .await?;
        if let Some(room) = existing {
            return Ok(room);
        }

        if event.accepted.is_empty() {
            return Err(AppError::RoomUnavailable(NO_ACCEPTED_MEMBERS.to_string()));
        }
        if event.status == EventStatus::Ended {
            return Err(AppError::RoomUnavailable(EVENT_ENDED.to_string()));
        }
        let payment = self
            .store
            .read("latest_payment", |s| s.latest_payment(event.id))
            .await?;
        if payment.map(|p| p.status) != Some(PaymentStatus::Completed) {
            return Err(AppError::RoomUnavailable(PAYMENT_NOT_COMPLETED.to_string()));
        }

        RoomState::NoRoom.apply(RoomTransition::Create)?;
        let candidate = ChatRoom::for_event(event);
        let room = self
            .store
            .write("insert_room", |s| s.insert_room(&candidate))
            .await?;
        if room.id == candidate.id {
            counter!(ROOM_CREATED).increment(1);
            tracing::info!(event_id = %event.id, room_id = %room.id, "chat room created");
        }
        Ok(room)
    }

    /// Join by room id or by the id of the event owning the room.
    ///
    /// The caller is authorized before any room is created.
    #[tracing::instrument(skip(self, outbound))]
    pub async fn join_room(
        &self,
        room_or_event_id: Uuid,
        caller: &str,
        connection_id: ConnectionId,
        outbound: Outbound,
    ) -> Result<RoomSnapshot, AppError> {
        validate_phone_number(caller)?;

        let by_room = self
            .store
            .read("get_room", |s| s.get_room(room_or_event_id))
            .await?;
        let (room, event) = match by_room {
            Some(room) => {
                let event = gate::load_authorized(&self.store, room.event_id, caller).await?;
                (room, event)
            },
            None => {
                let event = self
                    .store
                    .read("get_event", |s| s.get_event(room_or_event_id))
                    .await?
                    .ok_or(AppError::RoomNotFound(room_or_event_id))?;
                gate::authorize(&event, caller)?;
                let room = self.ensure_room(&event).await?;
                (room, event)
            },
        };

        self.registry.join(room.id, connection_id, caller, outbound);
        counter!(ROOM_JOINED).increment(1);

        Ok(RoomSnapshot {
            room_id: room.id,
            event_id: event.id,
            room_name: room.name,
            event_name: event.name,
            start_date: event.start_date,
            end_date: event.end_date,
            status: room.status,
        })
    }

    pub fn leave_room(&self, room_id: Uuid, connection_id: ConnectionId) -> bool {
        self.registry.leave(room_id, connection_id)
    }

    #[tracing::instrument(skip(self))]
    pub async fn start_event(&self, event_id: Uuid, organizer: &str) -> Result<EventStatus, AppError> {
        validate_phone_number(organizer)?;
        let event = self
            .ledger
            .update_event(event_id, |event| {
                gate::require_organizer(event, organizer)?;
                event.status = event.status.apply(EventTransition::Start)?;
                event.started_at = Some(Utc::now());
                Ok(true)
            })
            .await?;
        tracing::info!("event started");
        Ok(event.status)
    }

    /// End the event, close its room and tell connected members.
    ///
    /// Calling again after the room failed to close finishes the job.
    #[tracing::instrument(skip(self))]
    pub async fn end_event(
        &self,
        event_id: Uuid,
        organizer: &str,
        confirm: bool,
    ) -> Result<Option<ChatRoom>, AppError> {
        validate_phone_number(organizer)?;
        validate_confirmation(confirm)?;

        let mut transitioned = false;
        self.ledger
            .update_event(event_id, |event| {
                gate::require_organizer(event, organizer)?;
                if event.status == EventStatus::Ended {
                    transitioned = false;
                    return Ok(false);
                }
                event.status = event.status.apply(EventTransition::End)?;
                event.ended_at = Some(Utc::now());
                transitioned = true;
                Ok(true)
            })
            .await?;

        let room = self
            .store
            .read("get_room_for_event", |s| s.get_room_for_event(event_id))
            .await?;
        let room = match room {
            Some(room) if RoomState::of(Some(&room)) == RoomState::Open => room,
            // Nothing left to close
            other if transitioned => {
                self.ledger.forget(event_id);
                tracing::info!("event ended");
                return Ok(other);
            },
            _ => {
                return Err(AppError::InvalidTransition(
                    "Event has already ended".to_string(),
                ))
            },
        };

        RoomState::Open.apply(RoomTransition::Close)?;
        let closed_at = self.channel.close_room(room.id, event_id).await?;
        self.ledger.forget(event_id);
        tracing::info!(room_id = %room.id, "event ended");

        Ok(Some(ChatRoom {
            status: RoomStatus::Closed,
            closed_at: Some(closed_at),
            ..room
        }))
    }

    /// Delete an event with everything hanging off it
    #[tracing::instrument(skip(self))]
    pub async fn delete_event(&self, event_id: Uuid, organizer: &str) -> Result<(), AppError> {
        validate_phone_number(organizer)?;
        gate::load_as_organizer(&self.store, event_id, organizer).await?;

        let room = self
            .store
            .read("get_room_for_event", |s| s.get_room_for_event(event_id))
            .await?;
        self.store
            .write("delete_event", |s| s.delete_event(event_id))
            .await?;

        if let Some(room) = room {
            self.registry.drop_room(room.id);
            self.channel.forget(room.id);
        }
        self.ledger.forget(event_id);
        tracing::info!("event deleted");
        Ok(())
    }

    /// Rooms of every event the caller organizes or crews, split by whether
    /// the event is still ahead
    #[tracing::instrument(skip(self))]
    pub async fn list_rooms(&self, caller: &str) -> Result<RoomListing, AppError> {
        validate_phone_number(caller)?;

        let events = self
            .store
            .read("events_for_identity", |s| s.events_for_identity(caller))
            .await?;
        let today = Utc::now().date_naive();

        let mut listing = RoomListing::default();
        for event in events.iter().filter(|e| !e.accepted.is_empty()) {
            let room = match self.ensure_room(event).await {
                Ok(room) => room,
                Err(AppError::RoomUnavailable(reason)) => {
                    tracing::debug!(event_id = %event.id, reason, "no room yet");
                    continue;
                },
                Err(e) => return Err(e),
            };

            let summary = ChatRoomSummary {
                id: event.id,
                room_id: room.id,
                event_name: event.name.clone(),
                start_date: event.start_date,
                end_date: event.end_date,
                start_time: event.start_time,
                end_time: event.end_time,
                total_members: event.accepted.len() + 1,
                organizer_phone_number: event.organizer.clone(),
                accepted_members: event.accepted.iter().cloned().collect(),
                status: event.status.as_str().to_string(),
            };
            if event.status == EventStatus::Ended || event.end_date < today {
                listing.completed.push(summary);
            } else {
                listing.upcoming.push(summary);
            }
        }
        Ok(listing)
    }

    /// Description, room and accepted crew roster of an event
    #[tracing::instrument(skip(self))]
    pub async fn event_details(&self, event_id: Uuid, caller: &str) -> Result<EventDetails, AppError> {
        validate_phone_number(caller)?;
        let event = gate::load_authorized(&self.store, event_id, caller).await?;

        let room = self
            .store
            .read("get_room_for_event", |s| s.get_room_for_event(event_id))
            .await?;
        let crew: Vec<String> = event.accepted.iter().cloned().collect();
        let profiles = self
            .store
            .read("get_worker_profiles", |s| s.get_worker_profiles(&crew))
            .await?;

        // Crew without a profile still appear, with placeholder names
        let selected_crew = crew
            .iter()
            .map(|phone| {
                profiles
                    .iter()
                    .find(|p| &p.phone_number == phone)
                    .cloned()
                    .unwrap_or_else(|| WorkerProfile {
                        phone_number: phone.clone(),
                        first_name: None,
                        last_name: None,
                        profile_pic: None,
                    })
                    .to_crew_member()
            })
            .collect();

        Ok(EventDetails {
            event_id,
            event_name: event.name,
            description: event.description.unwrap_or_default(),
            room_id: room.map(|r| r.id),
            selected_crew,
        })
    }
}
