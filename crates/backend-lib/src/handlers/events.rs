// ============================
// crates/backend-lib/src/handlers/events.rs
// ============================
//! Staffing and event lifecycle endpoints.
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use crewchat_common::{CapacitySnapshot, PaymentQuote, RoomStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Application, EventStatus, Evidence};
use crate::storage::Storage;
use crate::validation::parse_id;
use crate::AppState;

type Shared<S> = State<Arc<AppState<S>>>;

/// Caller identity passed in a query string
#[derive(Debug, Deserialize)]
pub struct CallerQuery {
    pub phone_number: String,
}

/// Caller identity passed in a body
#[derive(Debug, Deserialize)]
pub struct CallerBody {
    pub phone_number: String,
}

#[derive(Debug, Deserialize)]
pub struct ApplyRequest {
    pub phone_number: String,
    pub images: Vec<String>,
    #[serde(default)]
    pub experience: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accepted,
    Rejected,
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub status: Decision,
    /// Identity of the organizer making the decision
    pub phone_number: String,
}

#[derive(Debug, Deserialize)]
pub struct EndRequest {
    pub phone_number: String,
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct EventStatusResponse {
    pub event_id: Uuid,
    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_status: Option<RoomStatus>,
}

pub async fn apply<S: Storage + 'static>(
    State(state): Shared<S>,
    Path(event_id): Path<String>,
    Json(request): Json<ApplyRequest>,
) -> Result<(StatusCode, Json<Application>), AppError> {
    let event_id = parse_id("event_id", &event_id)?;
    let evidence = Evidence {
        images: request.images,
        experience: request.experience,
    };
    let application = state
        .ledger
        .apply(event_id, &request.phone_number, evidence)
        .await?;
    Ok((StatusCode::CREATED, Json(application)))
}

pub async fn withdraw<S: Storage + 'static>(
    State(state): Shared<S>,
    Path((event_id, phone_number)): Path<(String, String)>,
) -> Result<Json<CapacitySnapshot>, AppError> {
    let event_id = parse_id("event_id", &event_id)?;
    let snapshot = state.ledger.withdraw(event_id, &phone_number).await?;
    Ok(Json(snapshot))
}

/// Accept or reject an applicant
pub async fn decide<S: Storage + 'static>(
    State(state): Shared<S>,
    Path((event_id, worker)): Path<(String, String)>,
    Json(request): Json<DecisionRequest>,
) -> Result<Json<CapacitySnapshot>, AppError> {
    let event_id = parse_id("event_id", &event_id)?;
    let snapshot = match request.status {
        Decision::Accepted => {
            state
                .ledger
                .accept(event_id, &request.phone_number, &worker)
                .await?
        },
        Decision::Rejected => {
            state
                .ledger
                .reject(event_id, &request.phone_number, &worker)
                .await?
        },
    };
    Ok(Json(snapshot))
}

pub async fn save<S: Storage + 'static>(
    State(state): Shared<S>,
    Path(event_id): Path<String>,
    Json(request): Json<CallerBody>,
) -> Result<StatusCode, AppError> {
    let event_id = parse_id("event_id", &event_id)?;
    state
        .ledger
        .save_for_later(event_id, &request.phone_number)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn capacity<S: Storage + 'static>(
    State(state): Shared<S>,
    Path(event_id): Path<String>,
    Query(caller): Query<CallerQuery>,
) -> Result<Json<CapacitySnapshot>, AppError> {
    let event_id = parse_id("event_id", &event_id)?;
    Ok(Json(state.ledger.snapshot(event_id, &caller.phone_number).await?))
}

pub async fn payment_quote<S: Storage + 'static>(
    State(state): Shared<S>,
    Path(event_id): Path<String>,
    Query(caller): Query<CallerQuery>,
) -> Result<Json<PaymentQuote>, AppError> {
    let event_id = parse_id("event_id", &event_id)?;
    Ok(Json(
        state
            .ledger
            .payment_quote(event_id, &caller.phone_number)
            .await?,
    ))
}

pub async fn start<S: Storage + 'static>(
    State(state): Shared<S>,
    Path(event_id): Path<String>,
    Json(request): Json<CallerBody>,
) -> Result<Json<EventStatusResponse>, AppError> {
    let event_id = parse_id("event_id", &event_id)?;
    let status = state
        .lifecycle
        .start_event(event_id, &request.phone_number)
        .await?;
    Ok(Json(EventStatusResponse {
        event_id,
        status,
        room_id: None,
        room_status: None,
    }))
}

pub async fn end<S: Storage + 'static>(
    State(state): Shared<S>,
    Path(event_id): Path<String>,
    Json(request): Json<EndRequest>,
) -> Result<Json<EventStatusResponse>, AppError> {
    let event_id = parse_id("event_id", &event_id)?;
    let room = state
        .lifecycle
        .end_event(event_id, &request.phone_number, request.confirm)
        .await?;
    Ok(Json(EventStatusResponse {
        event_id,
        status: EventStatus::Ended,
        room_id: room.as_ref().map(|r| r.id),
        room_status: room.map(|r| r.status),
    }))
}

pub async fn delete_event<S: Storage + 'static>(
    State(state): Shared<S>,
    Path(event_id): Path<String>,
    Query(caller): Query<CallerQuery>,
) -> Result<StatusCode, AppError> {
    let event_id = parse_id("event_id", &event_id)?;
    state
        .lifecycle
        .delete_event(event_id, &caller.phone_number)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
