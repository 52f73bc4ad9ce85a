// crates/backend-lib/src/error.rs

//! Central error type + Axum integration.
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use crewchat_common::{ErrorKind, ServerMessage};
use thiserror::Error;
use uuid::Uuid;

use crate::validation::ValidationError;

/// Application error types with error codes and context
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Event {0} not found")]
    EventNotFound(Uuid),

    #[error("Chat room {0} not found")]
    RoomNotFound(Uuid),

    #[error("No application from {worker} for event {event_id}")]
    ApplicationNotFound { event_id: Uuid, worker: String },

    #[error("Chat room unavailable: {0}")]
    RoomUnavailable(String),

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("{worker} has already applied to event {event_id}")]
    DuplicateApplication { event_id: Uuid, worker: String },

    #[error("Application from {worker} to event {event_id} was rejected")]
    ApplicationRejected { event_id: Uuid, worker: String },

    #[error("Event {event_id} has no open crew slots (capacity {capacity})")]
    CapacityReached { event_id: Uuid, capacity: u32 },

    #[error("Illegal transition: {0}")]
    InvalidTransition(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Chat room {0} is closed")]
    RoomClosed(Uuid),

    #[error("Store error during {operation}: {reason}")]
    Persistence {
        operation: &'static str,
        reason: String,
    },

    #[error("Store call {0} timed out")]
    StoreTimeout(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn persistence(operation: &'static str, reason: impl Into<String>) -> Self {
        AppError::Persistence {
            operation,
            reason: reason.into(),
        }
    }

    /// Stable category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::InvalidIdentity(_)
            | AppError::InvalidInput(_)
            | AppError::InvalidTransition(_) => ErrorKind::InvalidInput,
            AppError::EventNotFound(_)
            | AppError::RoomNotFound(_)
            | AppError::ApplicationNotFound { .. }
            | AppError::RoomUnavailable(_) => ErrorKind::NotFound,
            AppError::Unauthorized(_) => ErrorKind::Unauthorized,
            AppError::DuplicateApplication { .. }
            | AppError::ApplicationRejected { .. }
            | AppError::CapacityReached { .. }
            | AppError::Conflict(_) => ErrorKind::Conflict,
            AppError::RoomClosed(_) => ErrorKind::RoomClosed,
            AppError::Persistence { .. }
            | AppError::StoreTimeout(_)
            | AppError::Io(_)
            | AppError::Json(_) => ErrorKind::PersistenceError,
            AppError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the failed call may be reissued without changing its outcome
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::PersistenceError
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
            ErrorKind::Conflict | ErrorKind::RoomClosed => StatusCode::CONFLICT,
            ErrorKind::PersistenceError => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::InvalidIdentity(_) => "VAL_002",
            AppError::InvalidInput(_) => "VAL_001",
            AppError::EventNotFound(_) => "EVENT_001",
            AppError::RoomNotFound(_) => "ROOM_001",
            AppError::ApplicationNotFound { .. } => "APP_001",
            AppError::RoomUnavailable(_) => "ROOM_002",
            AppError::Unauthorized(_) => "AUTH_001",
            AppError::DuplicateApplication { .. } => "APP_002",
            AppError::ApplicationRejected { .. } => "APP_003",
            AppError::CapacityReached { .. } => "CREW_001",
            AppError::InvalidTransition(_) => "STATE_001",
            AppError::Conflict(_) => "CONFLICT_001",
            AppError::RoomClosed(_) => "ROOM_003",
            AppError::Persistence { .. } => "STORE_001",
            AppError::StoreTimeout(_) => "STORE_002",
            AppError::Io(_) => "IO_001",
            AppError::Json(_) => "JSON_001",
            AppError::Internal(_) => "INT_001",
        }
    }

    /// Get a sanitized message suitable for production use
    pub fn sanitized_message(&self) -> String {
        match self {
            AppError::InvalidIdentity(_) => "Invalid phone number".to_string(),
            AppError::InvalidInput(_) => "Invalid input provided".to_string(),
            AppError::EventNotFound(_) => "Event not found".to_string(),
            AppError::RoomNotFound(_) => "Chat room not found".to_string(),
            AppError::ApplicationNotFound { .. } => "Application not found".to_string(),
            // The reason only names which precondition is missing.
            AppError::RoomUnavailable(reason) => format!("Chat room unavailable: {reason}"),
            AppError::Unauthorized(_) => "Not authorized for this event".to_string(),
            AppError::DuplicateApplication { .. } => {
                "User has already applied to this event".to_string()
            },
            AppError::ApplicationRejected { .. } => "Application was rejected".to_string(),
            AppError::CapacityReached { .. } => "All crew slots are filled".to_string(),
            AppError::InvalidTransition(_) => "Operation not allowed in the current state".to_string(),
            AppError::Conflict(_) => "Concurrent update, please retry".to_string(),
            AppError::RoomClosed(_) => "Chat room is closed".to_string(),
            AppError::Persistence { .. } | AppError::StoreTimeout(_) => {
                "Storage temporarily unavailable, please retry".to_string()
            },
            AppError::Io(_) | AppError::Json(_) | AppError::Internal(_) => {
                "An internal server error occurred".to_string()
            },
        }
    }

    /// Message shown to the caller.
    ///
    /// Authorization failures always use the sanitized text so that no event
    /// data ends up in the body.
    pub fn public_message(&self) -> String {
        if cfg!(debug_assertions) && !matches!(self, AppError::Unauthorized(_)) {
            self.to_string()
        } else {
            self.sanitized_message()
        }
    }

    /// WebSocket representation of this error
    pub fn to_server_message(&self) -> ServerMessage {
        ServerMessage::Error {
            kind: self.kind(),
            code: self.error_code().to_string(),
            message: self.public_message(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = serde_json::json!({
            "error": {
                "code": self.error_code(),
                "kind": self.kind(),
                "message": self.public_message(),
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::InvalidPhoneNumber(_) => AppError::InvalidIdentity(err.to_string()),
            other => AppError::InvalidInput(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use std::io::{Error as IoError, ErrorKind as IoErrorKind};

    #[test]
    fn test_app_error_display() {
        let event_id = Uuid::nil();
        assert_eq!(
            AppError::EventNotFound(event_id).to_string(),
            format!("Event {event_id} not found")
        );

        let io_error = AppError::Io(IoError::new(IoErrorKind::NotFound, "File not found"));
        assert!(io_error.to_string().contains("IO error"));

        assert_eq!(
            AppError::StoreTimeout("insert_message").to_string(),
            "Store call insert_message timed out"
        );
    }

    #[test]
    fn test_error_kinds() {
        let id = Uuid::new_v4();
        assert_eq!(AppError::InvalidIdentity("x".into()).kind(), ErrorKind::InvalidInput);
        assert_eq!(AppError::RoomNotFound(id).kind(), ErrorKind::NotFound);
        assert_eq!(
            AppError::RoomUnavailable("payment not completed".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(AppError::Unauthorized("x".into()).kind(), ErrorKind::Unauthorized);
        assert_eq!(
            AppError::DuplicateApplication {
                event_id: id,
                worker: "+15550001".into()
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(AppError::RoomClosed(id).kind(), ErrorKind::RoomClosed);
        assert_eq!(
            AppError::persistence("get_event", "connection reset").kind(),
            ErrorKind::PersistenceError
        );
    }

    #[test]
    fn test_only_store_failures_are_retryable() {
        assert!(AppError::persistence("list_messages", "boom").is_retryable());
        assert!(AppError::StoreTimeout("get_room").is_retryable());
        assert!(!AppError::Unauthorized("x".into()).is_retryable());
        assert!(!AppError::InvalidInput("x".into()).is_retryable());
        assert!(!AppError::Conflict("x".into()).is_retryable());
    }

    #[test]
    fn test_app_error_status_codes() {
        let id = Uuid::new_v4();
        assert_eq!(
            AppError::InvalidIdentity("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::EventNotFound(id).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::Unauthorized("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::CapacityReached {
                event_id: id,
                capacity: 1
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::StoreTimeout("get_event").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_unauthorized_message_never_carries_details() {
        let err = AppError::Unauthorized("Gala Dinner organised by +15550000".into());
        assert!(!err.public_message().contains("Gala"));
        assert!(!err.public_message().contains("+15550000"));
    }

    #[test]
    fn test_validation_errors_convert() {
        let err: AppError = ValidationError::InvalidPhoneNumber("abc".into()).into();
        assert!(matches!(err, AppError::InvalidIdentity(_)));

        let err: AppError = ValidationError::InvalidId("room_id".into()).into();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[test]
    fn test_server_message_conversion() {
        let id = Uuid::new_v4();
        match AppError::RoomClosed(id).to_server_message() {
            ServerMessage::Error { kind, code, .. } => {
                assert_eq!(kind, ErrorKind::RoomClosed);
                assert_eq!(code, "ROOM_003");
            },
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_serialization() {
        let response = AppError::RoomNotFound(Uuid::new_v4()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .contains("application/json"));
    }
}
