// ============================
// crates/backend-lib/src/validation/mod.rs
// ============================
//! Request validation.
//!
//! Every identity and identifier is checked here before any store lookup.

use crewchat_common::ClientMessage;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use uuid::Uuid;

const MAX_EXPERIENCE_LENGTH: usize = 4000;
const MAX_EVIDENCE_REFERENCE_LENGTH: usize = 2048;

// E.164 with an optional leading plus
static PHONE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[1-9]\d{1,14}$").expect("phone regex"));

/// Possible validation errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid phone_number: {0}")]
    InvalidPhoneNumber(String),

    #[error("Invalid {0}: must be a valid UUID")]
    InvalidId(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Invalid evidence: {0}")]
    InvalidEvidence(String),

    #[error("Confirmation required: {0}")]
    MissingConfirmation(String),
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate a caller or worker identity
pub fn validate_phone_number(phone_number: &str) -> ValidationResult<&str> {
    if phone_number.is_empty() {
        return Err(ValidationError::InvalidPhoneNumber(
            "Phone number is required".to_string(),
        ));
    }

    if !PHONE_REGEX.is_match(phone_number) {
        return Err(ValidationError::InvalidPhoneNumber(
            "Must be a valid phone number with optional country code".to_string(),
        ));
    }

    Ok(phone_number)
}

/// Canonical form used for the saved-for-later marker: always `+` prefixed
pub fn normalize_phone_number(phone_number: &str) -> ValidationResult<String> {
    let trimmed = validate_phone_number(phone_number.trim())?;
    if trimmed.starts_with('+') {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("+{trimmed}"))
    }
}

/// Parse a UUID-shaped identifier, naming the field in the error
pub fn parse_id(field: &str, value: &str) -> ValidationResult<Uuid> {
    // Only the hyphenated form is accepted on the wire.
    if value.len() != 36 {
        return Err(ValidationError::InvalidId(field.to_string()));
    }
    Uuid::parse_str(value).map_err(|_| ValidationError::InvalidId(field.to_string()))
}

/// Validate a chat message body
pub fn validate_message_body(body: &str, max_length: usize) -> ValidationResult<&str> {
    if body.trim().is_empty() {
        return Err(ValidationError::InvalidMessage(
            "Message must not be empty".to_string(),
        ));
    }

    if body.chars().count() > max_length {
        return Err(ValidationError::InvalidMessage(format!(
            "Message cannot exceed {max_length} characters"
        )));
    }

    Ok(body)
}

/// Validate the evidence attached to an application
pub fn validate_evidence(
    images: &[String],
    experience: Option<&str>,
    max_items: usize,
) -> ValidationResult<()> {
    if images.is_empty() {
        return Err(ValidationError::InvalidEvidence(
            "No images uploaded".to_string(),
        ));
    }

    if images.len() > max_items {
        return Err(ValidationError::InvalidEvidence(format!(
            "At most {max_items} images may be attached"
        )));
    }

    if images
        .iter()
        .any(|r| r.trim().is_empty() || r.len() > MAX_EVIDENCE_REFERENCE_LENGTH)
    {
        return Err(ValidationError::InvalidEvidence(
            "Image references must be non-empty".to_string(),
        ));
    }

    if experience.is_some_and(|e| e.len() > MAX_EXPERIENCE_LENGTH) {
        return Err(ValidationError::InvalidEvidence(format!(
            "Experience cannot exceed {MAX_EXPERIENCE_LENGTH} characters"
        )));
    }

    Ok(())
}

/// Validate the explicit confirmation flag of an end-event action
pub fn validate_confirmation(confirm: bool) -> ValidationResult<()> {
    if confirm {
        Ok(())
    } else {
        Err(ValidationError::MissingConfirmation(
            "Confirmation required to end the event".to_string(),
        ))
    }
}

/// Validates a client message
pub fn validate_client_message(
    message: &ClientMessage,
    max_message_length: usize,
) -> ValidationResult<()> {
    match message {
        ClientMessage::JoinRoom {
            room_id,
            phone_number,
        }
        | ClientMessage::FetchMessages {
            room_id,
            phone_number,
        } => {
            parse_id("room_id", room_id)?;
            validate_phone_number(phone_number)?;
        },
        ClientMessage::LeaveRoom { room_id } => {
            parse_id("room_id", room_id)?;
        },
        ClientMessage::SendMessage {
            room_id,
            phone_number,
            message,
            client_message_id,
        } => {
            parse_id("room_id", room_id)?;
            validate_phone_number(phone_number)?;
            validate_message_body(message, max_message_length)?;
            if let Some(key) = client_message_id {
                parse_id("client_message_id", key)?;
            }
        },
        ClientMessage::FetchChatRooms { phone_number } => {
            validate_phone_number(phone_number)?;
        },
        ClientMessage::GetEventDetails {
            event_id,
            phone_number,
        } => {
            parse_id("event_id", event_id)?;
            validate_phone_number(phone_number)?;
        },
    }

    Ok(())
}
