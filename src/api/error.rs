//! Unified API error handling.
//!
//! Every failure leaves the server in the same JSON envelope:
//! `{ "status": "<sentinel>", "error": { "code", "message", "details"? } }`.
//! The sentinel is `field_errors` for validation failures, `conflict` for
//! state conflicts and `error` for everything else.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::booking::BookingError;
use crate::chat::ChatError;
use crate::db::StoreError;
use crate::validation::FieldErrors;

/// Error codes for API responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // Client errors (4xx)
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    ValidationError,
    EmailNotVerified,
    InvalidToken,

    // Server errors (5xx)
    InternalError,
    ServiceUnavailable,
    ExternalServiceError,
}

impl ErrorCode {
    /// Get the default HTTP status code for this error code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::EmailNotVerified => StatusCode::FORBIDDEN,
            ErrorCode::InvalidToken => StatusCode::BAD_REQUEST,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::ExternalServiceError => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "bad_request",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Conflict => "conflict",
            ErrorCode::ValidationError => "validation_error",
            ErrorCode::EmailNotVerified => "email_not_verified",
            ErrorCode::InvalidToken => "invalid_token",
            ErrorCode::InternalError => "internal_error",
            ErrorCode::ServiceUnavailable => "service_unavailable",
            ErrorCode::ExternalServiceError => "external_service_error",
        }
    }

    /// Top-level `status` value of the envelope.
    pub fn sentinel(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "field_errors",
            ErrorCode::Conflict => "conflict",
            _ => "error",
        }
    }
}

/// The inner error object in the response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorDetails {
    /// Every violation per field
    ValidationErrors(BTreeMap<String, Vec<String>>),
    Generic(BTreeMap<String, serde_json::Value>),
}

/// The full error response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub error: ErrorBody,
}

#[derive(Debug)]
pub struct ApiError {
    code: ErrorCode,
    status: StatusCode,
    message: String,
    details: Option<ErrorDetails>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status_code(),
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = Some(details);
        self
    }

    /// Add one generic detail entry
    pub fn with_detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        let mut map = match self.details.take() {
            Some(ErrorDetails::Generic(map)) => map,
            _ => BTreeMap::new(),
        };
        map.insert(key.to_string(), value.into());
        self.details = Some(ErrorDetails::Generic(map));
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    /// Authentication required
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    /// Authenticated but not allowed
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    /// Validation error (400) with field-level details
    pub fn validation(errors: FieldErrors) -> Self {
        let errors = errors.into_inner();
        let message = if errors.len() == 1 {
            errors
                .values()
                .next()
                .and_then(|v| v.first())
                .cloned()
                .unwrap_or_else(|| "Validation failed".to_string())
        } else {
            format!("Validation failed for {} fields", errors.len())
        };

        Self::new(ErrorCode::ValidationError, message)
            .with_details(ErrorDetails::ValidationErrors(errors))
    }

    pub fn validation_field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.add(field, message);
        Self::validation(errors)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Storage is unreachable or slow; the client may retry
    pub fn service_unavailable() -> Self {
        Self::new(
            ErrorCode::ServiceUnavailable,
            "The service is temporarily unavailable, please try again",
        )
        .with_detail("retryable", true)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let response = ErrorResponse {
            status: self.code.sentinel().to_string(),
            error: ErrorBody {
                code: self.code.as_str().to_string(),
                message: self.message,
                details: self.details,
            },
        };

        (self.status, Json(response)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for ApiError {}

// -------------------------------------------------------------------------
// Conversions from domain errors
// -------------------------------------------------------------------------

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        // Full detail stays in the log
        tracing::error!(error = %err, "Storage failure");
        ApiError::service_unavailable()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::from(err).into()
    }
}

impl From<FieldErrors> for ApiError {
    fn from(errors: FieldErrors) -> Self {
        ApiError::validation(errors)
    }
}

impl From<BookingError> for ApiError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::Validation(errors) => ApiError::validation(errors),
            BookingError::DuplicatePending { existing_id } => {
                let err = ApiError::conflict(
                    "You already have a pending reservation request for this venue",
                );
                match existing_id {
                    Some(id) => err.with_detail("existing_id", id),
                    None => err,
                }
            }
            BookingError::VenueNotFound(_) => ApiError::not_found("Venue not found"),
            BookingError::ReservationNotFound(_) => ApiError::not_found("Reservation not found"),
            BookingError::Unauthorized => ApiError::unauthorized("Authentication required"),
            BookingError::Forbidden(_) => {
                ApiError::forbidden("You can only change your own reservations")
            }
            BookingError::NotPending { status, .. } => {
                ApiError::conflict(format!("Reservation is already {status}"))
                    .with_detail("reservation_status", status)
            }
            BookingError::Store(err) => err.into(),
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Validation(errors) => ApiError::validation(errors),
            ChatError::NotFound(what) => ApiError::not_found(format!("{what} not found")),
            ChatError::Unauthorized => ApiError::unauthorized("Authentication required"),
            ChatError::NoConversation => ApiError::bad_request("No conversation is open"),
            ChatError::Store(err) => err.into(),
            other @ (ChatError::Transport(_) | ChatError::Api { .. }) => {
                tracing::warn!(error = %other, "Upstream chat call failed");
                ApiError::new(ErrorCode::ExternalServiceError, "Upstream request failed")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::time::Duration;

    async fn body_json(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_error_code_status_codes() {
        assert_eq!(ErrorCode::BadRequest.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::EmailNotVerified.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::Conflict.status_code(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::ServiceUnavailable.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_validation_envelope_lists_every_field() {
        let mut errors = FieldErrors::new();
        errors.add("email", "Email is required");
        errors.add("end_time", "End time must be after start time");
        errors.add("end_time", "Reservation must last at least 1 hour");

        let (status, body) = body_json(errors.into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "field_errors");
        assert_eq!(body["error"]["code"], "validation_error");
        assert_eq!(body["error"]["message"], "Validation failed for 2 fields");
        assert_eq!(body["error"]["details"]["end_time"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_single_field_uses_its_message() {
        let err = ApiError::validation_field("since", "Invalid timestamp");
        assert_eq!(err.message(), "Invalid timestamp");
    }

    #[tokio::test]
    async fn test_duplicate_pending_is_conflict_with_id() {
        let err: ApiError = BookingError::DuplicatePending { existing_id: Some(12) }.into();
        let (status, body) = body_json(err).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["status"], "conflict");
        assert_eq!(body["error"]["details"]["existing_id"], 12);
    }

    #[tokio::test]
    async fn test_store_failure_hides_detail() {
        let err: ApiError = StoreError::Timeout(Duration::from_secs(10)).into();
        let (status, body) = body_json(err).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"]["details"]["retryable"], true);
        assert!(!body.to_string().contains("10s"));
    }

    #[test]
    fn test_envelope_round_trips_for_clients() {
        let raw = r#"{"status":"error","error":{"code":"not_found","message":"user 9 not found"}}"#;
        let parsed: ErrorResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.error.code, "not_found");
        assert!(parsed.error.details.is_none());

        let raw = r#"{"status":"error","error":{"code":"x","message":"m","details":{"retryable":true}}}"#;
        let parsed: ErrorResponse = serde_json::from_str(raw).unwrap();
        assert!(matches!(parsed.error.details, Some(ErrorDetails::Generic(_))));
    }
}
