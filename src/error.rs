use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;
use validator::ValidationErrors;

use crate::{
    dao::storage::StorageError,
    state::state_machine::{ApplyError, InvalidTransition},
};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// The couple already owns a running session.
    #[error("an active game session already exists: {0}")]
    ActiveSessionExists(Uuid),
    /// The session passed its deadline; it has been moved to `EXPIRED`.
    #[error("game session expired: {0}")]
    SessionExpired(Uuid),
}

impl ServiceError {
    /// Message shown to players, without the error category prefix.
    pub fn client_message(&self) -> String {
        match self {
            ServiceError::Unavailable(_) => "Storage unavailable".into(),
            ServiceError::Degraded => "Service temporarily unavailable".into(),
            ServiceError::Unauthorized(message)
            | ServiceError::InvalidInput(message)
            | ServiceError::InvalidState(message)
            | ServiceError::NotFound(message) => message.clone(),
            ServiceError::ActiveSessionExists(_) => {
                "Active game session already exists for this couple".into()
            }
            ServiceError::SessionExpired(_) => "Game session has expired".into(),
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<InvalidTransition> for ServiceError {
    fn from(err: InvalidTransition) -> Self {
        ServiceError::InvalidState(err.to_string())
    }
}

impl From<ApplyError> for ServiceError {
    fn from(err: ApplyError) -> Self {
        ServiceError::InvalidState(format!("state changed during transition ({err})"))
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(err: ValidationErrors) -> Self {
        ServiceError::InvalidInput(format!("validation failed: {err}"))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {message}")]
    Conflict {
        /// Human readable reason.
        message: String,
        /// Session the caller should redirect to, when relevant.
        session_id: Option<Uuid>,
    },
    /// The session expired.
    #[error("game session expired")]
    Gone {
        /// Expired session.
        session_id: Uuid,
    },
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AppError {
    /// Plain conflict without a related session.
    pub fn conflict(message: impl Into<String>) -> Self {
        AppError::Conflict {
            message: message.into(),
            session_id: None,
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::InvalidState(message) => AppError::conflict(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::ActiveSessionExists(session_id) => AppError::Conflict {
                message: "Active game session already exists for this couple".into(),
                session_id: Some(session_id),
            },
            ServiceError::SessionExpired(session_id) => AppError::Gone { session_id },
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<Uuid>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, session_id) = match &self {
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, None),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, None),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, None),
            AppError::Conflict { session_id, .. } => (StatusCode::CONFLICT, *session_id),
            AppError::Gone { session_id } => (StatusCode::GONE, Some(*session_id)),
            AppError::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, None),
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
            session_id,
        });

        (status, payload).into_response()
    }
}
