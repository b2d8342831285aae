use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use validator::ValidationErrors;

use crate::{
    state::{
        state_machine::{RejectReason, Rejection},
        stats::StatsError,
    },
    sync::SyncError,
};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Caller identity headers are missing or malformed.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Failure reported by the room engine.
    #[error(transparent)]
    Sync(#[from] SyncError),
    /// Statistics requested in the wrong room status.
    #[error(transparent)]
    Stats(#[from] StatsError),
}

impl From<Rejection> for ServiceError {
    fn from(err: Rejection) -> Self {
        ServiceError::Sync(SyncError::Rejected(err))
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest("ValidationFailed", format!("validation failed: {err}"))
    }
}

/// Application-level errors that are converted to HTTP responses.
///
/// Every variant carries a stable machine-readable code and a human-readable message.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {1}")]
    BadRequest(&'static str, String),
    /// Caller identity is missing.
    #[error("unauthorized: {1}")]
    Unauthorized(&'static str, String),
    /// Caller is known but not allowed to act.
    #[error("forbidden: {1}")]
    Forbidden(&'static str, String),
    /// Requested resource not found.
    #[error("not found: {1}")]
    NotFound(&'static str, String),
    /// Conflict with current state.
    #[error("conflict: {1}")]
    Conflict(&'static str, String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {1}")]
    ServiceUnavailable(&'static str, String),
    /// Internal server error.
    #[error("internal error: {1}")]
    Internal(&'static str, String),
}

impl AppError {
    /// Stable code reported to clients.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(code, _)
            | AppError::Unauthorized(code, _)
            | AppError::Forbidden(code, _)
            | AppError::NotFound(code, _)
            | AppError::Conflict(code, _)
            | AppError::ServiceUnavailable(code, _)
            | AppError::Internal(code, _) => code,
        }
    }

    /// HTTP status of the response.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(..) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(..) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(..) => StatusCode::FORBIDDEN,
            AppError::NotFound(..) => StatusCode::NOT_FOUND,
            AppError::Conflict(..) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(..) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(..) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::Degraded => AppError::ServiceUnavailable("Degraded", message),
            ServiceError::Unauthorized(_) => AppError::Unauthorized("NotSignedIn", message),
            ServiceError::InvalidInput(_) => AppError::BadRequest("InvalidInput", message),
            ServiceError::Stats(_) => AppError::Conflict("WrongState", message),
            ServiceError::Sync(err) => match err {
                SyncError::NotSignedIn => AppError::Unauthorized("NotSignedIn", message),
                SyncError::Rejected(rejection) => rejection_to_app_error(rejection.reason, message),
                SyncError::Conflict { .. } => AppError::Conflict("Conflict", message),
                SyncError::AlreadyExists(_) => AppError::Conflict("AlreadyExists", message),
                SyncError::NotFound(_) => AppError::NotFound("NotFound", message),
                SyncError::InvalidSettings(_) => AppError::BadRequest("InvalidSettings", message),
                SyncError::Unavailable(_) => AppError::ServiceUnavailable("Unavailable", message),
                SyncError::Timeout(_) => AppError::ServiceUnavailable("Timeout", message),
                SyncError::Corrupt { .. } => AppError::Internal("Corrupt", message),
                SyncError::Internal(_) | SyncError::ViewClosed => {
                    AppError::Internal("Internal", message)
                }
            },
        }
    }
}

fn rejection_to_app_error(reason: RejectReason, message: String) -> AppError {
    let code = reason.code();
    match reason {
        RejectReason::NotAdmin => AppError::Forbidden(code, message),
        RejectReason::NotFound => AppError::NotFound(code, message),
        RejectReason::InvalidInput => AppError::BadRequest(code, message),
        RejectReason::WrongState
        | RejectReason::AlreadySubmitted
        | RejectReason::RoomFull
        | RejectReason::AlreadyJoined
        | RejectReason::NotConnected
        | RejectReason::AlreadyValidated
        | RejectReason::PendingValidations
        | RejectReason::TimerRunning
        | RejectReason::NotEnoughPlayers => AppError::Conflict(code, message),
    }
}

/// JSON body of every error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Stable machine-readable code.
    pub code: String,
    /// Human-readable explanation.
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let payload = Json(ErrorBody {
            code: self.code().to_string(),
            message: self.to_string(),
        });

        (self.status(), payload).into_response()
    }
}
