//! Server error types and their wire representation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use shiftpass_core::attendance::LocalDevice;
use shiftpass_core::protocol::{ErrorBody, ErrorCode};
use shiftpass_core::ShiftpassError;
use thiserror::Error;

/// Every way a request can fail, mapped to a status code and an error code.
///
/// The `String` payloads of the verifier variants are for logs only; the
/// client sees nothing but the code.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Employee is not paired")]
    NotPaired,

    #[error("Registration token not found")]
    TokenNotFound,

    #[error("Registration token expired")]
    TokenExpired,

    #[error("Registration token already consumed")]
    TokenConsumed,

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Replay detected: {0}")]
    ReplayDetected(String),

    #[error("Local device is ambiguous")]
    AmbiguousLocalDevice(Vec<LocalDevice>),

    #[error("Invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type ServerResult<T> = std::result::Result<T, ServerError>;

impl ServerError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::NotPaired | Self::InvalidSignature(_) | Self::ReplayDetected(_) => {
                StatusCode::UNAUTHORIZED
            }
            Self::TokenNotFound | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::TokenExpired | Self::TokenConsumed => StatusCode::GONE,
            Self::AmbiguousLocalDevice(_) => StatusCode::CONFLICT,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotPaired => ErrorCode::NotPaired,
            Self::TokenNotFound => ErrorCode::TokenNotFound,
            Self::TokenExpired => ErrorCode::TokenExpired,
            Self::TokenConsumed => ErrorCode::TokenConsumed,
            Self::InvalidSignature(_) => ErrorCode::InvalidSignature,
            Self::ReplayDetected(_) => ErrorCode::ReplayDetected,
            Self::AmbiguousLocalDevice(_) => ErrorCode::AmbiguousLocalDevice,
            Self::Validation { .. } => ErrorCode::ValidationError,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Database(_) | Self::Internal(_) => ErrorCode::InternalError,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = ErrorBody::new(self.code());

        match self {
            Self::Validation { field, reason } => {
                tracing::debug!("Rejected {}: {}", field, reason);
                body.field = Some(field);
            }
            Self::AmbiguousLocalDevice(devices) => body.local_devices = Some(devices),
            Self::Database(e) => tracing::error!("Database error: {}", e),
            Self::Internal(e) => tracing::error!("Internal error: {}", e),
            _ => {}
        }

        (status, axum::Json(body)).into_response()
    }
}

impl From<ShiftpassError> for ServerError {
    fn from(e: ShiftpassError) -> Self {
        match e {
            ShiftpassError::NotPaired(_) => Self::NotPaired,
            ShiftpassError::TokenExpired => Self::TokenExpired,
            ShiftpassError::TokenConsumed => Self::TokenConsumed,
            ShiftpassError::TokenNotFound => Self::TokenNotFound,
            ShiftpassError::InvalidSignature => {
                Self::InvalidSignature("signature does not verify".to_string())
            }
            ShiftpassError::ReplayDetected => Self::ReplayDetected("replayed".to_string()),
            ShiftpassError::AmbiguousLocalDevice(devices) => Self::AmbiguousLocalDevice(devices),
            ShiftpassError::ValidationError { field, reason } => Self::Validation { field, reason },
            ShiftpassError::NotFound(what) => Self::NotFound(what),
            ShiftpassError::Database(e) => Self::Database(e),
            other => Self::Internal(other.to_string()),
        }
    }
}
