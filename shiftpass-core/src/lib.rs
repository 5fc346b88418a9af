//! ShiftPass Core Library
//!
//! Shared protocol pieces for the ShiftPass attendance platform:
//! - Ed25519 device identities sealed at rest (key vault)
//! - Signed, nonce-tagged request envelopes
//! - Registration token lifecycle and pairing links
//! - A session directory over every paired employer domain
//! - The HTTP client a device uses to talk to a domain (feature `client`)

pub mod attendance;
pub mod config;
pub mod crypto;
pub mod directory;
pub mod envelope;
pub mod identity;
pub mod platform;
pub mod protocol;
pub mod registration;

#[cfg(feature = "client")]
pub mod client;
#[cfg(feature = "client")]
pub mod device;

#[cfg(feature = "client")]
pub use client::DomainClient;
#[cfg(feature = "client")]
pub use device::Device;

pub use attendance::{
    AttendanceEvent, AttendanceKind, AttendancePayload, AttendanceReceipt, Geolocation,
    LocalDevice, Workplace,
};
pub use config::ClientConfig;
pub use directory::{Aggregate, Domain, DomainFailure, SessionDirectory, Tagged};
pub use envelope::{build_envelope, Envelope, SignedPayload, SignedRequest};
pub use identity::{DeviceIdentity, KeyVault, PairingState, PendingIdentity};
pub use protocol::{ApiResponse, ErrorCode};
pub use registration::{EmployeeDraft, EmployeeForm, PairingLink, RegistrationToken, TokenState};

use thiserror::Error;

/// Result type for ShiftPass operations
pub type Result<T> = std::result::Result<T, ShiftpassError>;

/// General error type for ShiftPass operations
#[derive(Error, Debug)]
pub enum ShiftpassError {
    #[error("Device is not paired with {0}")]
    NotPaired(String),

    #[error("Registration token has expired")]
    TokenExpired,

    #[error("Registration token has already been used")]
    TokenConsumed,

    #[error("Registration token not found")]
    TokenNotFound,

    #[error("Invalid request signature")]
    InvalidSignature,

    #[error("Replayed or stale request")]
    ReplayDetected,

    #[error("Local device is ambiguous ({} candidates)", .0.len())]
    AmbiguousLocalDevice(Vec<LocalDevice>),

    #[error("Domain unreachable: {0}")]
    DomainUnreachable(String),

    #[error("Invalid value for {field}: {reason}")]
    ValidationError { field: String, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShiftpassError {
    /// Shorthand for a field-level validation failure.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Only unreachable domains are worth retrying; everything else is terminal.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::DomainUnreachable(_))
    }

    /// Message safe to show to the person holding the device.
    ///
    /// Signature and replay failures share one message so the UI never
    /// reveals which check rejected the request.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidSignature | Self::ReplayDetected => "unauthorized".to_string(),
            Self::NotPaired(domain) => format!("This device is not paired with {}", domain),
            Self::TokenExpired => "This pairing link has expired".to_string(),
            Self::TokenConsumed => "This pairing link has already been used".to_string(),
            Self::TokenNotFound => "This pairing link is not valid".to_string(),
            Self::AmbiguousLocalDevice(_) => "Select the terminal you are using".to_string(),
            Self::DomainUnreachable(domain) => format!("{} is not reachable right now", domain),
            Self::ValidationError { field, .. } => format!("Please check {}", field),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_and_replay_share_user_message() {
        assert_eq!(
            ShiftpassError::InvalidSignature.user_message(),
            ShiftpassError::ReplayDetected.user_message()
        );
        assert_eq!(ShiftpassError::ReplayDetected.user_message(), "unauthorized");
    }

    #[test]
    fn only_unreachable_is_transient() {
        assert!(ShiftpassError::DomainUnreachable("https://acme.example".into()).is_transient());
        assert!(!ShiftpassError::InvalidSignature.is_transient());
        assert!(!ShiftpassError::TokenConsumed.is_transient());
    }
}
