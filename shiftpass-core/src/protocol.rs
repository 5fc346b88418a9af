//! Wire format shared by devices and domain servers.
//!
//! Every response is `{success, msg}`: `msg` carries the payload on success
//! and an [`ErrorCode`] on failure. Attendance writes may add `localDevices`.

use crate::attendance::LocalDevice;
use crate::ShiftpassError;
use serde::{Deserialize, Serialize};

/// Header naming the acting employee on read-only (unsigned) calls.
pub const EMPLOYEE_HEADER: &str = "X-Shiftpass-Employee";

/// URI scheme of pairing deep links.
pub const PAIRING_SCHEME: &str = "shiftpass";

pub mod paths {
    pub const REGISTRATION: &str = "/api/registration";
    pub const ATTENDANCE: &str = "/api/attendance";
    pub const ATTENDANCE_LOCAL_DEVICE: &str = "/api/attendance/local-device";
    pub const BREAK: &str = "/api/break";
    pub const PAUSE: &str = "/api/pause";
    pub const SPECIFIC_BREAK: &str = "/api/specific-break";
    pub const ATTENDANCES: &str = "/api/attendances";
    pub const WORKPLACES: &str = "/api/workplaces";
    pub const EMPLOYEE_ME: &str = "/api/employee/me";
    pub const CANCEL_PAIRING: &str = "/api/employee/cancel-pairing";
}

/// Successful response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub msg: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_devices: Option<Vec<LocalDevice>>,
}

impl<T> ApiResponse<T> {
    pub fn ok(msg: T) -> Self {
        Self {
            success: true,
            msg,
            local_devices: None,
        }
    }

    pub fn with_local_devices(mut self, devices: Vec<LocalDevice>) -> Self {
        self.local_devices = Some(devices);
        self
    }
}

/// Failure response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub success: bool,
    pub msg: ErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_devices: Option<Vec<LocalDevice>>,
}

impl ErrorBody {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            success: false,
            msg: code,
            field: None,
            local_devices: None,
        }
    }

    /// Map a failure body back onto the error taxonomy.
    pub fn into_error(self, domain: &str) -> ShiftpassError {
        match self.msg {
            ErrorCode::NotPaired => ShiftpassError::NotPaired(domain.to_string()),
            ErrorCode::TokenNotFound => ShiftpassError::TokenNotFound,
            ErrorCode::TokenExpired => ShiftpassError::TokenExpired,
            ErrorCode::TokenConsumed => ShiftpassError::TokenConsumed,
            ErrorCode::InvalidSignature => ShiftpassError::InvalidSignature,
            ErrorCode::ReplayDetected => ShiftpassError::ReplayDetected,
            ErrorCode::AmbiguousLocalDevice => {
                ShiftpassError::AmbiguousLocalDevice(self.local_devices.unwrap_or_default())
            }
            ErrorCode::ValidationError => ShiftpassError::ValidationError {
                field: self.field.unwrap_or_else(|| "request".to_string()),
                reason: "rejected by server".to_string(),
            },
            ErrorCode::NotFound => ShiftpassError::NotFound(domain.to_string()),
            ErrorCode::InternalError => {
                ShiftpassError::Protocol(format!("{} reported an internal error", domain))
            }
        }
    }
}

/// Error vocabulary on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotPaired,
    TokenNotFound,
    TokenExpired,
    TokenConsumed,
    InvalidSignature,
    ReplayDetected,
    AmbiguousLocalDevice,
    ValidationError,
    NotFound,
    InternalError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_screaming_snake() {
        let json = serde_json::to_string(&ErrorBody::new(ErrorCode::ReplayDetected)).unwrap();
        assert_eq!(json, r#"{"success":false,"msg":"REPLAY_DETECTED"}"#);
    }

    #[test]
    fn ambiguous_body_keeps_candidates() {
        let body: ErrorBody = serde_json::from_str(
            r#"{"success":false,"msg":"AMBIGUOUS_LOCAL_DEVICE",
                "localDevices":[{"id":1,"registerId":7,"label":"Front","lastSeenAt":null}]}"#,
        )
        .unwrap();

        match body.into_error("https://acme.example") {
            ShiftpassError::AmbiguousLocalDevice(devices) => {
                assert_eq!(devices.len(), 1);
                assert_eq!(devices[0].label, "Front");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn local_devices_omitted_when_absent() {
        let json = serde_json::to_value(ApiResponse::ok(42)).unwrap();
        assert_eq!(json, serde_json::json!({"success": true, "msg": 42}));
    }
}
