//! Attendance data models: actions, payloads, events and local devices.

use crate::envelope::SignedPayload;
use crate::protocol::paths;
use crate::{Result, ShiftpassError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of attendance action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttendanceKind {
    CheckIn,
    CheckOut,
    Break,
    Pause,
    SpecificBreak,
}

impl AttendanceKind {
    pub const ALL: [AttendanceKind; 5] = [
        Self::CheckIn,
        Self::CheckOut,
        Self::Break,
        Self::Pause,
        Self::SpecificBreak,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckIn => "checkIn",
            Self::CheckOut => "checkOut",
            Self::Break => "break",
            Self::Pause => "pause",
            Self::SpecificBreak => "specificBreak",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }

    /// Endpoint that accepts this kind.
    pub fn path(&self) -> &'static str {
        match self {
            Self::CheckIn | Self::CheckOut => paths::ATTENDANCE,
            Self::Break => paths::BREAK,
            Self::Pause => paths::PAUSE,
            Self::SpecificBreak => paths::SPECIFIC_BREAK,
        }
    }
}

/// Device position at the time of the action.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Geolocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

impl Geolocation {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(ShiftpassError::validation("latitude", "must be within -90..90"));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(ShiftpassError::validation("longitude", "must be within -180..180"));
        }
        if let Some(accuracy) = self.accuracy {
            if !accuracy.is_finite() || accuracy < 0.0 {
                return Err(ShiftpassError::validation("accuracy", "must be a positive number"));
            }
        }
        Ok(())
    }

    /// Great-circle distance in meters (haversine).
    pub fn distance_m(&self, other: &Geolocation) -> f64 {
        const EARTH_RADIUS_M: f64 = 6_371_000.0;

        let (lat1, lat2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }
}

/// Signed body of every attendance write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendancePayload {
    pub kind: AttendanceKind,
    pub register_id: i64,
    pub location: Geolocation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_device_id: Option<i64>,
    /// Required for specific breaks only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AttendancePayload {
    pub fn new(kind: AttendanceKind, register_id: i64, location: Geolocation) -> Self {
        Self {
            kind,
            register_id,
            location,
            local_device_id: None,
            reason: None,
        }
    }

    pub fn with_local_device(mut self, local_device_id: i64) -> Self {
        self.local_device_id = Some(local_device_id);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Field-level checks shared by client and server.
    pub fn validate(&self) -> Result<()> {
        self.location.validate()?;
        if self.register_id <= 0 {
            return Err(ShiftpassError::validation("registerId", "must be positive"));
        }
        match (&self.kind, self.reason.as_deref().map(str::trim)) {
            (AttendanceKind::SpecificBreak, None | Some("")) => Err(ShiftpassError::validation(
                "reason",
                "required for a specific break",
            )),
            (AttendanceKind::SpecificBreak, Some(_)) | (_, None) => Ok(()),
            (_, Some(_)) => Err(ShiftpassError::validation(
                "reason",
                "only allowed for a specific break",
            )),
        }
    }
}

impl SignedPayload for AttendancePayload {
    fn action(&self) -> &'static str {
        self.kind.path()
    }
}

/// Signed request attaching a terminal to an event written without one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmLocalDevice {
    pub event_id: i64,
    pub local_device_id: i64,
}

impl SignedPayload for ConfirmLocalDevice {
    fn action(&self) -> &'static str {
        paths::ATTENDANCE_LOCAL_DEVICE
    }
}

/// Signed request revoking this device's identity on a domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelPairing {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SignedPayload for CancelPairing {
    fn action(&self) -> &'static str {
        paths::CANCEL_PAIRING
    }
}

/// A register-scoped physical terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDevice {
    pub id: i64,
    pub register_id: i64,
    pub label: String,
    pub last_seen_at: Option<i64>,
}

/// A persisted attendance action. Never updated after insert, except that a
/// missing `local_device_id` may be filled once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceEvent {
    pub id: i64,
    pub kind: AttendanceKind,
    pub employee_id: Uuid,
    pub register_id: i64,
    pub retail_id: i64,
    pub timestamp: i64,
    pub location: Geolocation,
    pub local_device_id: Option<i64>,
}

/// Server acknowledgement of an attendance write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceReceipt {
    pub event_id: i64,
    pub kind: AttendanceKind,
    pub timestamp: i64,
    #[serde(default)]
    pub local_device_id: Option<i64>,
}

/// Outcome of an attendance write as seen by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceOutcome {
    pub receipt: AttendanceReceipt,
    /// Non-empty when the server could not tell which terminal was used.
    pub candidates: Vec<LocalDevice>,
}

impl AttendanceOutcome {
    pub fn needs_local_device(&self) -> bool {
        self.receipt.local_device_id.is_none() && !self.candidates.is_empty()
    }
}

/// A register the employee may check in at today.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workplace {
    pub register_id: i64,
    pub register_name: String,
    pub retail_id: i64,
    pub retail_name: String,
    pub distance_m: f64,
    pub within_range: bool,
}

/// Employee profile on one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeProfile {
    pub employee_id: Uuid,
    pub display_name: String,
    pub company_name: String,
}

/// Pagination query of the history endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub skip: Option<u32>,
}

/// Body of the workplaces endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkplacesQuery {
    pub latitude: f64,
    pub longitude: f64,
}
