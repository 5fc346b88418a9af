//! HTTP client for talking to one ShiftPass domain.

use crate::attendance::{
    AttendanceEvent, AttendanceOutcome, AttendancePayload, AttendanceReceipt, CancelPairing,
    ConfirmLocalDevice, EmployeeProfile, Geolocation, HistoryQuery, Workplace, WorkplacesQuery,
};
use crate::envelope::{sign_request, SignedPayload};
use crate::identity::DeviceIdentity;
use crate::protocol::{paths, ApiResponse, ErrorBody, EMPLOYEE_HEADER};
use crate::registration::{RegistrationInfo, RegistrationRequest, RegistrationResult};
use crate::{Result, ShiftpassError};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// HTTP client shared by every domain the device is paired with.
#[derive(Clone)]
pub struct DomainClient {
    client: reqwest::Client,
}

impl DomainClient {
    /// Create a client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("shiftpass/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ShiftpassError::Protocol(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self { client })
    }

    /// Fetch the employee draft behind a registration token (unauthenticated).
    pub async fn fetch_registration(&self, domain: &str, token_id: &str) -> Result<RegistrationInfo> {
        let url = endpoint(domain, &format!("{}/{}", paths::REGISTRATION, token_id));
        let request = self.client.get(url);
        let response: ApiResponse<RegistrationInfo> = self.send(domain, request).await?;
        Ok(response.msg)
    }

    /// Bind a public key to a registration token.
    pub async fn register(
        &self,
        domain: &str,
        registration: &RegistrationRequest,
    ) -> Result<RegistrationResult> {
        let request = self
            .client
            .post(endpoint(domain, paths::REGISTRATION))
            .json(registration);
        let response: ApiResponse<RegistrationResult> = self.send(domain, request).await?;
        Ok(response.msg)
    }

    /// Submit a signed attendance action.
    pub async fn submit_attendance(
        &self,
        identity: &DeviceIdentity,
        payload: &AttendancePayload,
    ) -> Result<AttendanceOutcome> {
        let response: ApiResponse<AttendanceReceipt> = self.signed_post(identity, payload).await?;
        Ok(AttendanceOutcome {
            receipt: response.msg,
            candidates: response.local_devices.unwrap_or_default(),
        })
    }

    /// Attach a terminal to an event recorded without one.
    pub async fn confirm_local_device(
        &self,
        identity: &DeviceIdentity,
        confirmation: &ConfirmLocalDevice,
    ) -> Result<AttendanceReceipt> {
        let response: ApiResponse<AttendanceReceipt> =
            self.signed_post(identity, confirmation).await?;
        Ok(response.msg)
    }

    /// Revoke this device's identity on its domain.
    pub async fn cancel_pairing(&self, identity: &DeviceIdentity, reason: Option<String>) -> Result<()> {
        let _: ApiResponse<serde_json::Value> =
            self.signed_post(identity, &CancelPairing { reason }).await?;
        Ok(())
    }

    /// Registers the employee may work at, nearest first.
    pub async fn workplaces(
        &self,
        identity: &DeviceIdentity,
        location: Geolocation,
    ) -> Result<Vec<Workplace>> {
        let request = self
            .identified(identity, self.client.post(endpoint(&identity.domain, paths::WORKPLACES)))
            .json(&WorkplacesQuery {
                latitude: location.latitude,
                longitude: location.longitude,
            });
        let response: ApiResponse<Vec<Workplace>> = self.send(&identity.domain, request).await?;
        Ok(response.msg)
    }

    /// Attendance history, newest first.
    pub async fn attendances(
        &self,
        identity: &DeviceIdentity,
        retail_id: Option<i64>,
        query: HistoryQuery,
    ) -> Result<Vec<AttendanceEvent>> {
        let path = match retail_id {
            Some(retail_id) => format!("{}/{}", paths::ATTENDANCES, retail_id),
            None => paths::ATTENDANCES.to_string(),
        };
        let request = self
            .identified(identity, self.client.get(endpoint(&identity.domain, &path)))
            .query(&query);
        let response: ApiResponse<Vec<AttendanceEvent>> =
            self.send(&identity.domain, request).await?;
        Ok(response.msg)
    }

    /// Profile of the paired employee.
    pub async fn me(&self, identity: &DeviceIdentity) -> Result<EmployeeProfile> {
        let request =
            self.identified(identity, self.client.get(endpoint(&identity.domain, paths::EMPLOYEE_ME)));
        let response: ApiResponse<EmployeeProfile> = self.send(&identity.domain, request).await?;
        Ok(response.msg)
    }

    // --- Internal helpers ---

    async fn signed_post<T, R>(&self, identity: &DeviceIdentity, payload: &T) -> Result<ApiResponse<R>>
    where
        T: SignedPayload + Clone,
        R: DeserializeOwned,
    {
        let body = sign_request(payload, identity)?;
        let request = self
            .client
            .post(endpoint(&identity.domain, payload.action()))
            .json(&body);
        self.send(&identity.domain, request).await
    }

    fn identified(
        &self,
        identity: &DeviceIdentity,
        request: reqwest::RequestBuilder,
    ) -> reqwest::RequestBuilder {
        request.header(EMPLOYEE_HEADER, identity.employee_id.to_string())
    }

    async fn send<R: DeserializeOwned>(
        &self,
        domain: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<ApiResponse<R>> {
        let resp = request
            .send()
            .await
            .map_err(|e| unreachable(domain, &e))?;

        let status = resp.status();
        let bytes = resp.bytes().await.map_err(|e| unreachable(domain, &e))?;
        debug!("{} answered {} ({} bytes)", domain, status, bytes.len());

        if status.is_success() {
            return serde_json::from_slice(&bytes).map_err(|e| {
                ShiftpassError::Protocol(format!("Invalid response from {}: {}", domain, e))
            });
        }

        match serde_json::from_slice::<ErrorBody>(&bytes) {
            Ok(body) => Err(body.into_error(domain)),
            Err(_) if status.is_server_error() => Err(ShiftpassError::DomainUnreachable(format!(
                "{} ({})",
                domain, status
            ))),
            Err(_) => Err(ShiftpassError::Protocol(format!(
                "{} returned {}",
                domain, status
            ))),
        }
    }
}

fn endpoint(domain: &str, path: &str) -> String {
    format!("{}{}", domain.trim_end_matches('/'), path)
}

fn unreachable(domain: &str, error: &reqwest::Error) -> ShiftpassError {
    debug!("Request to {} failed: {}", domain, error);
    if error.is_timeout() {
        ShiftpassError::DomainUnreachable(format!("{} (timed out)", domain))
    } else {
        ShiftpassError::DomainUnreachable(domain.to_string())
    }
}
