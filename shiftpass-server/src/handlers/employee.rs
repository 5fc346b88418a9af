//! Employee profile and pairing revocation.

use super::{paired_employee, ActingEmployee, ApiJson};
use crate::error::ServerError;
use crate::keys::KeyRegistry;
use crate::server::AppState;
use axum::extract::State;
use axum::Json;
use chrono::Utc;
use shiftpass_core::attendance::{CancelPairing, EmployeeProfile};
use shiftpass_core::envelope::SignedRequest;
use shiftpass_core::protocol::ApiResponse;
use tracing::info;

pub async fn me(
    State(state): State<AppState>,
    ActingEmployee(employee_id): ActingEmployee,
) -> Result<Json<ApiResponse<EmployeeProfile>>, ServerError> {
    let conn = state.storage.conn()?;
    let employee = paired_employee(&conn, &employee_id, Utc::now().timestamp())?;

    Ok(Json(ApiResponse::ok(EmployeeProfile {
        employee_id,
        display_name: employee.display_name(),
        company_name: state.config.company_name.clone(),
    })))
}

/// Revoke every key of the signing employee, effective immediately.
pub async fn cancel_pairing(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<SignedRequest<CancelPairing>>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ServerError> {
    let now = Utc::now().timestamp();
    let conn = state.storage.conn()?;
    let employee_id = state.verifier.verify(&conn, &request, now)?;

    let revoked = KeyRegistry::new(&conn).revoke_all(&employee_id, now)?;
    info!(
        "Employee {} cancelled pairing ({} keys revoked, reason: {})",
        employee_id,
        revoked,
        request.payload.reason.as_deref().unwrap_or("none")
    );

    Ok(Json(ApiResponse::ok(serde_json::json!({
        "employeeId": employee_id,
        "revokedKeys": revoked,
    }))))
}
