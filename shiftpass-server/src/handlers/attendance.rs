//! Signed attendance writes and the history endpoints.

use super::{paired_employee, ActingEmployee, ApiJson, ApiPath, ApiQuery};
use crate::error::ServerError;
use crate::resolver;
use crate::server::AppState;
use crate::storage::admin::{find_register, is_assigned, list_local_devices};
use crate::storage::events::{fill_local_device, insert_event, list_events, load_event};
use axum::extract::State;
use axum::Json;
use chrono::Utc;
use shiftpass_core::attendance::{
    AttendanceEvent, AttendancePayload, AttendanceReceipt, ConfirmLocalDevice, HistoryQuery,
};
use shiftpass_core::envelope::SignedRequest;
use shiftpass_core::protocol::{paths, ApiResponse};
use tracing::info;
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: u32 = 20;

type AttendanceResponse = Result<Json<ApiResponse<AttendanceReceipt>>, ServerError>;

pub async fn check_in_out(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<SignedRequest<AttendancePayload>>,
) -> AttendanceResponse {
    record(&state, paths::ATTENDANCE, request)
}

pub async fn take_break(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<SignedRequest<AttendancePayload>>,
) -> AttendanceResponse {
    record(&state, paths::BREAK, request)
}

pub async fn pause(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<SignedRequest<AttendancePayload>>,
) -> AttendanceResponse {
    record(&state, paths::PAUSE, request)
}

pub async fn specific_break(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<SignedRequest<AttendancePayload>>,
) -> AttendanceResponse {
    record(&state, paths::SPECIFIC_BREAK, request)
}

/// Verify, resolve the terminal and persist one attendance event.
///
/// The event is written even when the terminal is ambiguous; the response
/// then lists the candidates.
fn record(
    state: &AppState,
    path: &'static str,
    request: SignedRequest<AttendancePayload>,
) -> AttendanceResponse {
    let payload = &request.payload;
    if payload.kind.path() != path {
        return Err(ServerError::validation(
            "kind",
            format!("{} is not accepted on {}", payload.kind.as_str(), path),
        ));
    }

    let now = Utc::now().timestamp();
    let conn = state.storage.conn()?;
    let employee_id = state.verifier.verify(&conn, &request, now)?;
    payload.validate()?;

    let register = find_register(&conn, payload.register_id)?
        .ok_or_else(|| ServerError::NotFound(format!("register {}", payload.register_id)))?;
    if !is_assigned(&conn, &employee_id, register.register_id)? {
        return Err(ServerError::validation(
            "registerId",
            "register is not assigned to this employee",
        ));
    }

    let resolution = resolver::resolve(&conn, register.register_id, payload.local_device_id, now)?;
    let event = insert_event(
        &conn,
        &employee_id,
        register.retail_id,
        payload,
        resolution.local_device_id(),
        now,
    )?;

    info!(
        "Recorded {} for employee {} at register {} (event {})",
        event.kind.as_str(),
        employee_id,
        event.register_id,
        event.id
    );

    let response = ApiResponse::ok(AttendanceReceipt {
        event_id: event.id,
        kind: event.kind,
        timestamp: event.timestamp,
        local_device_id: event.local_device_id,
    });
    let candidates = resolution.candidates();
    if candidates.is_empty() {
        Ok(Json(response))
    } else {
        Ok(Json(response.with_local_devices(candidates)))
    }
}

/// Attach a terminal to an event recorded without one.
///
/// An event that already names a terminal is never changed.
pub async fn confirm_local_device(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<SignedRequest<ConfirmLocalDevice>>,
) -> AttendanceResponse {
    let now = Utc::now().timestamp();
    let conn = state.storage.conn()?;
    let employee_id = state.verifier.verify(&conn, &request, now)?;
    let ConfirmLocalDevice {
        event_id,
        local_device_id,
    } = request.payload;

    let event = load_event(&conn, event_id, &employee_id)?
        .ok_or_else(|| ServerError::NotFound(format!("event {}", event_id)))?;

    let receipt = AttendanceReceipt {
        event_id: event.id,
        kind: event.kind,
        timestamp: event.timestamp,
        local_device_id: Some(local_device_id),
    };

    match event.local_device_id {
        Some(current) if current == local_device_id => return Ok(Json(ApiResponse::ok(receipt))),
        Some(_) => {
            return Err(ServerError::validation(
                "localDeviceId",
                "event already has a local device",
            ))
        }
        None => {}
    }

    let devices = list_local_devices(&conn, event.register_id)?;
    if !devices.iter().any(|d| d.id == local_device_id) {
        return Err(ServerError::AmbiguousLocalDevice(devices));
    }

    if !fill_local_device(&conn, event.id, local_device_id)? {
        return Err(ServerError::validation(
            "localDeviceId",
            "event already has a local device",
        ));
    }
    resolver::touch(&conn, local_device_id, now)?;

    info!(
        "Event {} confirmed at local device {}",
        event.id, local_device_id
    );
    Ok(Json(ApiResponse::ok(receipt)))
}

pub async fn history(
    State(state): State<AppState>,
    ActingEmployee(employee_id): ActingEmployee,
    ApiQuery(query): ApiQuery<HistoryQuery>,
) -> Result<Json<ApiResponse<Vec<AttendanceEvent>>>, ServerError> {
    page(&state, &employee_id, None, query)
}

pub async fn history_for_retail(
    State(state): State<AppState>,
    ActingEmployee(employee_id): ActingEmployee,
    ApiPath(retail_id): ApiPath<i64>,
    ApiQuery(query): ApiQuery<HistoryQuery>,
) -> Result<Json<ApiResponse<Vec<AttendanceEvent>>>, ServerError> {
    page(&state, &employee_id, Some(retail_id), query)
}

fn page(
    state: &AppState,
    employee_id: &Uuid,
    retail_id: Option<i64>,
    query: HistoryQuery,
) -> Result<Json<ApiResponse<Vec<AttendanceEvent>>>, ServerError> {
    let conn = state.storage.conn()?;
    paired_employee(&conn, employee_id, Utc::now().timestamp())?;

    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .min(state.config.history_page_limit)
        .max(1);
    let skip = query.skip.unwrap_or(0);

    let events = list_events(&conn, employee_id, retail_id, limit, skip)?;
    Ok(Json(ApiResponse::ok(events)))
}
