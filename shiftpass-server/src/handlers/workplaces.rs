//! Registers the employee can work at, ranked by distance.

use super::{paired_employee, ActingEmployee, ApiJson};
use crate::error::ServerError;
use crate::server::AppState;
use crate::storage::admin::assigned_registers;
use axum::extract::State;
use axum::Json;
use chrono::Utc;
use shiftpass_core::attendance::{Geolocation, Workplace, WorkplacesQuery};
use shiftpass_core::protocol::ApiResponse;

pub async fn workplaces(
    State(state): State<AppState>,
    ActingEmployee(employee_id): ActingEmployee,
    ApiJson(query): ApiJson<WorkplacesQuery>,
) -> Result<Json<ApiResponse<Vec<Workplace>>>, ServerError> {
    let here = Geolocation::new(query.latitude, query.longitude);
    here.validate()?;

    let conn = state.storage.conn()?;
    paired_employee(&conn, &employee_id, Utc::now().timestamp())?;

    let radius = state.config.workplace_radius_m;
    let mut workplaces: Vec<Workplace> = assigned_registers(&conn, &employee_id)?
        .into_iter()
        .map(|(register, retail_name)| {
            let distance_m =
                here.distance_m(&Geolocation::new(register.latitude, register.longitude));
            Workplace {
                register_id: register.register_id,
                register_name: register.name,
                retail_id: register.retail_id,
                retail_name,
                distance_m,
                within_range: distance_m <= radius,
            }
        })
        .collect();

    workplaces.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
    Ok(Json(ApiResponse::ok(workplaces)))
}
