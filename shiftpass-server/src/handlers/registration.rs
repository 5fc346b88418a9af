//! Registration handlers.

use super::{ApiJson, ApiPath};
use crate::error::ServerError;
use crate::registration::{consume_registration_token, registration_info};
use crate::server::AppState;
use axum::extract::State;
use axum::Json;
use chrono::Utc;
use shiftpass_core::protocol::ApiResponse;
use shiftpass_core::registration::{RegistrationInfo, RegistrationRequest, RegistrationResult};

pub async fn fetch_registration(
    State(state): State<AppState>,
    ApiPath(token_id): ApiPath<String>,
) -> Result<Json<ApiResponse<RegistrationInfo>>, ServerError> {
    let conn = state.storage.conn()?;
    let info = registration_info(
        &conn,
        &token_id,
        &state.config.company_name,
        Utc::now().timestamp(),
    )?;
    Ok(Json(ApiResponse::ok(info)))
}

pub async fn register(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<RegistrationRequest>,
) -> Result<Json<ApiResponse<RegistrationResult>>, ServerError> {
    let mut conn = state.storage.conn()?;
    let result = consume_registration_token(
        &mut conn,
        &request,
        &state.config.company_name,
        state.config.key_rotation_grace_secs,
        Utc::now().timestamp(),
    )?;
    Ok(Json(ApiResponse::ok(result)))
}
