//! HTTP handlers and their shared extractors.

pub mod attendance;
pub mod employee;
pub mod registration;
pub mod workplaces;

use crate::error::{ServerError, ServerResult};
use crate::keys::KeyRegistry;
use crate::storage::admin::load_employee;
use crate::storage::models::Employee;
use axum::extract::{FromRequest, FromRequestParts, Path, Query, Request};
use axum::http::request::Parts;
use axum::Json;
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use shiftpass_core::protocol::EMPLOYEE_HEADER;
use uuid::Uuid;

/// JSON body whose rejections use the API error format.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ServerError::validation("body", rejection.body_text())),
        }
    }
}

/// Query string whose rejections use the API error format.
pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(Self(value)),
            Err(rejection) => Err(ServerError::validation("query", rejection.body_text())),
        }
    }
}

/// Path parameters whose rejections use the API error format.
pub struct ApiPath<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(Self(value)),
            Err(rejection) => Err(ServerError::validation("path", rejection.body_text())),
        }
    }
}

/// Employee declared by the identity header on read-only calls.
pub struct ActingEmployee(pub Uuid);

impl<S> FromRequestParts<S> for ActingEmployee
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(EMPLOYEE_HEADER)
            .ok_or_else(|| ServerError::validation("employeeId", "missing identity header"))?
            .to_str()
            .map_err(|_| ServerError::validation("employeeId", "malformed identity header"))?;

        Uuid::parse_str(value.trim())
            .map(Self)
            .map_err(|_| ServerError::validation("employeeId", "malformed identity header"))
    }
}

/// Load an employee that still holds a valid key, or fail with `NotPaired`.
pub(crate) fn paired_employee(conn: &Connection, employee_id: &Uuid, now: i64) -> ServerResult<Employee> {
    let employee = load_employee(conn, employee_id)?.ok_or(ServerError::NotPaired)?;
    if !KeyRegistry::new(conn).is_paired(employee_id, now)? {
        return Err(ServerError::NotPaired);
    }
    Ok(employee)
}
